//! Generation request model and validation
//!
//! [`GenerateRequest`] is the raw payload accepted by the HTTP surface and the
//! browser UI. [`GenerateRequest::validate`] turns it into a
//! [`GenerationRequest`], which is immutable and is the only input the
//! command composer accepts.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use yue_common::config::InferenceConfig;
use yue_common::models;

/// A request field failed validation
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Payload field name (matches the JSON key)
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Raw generation payload
///
/// Field names follow the inference program's flag names. Defaults match
/// the values the inference program documents.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerateRequest {
    pub genre_txt: Option<String>,
    pub lyrics_txt: Option<String>,
    pub genre_file: Option<String>,
    pub lyrics_file: Option<String>,
    pub run_n_segments: i64,
    pub stage2_batch_size: i64,
    pub max_new_tokens: i64,
    pub repetition_penalty: f64,
    pub use_audio_prompt: bool,
    pub audio_prompt_path: Option<String>,
    pub prompt_start_time: Option<f64>,
    pub prompt_end_time: Option<f64>,
    pub use_dual_tracks_prompt: bool,
    pub vocal_track_prompt_path: Option<String>,
    pub instrumental_track_prompt_path: Option<String>,
    pub stage1_model: Option<String>,
    pub stage2_model: Option<String>,
    /// Per-request wall-clock bound, capped by the configured timeout
    pub timeout_secs: Option<u64>,
}

impl Default for GenerateRequest {
    fn default() -> Self {
        Self {
            genre_txt: None,
            lyrics_txt: None,
            genre_file: None,
            lyrics_file: None,
            run_n_segments: 2,
            stage2_batch_size: 4,
            max_new_tokens: 3000,
            repetition_penalty: 1.1,
            use_audio_prompt: false,
            audio_prompt_path: None,
            prompt_start_time: Some(0.0),
            prompt_end_time: Some(30.0),
            use_dual_tracks_prompt: false,
            vocal_track_prompt_path: None,
            instrumental_track_prompt_path: None,
            stage1_model: None,
            stage2_model: None,
            timeout_secs: None,
        }
    }
}

/// Source of a free-text field (genre tags or lyrics)
#[derive(Debug, Clone, PartialEq)]
pub enum TextInput {
    /// Caller-supplied file; passed to the inference program as-is
    File(PathBuf),
    /// Free text that has to be staged into a temporary file
    Inline(String),
    Absent,
}

/// Reference excerpt bounds in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PromptWindow {
    pub start: Option<f64>,
    pub end: Option<f64>,
}

/// Audio reference guiding generation
#[derive(Debug, Clone, PartialEq)]
pub enum AudioPrompt {
    None,
    SingleTrack {
        path: Option<PathBuf>,
        window: PromptWindow,
    },
    DualTrack {
        vocal: Option<PathBuf>,
        instrumental: Option<PathBuf>,
        window: PromptWindow,
    },
}

impl AudioPrompt {
    pub fn is_active(&self) -> bool {
        !matches!(self, AudioPrompt::None)
    }

    pub fn mode_name(&self) -> &'static str {
        match self {
            AudioPrompt::None => "none",
            AudioPrompt::SingleTrack { .. } => "single-track",
            AudioPrompt::DualTrack { .. } => "dual-track",
        }
    }
}

/// Validated generation request
///
/// Only constructed through [`GenerateRequest::validate`]; read-only afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    genre: TextInput,
    lyrics: TextInput,
    run_n_segments: u32,
    stage2_batch_size: u32,
    max_new_tokens: u32,
    repetition_penalty: f64,
    prompt: AudioPrompt,
    stage1_model: String,
    stage2_model: String,
    timeout: Option<Duration>,
}

impl GenerationRequest {
    pub fn genre(&self) -> &TextInput {
        &self.genre
    }

    pub fn lyrics(&self) -> &TextInput {
        &self.lyrics
    }

    pub fn run_n_segments(&self) -> u32 {
        self.run_n_segments
    }

    pub fn stage2_batch_size(&self) -> u32 {
        self.stage2_batch_size
    }

    pub fn max_new_tokens(&self) -> u32 {
        self.max_new_tokens
    }

    pub fn repetition_penalty(&self) -> f64 {
        self.repetition_penalty
    }

    pub fn prompt(&self) -> &AudioPrompt {
        &self.prompt
    }

    pub fn stage1_model(&self) -> &str {
        &self.stage1_model
    }

    pub fn stage2_model(&self) -> &str {
        &self.stage2_model
    }

    /// Effective invocation timeout (request bound capped by configuration)
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl GenerateRequest {
    /// Validate and normalize into a [`GenerationRequest`]
    ///
    /// `defaults` supplies the model ids used when the request names none and
    /// the configured timeout ceiling.
    pub fn validate(self, defaults: &InferenceConfig) -> Result<GenerationRequest, ValidationError> {
        let run_n_segments = positive("run_n_segments", self.run_n_segments)?;
        let stage2_batch_size = positive("stage2_batch_size", self.stage2_batch_size)?;
        let max_new_tokens = positive("max_new_tokens", self.max_new_tokens)?;

        if !self.repetition_penalty.is_finite() || self.repetition_penalty < 1.0 {
            return Err(ValidationError::new(
                "repetition_penalty",
                format!("must be >= 1.0, got {}", self.repetition_penalty),
            ));
        }

        let stage1_model = non_empty(self.stage1_model)
            .unwrap_or_else(|| defaults.stage1_model.clone());
        if !models::is_supported_stage1(&stage1_model) {
            return Err(ValidationError::new(
                "stage1_model",
                format!(
                    "unsupported model '{}'; expected one of: {}",
                    stage1_model,
                    models::STAGE1_MODELS.join(", ")
                ),
            ));
        }

        let stage2_model = non_empty(self.stage2_model)
            .unwrap_or_else(|| defaults.stage2_model.clone());
        if !models::is_supported_stage2(&stage2_model) {
            return Err(ValidationError::new(
                "stage2_model",
                format!(
                    "unsupported model '{}'; expected one of: {}",
                    stage2_model,
                    models::STAGE2_MODELS.join(", ")
                ),
            ));
        }

        let window = PromptWindow {
            start: self.prompt_start_time,
            end: self.prompt_end_time,
        };

        // Dual-track wins when a payload sets both prompt flags.
        let prompt = if self.use_dual_tracks_prompt {
            if self.use_audio_prompt {
                tracing::warn!(
                    "Both use_audio_prompt and use_dual_tracks_prompt set; using dual-track prompt"
                );
            }
            validate_window(&window)?;
            AudioPrompt::DualTrack {
                vocal: normalize_path(self.vocal_track_prompt_path),
                instrumental: normalize_path(self.instrumental_track_prompt_path),
                window,
            }
        } else if self.use_audio_prompt {
            validate_window(&window)?;
            AudioPrompt::SingleTrack {
                path: normalize_path(self.audio_prompt_path),
                window,
            }
        } else {
            AudioPrompt::None
        };

        if prompt.is_active() && !models::supports_audio_prompt(&stage1_model) {
            tracing::warn!(
                stage1_model = %stage1_model,
                "Audio prompt requested with a non-ICL stage-1 model; the reference may be ignored"
            );
        }

        let timeout = match self.timeout_secs {
            Some(0) => {
                return Err(ValidationError::new("timeout_secs", "must be positive"));
            }
            Some(secs) => {
                let requested = Duration::from_secs(secs);
                Some(defaults.timeout().map_or(requested, |limit| limit.min(requested)))
            }
            None => defaults.timeout(),
        };

        Ok(GenerationRequest {
            genre: text_input(self.genre_file, self.genre_txt),
            lyrics: text_input(self.lyrics_file, self.lyrics_txt),
            run_n_segments,
            stage2_batch_size,
            max_new_tokens,
            repetition_penalty: self.repetition_penalty,
            prompt,
            stage1_model,
            stage2_model,
            timeout,
        })
    }
}

fn positive(field: &'static str, value: i64) -> Result<u32, ValidationError> {
    if value < 1 {
        return Err(ValidationError::new(field, format!("must be >= 1, got {}", value)));
    }
    u32::try_from(value)
        .map_err(|_| ValidationError::new(field, format!("value {} is too large", value)))
}

fn validate_window(window: &PromptWindow) -> Result<(), ValidationError> {
    if let Some(start) = window.start {
        if !start.is_finite() || start < 0.0 {
            return Err(ValidationError::new(
                "prompt_start_time",
                format!("must be >= 0, got {}", start),
            ));
        }
    }
    if let Some(end) = window.end {
        if !end.is_finite() {
            return Err(ValidationError::new("prompt_end_time", "must be a finite number"));
        }
        let start = window.start.unwrap_or(0.0);
        if end <= start {
            return Err(ValidationError::new(
                "prompt_end_time",
                format!("must be greater than prompt_start_time ({}), got {}", start, end),
            ));
        }
    }
    Ok(())
}

/// File reference takes precedence over free text
fn text_input(file: Option<String>, text: Option<String>) -> TextInput {
    if let Some(path) = normalize_path(file) {
        return TextInput::File(path);
    }
    match text {
        Some(text) if !text.is_empty() => TextInput::Inline(text),
        _ => TextInput::Absent,
    }
}

/// Empty or whitespace-only paths mean "not provided"
pub fn normalize_path(value: Option<String>) -> Option<PathBuf> {
    non_empty(value).map(PathBuf::from)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
