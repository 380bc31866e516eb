//! Command composition for the external inference program
//!
//! [`compose`] is a pure mapping from a validated [`GenerationRequest`] to the
//! inference program's argument list. Free-text fields cannot be passed
//! inline, so the composer emits placeholder slots plus a list of
//! [`StagingRequest`]s; the caller stages those files and calls
//! [`ComposedCommand::bind`] with the resulting paths.
//!
//! Argument grammar (order is fixed):
//!
//! ```text
//! --cuda_idx I --stage1_model S1 --stage2_model S2 --run_n_segments N
//! --stage2_batch_size B --output_dir D --max_new_tokens T --repetition_penalty R
//! [--genre_txt PATH] [--lyrics_txt PATH]
//! [--use_dual_tracks_prompt [--vocal_track_prompt_path P1]
//!     [--instrumental_track_prompt_path P2] [--prompt_start_time S] [--prompt_end_time E]]
//! [--use_audio_prompt [--audio_prompt_path P] [--prompt_start_time S] [--prompt_end_time E]]
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::params::{AudioPrompt, GenerationRequest, PromptWindow, TextInput};

/// Free-text field that needs a staged file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagedField {
    Genre,
    Lyrics,
}

impl StagedField {
    pub fn as_str(&self) -> &'static str {
        match self {
            StagedField::Genre => "genre",
            StagedField::Lyrics => "lyrics",
        }
    }
}

impl fmt::Display for StagedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Text that must be written to a temporary file before invocation
#[derive(Debug, Clone, PartialEq)]
pub struct StagingRequest {
    pub field: StagedField,
    pub content: String,
}

/// Per-invocation values not carried by the request itself
#[derive(Debug, Clone, Copy)]
pub struct InvocationTarget<'a> {
    /// CUDA device index of the worker running the job
    pub cuda_idx: &'a str,
    /// Job-private output directory
    pub output_dir: &'a Path,
}

#[derive(Debug, Clone, PartialEq)]
enum Arg {
    Literal(String),
    /// Index into `ComposedCommand::staging`
    Staged(usize),
}

/// Staged paths handed to [`ComposedCommand::bind`] do not match the requests
#[derive(Debug, Error)]
#[error("expected {expected} staged file(s), got {actual}")]
pub struct BindError {
    pub expected: usize,
    pub actual: usize,
}

/// Argument list with unresolved staged-file slots
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedCommand {
    args: Vec<Arg>,
    staging: Vec<StagingRequest>,
}

impl ComposedCommand {
    /// Files the caller must stage, in slot order
    pub fn staging_requests(&self) -> &[StagingRequest] {
        &self.staging
    }

    /// Resolve staged-file slots into the final argument list
    ///
    /// `staged_paths[i]` must be the file written for `staging_requests()[i]`.
    pub fn bind(&self, staged_paths: &[PathBuf]) -> Result<Vec<String>, BindError> {
        if staged_paths.len() != self.staging.len() {
            return Err(BindError {
                expected: self.staging.len(),
                actual: staged_paths.len(),
            });
        }
        Ok(self
            .args
            .iter()
            .map(|arg| match arg {
                Arg::Literal(value) => value.clone(),
                Arg::Staged(index) => path_arg(&staged_paths[*index]),
            })
            .collect())
    }

    /// Argument list with `<staged:field>` placeholders, for logging before staging
    pub fn preview(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| match arg {
                Arg::Literal(value) => value.clone(),
                Arg::Staged(index) => format!("<staged:{}>", self.staging[*index].field),
            })
            .collect()
    }
}

/// Map a validated request onto the inference program's argument list
pub fn compose(request: &GenerationRequest, target: InvocationTarget<'_>) -> ComposedCommand {
    let mut builder = Builder::default();

    builder.flag_value("--cuda_idx", target.cuda_idx);
    builder.flag_value("--stage1_model", request.stage1_model());
    builder.flag_value("--stage2_model", request.stage2_model());
    builder.flag_value("--run_n_segments", request.run_n_segments());
    builder.flag_value("--stage2_batch_size", request.stage2_batch_size());
    builder.flag_value("--output_dir", path_arg(target.output_dir));
    builder.flag_value("--max_new_tokens", request.max_new_tokens());
    builder.flag_value("--repetition_penalty", request.repetition_penalty());

    builder.text_input("--genre_txt", StagedField::Genre, request.genre());
    builder.text_input("--lyrics_txt", StagedField::Lyrics, request.lyrics());

    match request.prompt() {
        AudioPrompt::DualTrack {
            vocal,
            instrumental,
            window,
        } => {
            builder.flag("--use_dual_tracks_prompt");
            builder.optional_path("--vocal_track_prompt_path", vocal.as_deref());
            builder.optional_path("--instrumental_track_prompt_path", instrumental.as_deref());
            builder.window(window);
        }
        AudioPrompt::SingleTrack { path, window } => {
            builder.flag("--use_audio_prompt");
            builder.optional_path("--audio_prompt_path", path.as_deref());
            builder.window(window);
        }
        AudioPrompt::None => {}
    }

    builder.finish()
}

#[derive(Default)]
struct Builder {
    args: Vec<Arg>,
    staging: Vec<StagingRequest>,
}

impl Builder {
    fn flag(&mut self, flag: &str) {
        self.args.push(Arg::Literal(flag.to_string()));
    }

    fn flag_value(&mut self, flag: &str, value: impl fmt::Display) {
        self.flag(flag);
        self.args.push(Arg::Literal(value.to_string()));
    }

    fn optional_path(&mut self, flag: &str, path: Option<&Path>) {
        if let Some(path) = path {
            self.flag_value(flag, path_arg(path));
        }
    }

    fn text_input(&mut self, flag: &str, field: StagedField, input: &TextInput) {
        match input {
            TextInput::File(path) => self.flag_value(flag, path_arg(path)),
            TextInput::Inline(content) => {
                self.flag(flag);
                self.args.push(Arg::Staged(self.staging.len()));
                self.staging.push(StagingRequest {
                    field,
                    content: content.clone(),
                });
            }
            TextInput::Absent => {}
        }
    }

    fn window(&mut self, window: &PromptWindow) {
        if let Some(start) = window.start {
            self.flag_value("--prompt_start_time", start);
        }
        if let Some(end) = window.end {
            self.flag_value("--prompt_end_time", end);
        }
    }

    fn finish(self) -> ComposedCommand {
        ComposedCommand {
            args: self.args,
            staging: self.staging,
        }
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
