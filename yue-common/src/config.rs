//! Configuration loading and validation
//!
//! Bootstrap configuration comes from a TOML file. Every setting resolves in
//! this priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! Tiers 1 and 2 are parsed by the binary and handed in as [`ConfigOverrides`];
//! nothing in this module reads the process environment, so components can be
//! built and tested from an explicit [`TomlConfig`] value.

use crate::models;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name searched for when no explicit config path is given
pub const CONFIG_FILE_NAME: &str = "yue.toml";

/// Complete bootstrap configuration
///
/// Cannot change while running; restart to pick up edits.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    /// HTTP bind settings
    #[serde(default)]
    pub server: ServerConfig,

    /// External inference program settings
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Inference program configuration
#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    /// Executable launched for each generation (e.g. `python`)
    #[serde(default = "default_program")]
    pub program: PathBuf,

    /// Leading arguments placed before the composed flags
    /// (e.g. the path of the inference script)
    #[serde(default = "default_program_args")]
    pub program_args: Vec<String>,

    /// Working directory for the child process
    #[serde(default = "default_working_dir")]
    pub working_dir: Option<PathBuf>,

    /// CUDA device indices; one worker is started per device
    #[serde(default = "default_cuda_devices")]
    pub cuda_devices: Vec<String>,

    /// Stage-1 model used when a request does not name one
    #[serde(default = "default_stage1_model")]
    pub stage1_model: String,

    /// Stage-2 model used when a request does not name one
    #[serde(default = "default_stage2_model")]
    pub stage2_model: String,

    /// Shared output directory; each job writes into its own subdirectory
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Directory for staged genre/lyrics files (system temp dir when unset)
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,

    /// Upper bound on one invocation's wall-clock time
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// File extensions recognized as generated audio
    #[serde(default = "default_artifact_extensions")]
    pub artifact_extensions: Vec<String>,

    /// How many directory levels below the job directory are scanned
    #[serde(default = "default_scan_depth")]
    pub scan_depth: usize,

    /// Optional JSON array of suggested genre tags
    #[serde(default)]
    pub tags_file: Option<PathBuf>,

    /// Maximum number of jobs waiting for a worker
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Finished job records kept for polling; oldest are evicted first
    #[serde(default = "default_job_history")]
    pub job_history: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_program() -> PathBuf {
    PathBuf::from("python")
}

fn default_program_args() -> Vec<String> {
    vec!["/app/inference/infer.py".to_string()]
}

fn default_working_dir() -> Option<PathBuf> {
    Some(PathBuf::from("/app"))
}

fn default_cuda_devices() -> Vec<String> {
    vec!["0".to_string()]
}

fn default_stage1_model() -> String {
    models::DEFAULT_STAGE1_MODEL.to_string()
}

fn default_stage2_model() -> String {
    models::DEFAULT_STAGE2_MODEL.to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("/app/output")
}

fn default_artifact_extensions() -> Vec<String> {
    vec!["mp3".to_string(), "wav".to_string()]
}

fn default_scan_depth() -> usize {
    1
}

fn default_queue_capacity() -> usize {
    32
}

fn default_job_history() -> usize {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            program_args: default_program_args(),
            working_dir: default_working_dir(),
            cuda_devices: default_cuda_devices(),
            stage1_model: default_stage1_model(),
            stage2_model: default_stage2_model(),
            output_dir: default_output_dir(),
            staging_dir: None,
            timeout_secs: None,
            artifact_extensions: default_artifact_extensions(),
            scan_depth: default_scan_depth(),
            tags_file: None,
            queue_capacity: default_queue_capacity(),
            job_history: default_job_history(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl InferenceConfig {
    /// Configured invocation timeout, if any
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Directory for staged files, falling back to the system temp dir
    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Settings supplied on the command line or through the environment
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub cuda_devices: Option<Vec<String>>,
    pub stage1_model: Option<String>,
    pub stage2_model: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub program: Option<PathBuf>,
    pub log_level: Option<String>,
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply command-line/environment overrides on top of file values
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(host) = &overrides.host {
            self.server.host = host.clone();
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(devices) = &overrides.cuda_devices {
            self.inference.cuda_devices = devices.clone();
        }
        if let Some(model) = &overrides.stage1_model {
            self.inference.stage1_model = model.clone();
        }
        if let Some(model) = &overrides.stage2_model {
            self.inference.stage2_model = model.clone();
        }
        if let Some(dir) = &overrides.output_dir {
            self.inference.output_dir = dir.clone();
        }
        if let Some(program) = &overrides.program {
            self.inference.program = program.clone();
        }
        if let Some(level) = &overrides.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Reject settings that would only fail later inside a worker
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(Error::Config("server.port must be non-zero".to_string()));
        }

        let inference = &self.inference;
        if !models::is_supported_stage1(&inference.stage1_model) {
            return Err(Error::Config(format!(
                "Unsupported default stage-1 model '{}'. Supported: {}",
                inference.stage1_model,
                models::STAGE1_MODELS.join(", ")
            )));
        }
        if !models::is_supported_stage2(&inference.stage2_model) {
            return Err(Error::Config(format!(
                "Unsupported default stage-2 model '{}'. Supported: {}",
                inference.stage2_model,
                models::STAGE2_MODELS.join(", ")
            )));
        }
        if inference.cuda_devices.iter().all(|d| d.trim().is_empty()) {
            return Err(Error::Config(
                "inference.cuda_devices must list at least one device".to_string(),
            ));
        }
        if inference.artifact_extensions.is_empty() {
            return Err(Error::Config(
                "inference.artifact_extensions must not be empty".to_string(),
            ));
        }
        if inference.timeout_secs == Some(0) {
            return Err(Error::Config(
                "inference.timeout_secs must be positive when set".to_string(),
            ));
        }
        if inference.queue_capacity == 0 {
            return Err(Error::Config(
                "inference.queue_capacity must be positive".to_string(),
            ));
        }
        if inference.job_history == 0 {
            return Err(Error::Config(
                "inference.job_history must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Split a comma separated device list (`"0,1"`) into device indices
pub fn parse_device_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .collect()
}

/// Configuration together with the file it was read from
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: TomlConfig,
    /// `None` when no file was found and compiled defaults are in effect
    pub source: Option<PathBuf>,
}

/// Load configuration from `path`, or from the first default location found
///
/// A missing file is not fatal: compiled defaults are returned and
/// `source` is `None` so the caller can warn about it. A file that exists
/// but does not parse is an error.
pub fn load_config(path: Option<&Path>) -> Result<LoadedConfig> {
    let candidate = match path {
        Some(p) => Some(p.to_path_buf()),
        None => default_config_locations().into_iter().find(|p| p.exists()),
    };

    let Some(config_path) = candidate.filter(|p| p.exists()) else {
        return Ok(LoadedConfig {
            config: TomlConfig::default(),
            source: None,
        });
    };

    let content = std::fs::read_to_string(&config_path)?;
    let config = TomlConfig::from_toml_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse {}: {}", config_path.display(), e))
    })?;
    Ok(LoadedConfig {
        config,
        source: Some(config_path),
    })
}

/// Default config search order: working directory, user config dir, system
fn default_config_locations() -> Vec<PathBuf> {
    let mut locations = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(dir) = dirs::config_dir() {
        locations.push(dir.join("yue").join(CONFIG_FILE_NAME));
    }
    if cfg!(unix) {
        locations.push(PathBuf::from("/etc/yue").join(CONFIG_FILE_NAME));
    }
    locations
}
