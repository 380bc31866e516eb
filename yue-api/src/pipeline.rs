//! Generation pipeline: compose → stage → invoke → resolve
//!
//! One [`GenerationPipeline::run`] call corresponds to exactly one run of the
//! inference program. Staged files are released before `run` returns, on
//! every path.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use yue_common::config::InferenceConfig;

use crate::command::{compose, BindError, ComposedCommand, InvocationTarget};
use crate::output::{Artifact, NoArtifactError, OutputError, OutputResolver};
use crate::params::GenerationRequest;
use crate::runner::{InvocationResult, InvocationRunner, LaunchError};
use crate::staging::StagingArea;

/// Where a job runs and writes
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: Uuid,
    pub cuda_idx: String,
    /// Job-private output directory
    pub output_dir: PathBuf,
}

/// Successful generation
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    /// Newest artifact in the job's output directory
    pub artifact: Artifact,
    /// Number of audio files found
    pub file_count: usize,
    pub output_dir: PathBuf,
    pub command_line: String,
    pub invocation: InvocationResult,
}

impl GenerationOutcome {
    /// Human-readable success message
    pub fn status_text(&self) -> String {
        format!(
            "Success! Generated {} file(s).\nLatest: {}\n\nOutput directory: {}",
            self.file_count,
            self.artifact.file_name(),
            self.output_dir.display()
        )
    }
}

/// Every way a generation can fail after validation
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("failed to prepare output directory {}: {source}", .dir.display())]
    OutputDir {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to stage text inputs: {0}")]
    Staging(#[source] std::io::Error),

    #[error("failed to bind staged files: {0}")]
    Bind(#[from] BindError),

    #[error("{source}")]
    Launch {
        #[source]
        source: LaunchError,
        command_line: String,
    },

    #[error("inference exited with code {exit_code:?}")]
    InvocationFailure {
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
        command_line: String,
    },

    #[error("{source}")]
    NoArtifact {
        #[source]
        source: NoArtifactError,
        stdout: String,
        command_line: String,
    },

    #[error("{source}")]
    Output {
        #[source]
        source: OutputError,
        command_line: String,
    },
}

impl GenerationError {
    /// Stable machine-readable code for API responses and job records
    pub fn code(&self) -> &'static str {
        match self {
            GenerationError::OutputDir { .. } | GenerationError::Output { .. } => "OUTPUT_ERROR",
            GenerationError::Staging(_) | GenerationError::Bind(_) => "STAGING_ERROR",
            GenerationError::Launch {
                source: LaunchError::TimedOut(_),
                ..
            } => "TIMED_OUT",
            GenerationError::Launch {
                source: LaunchError::Cancelled,
                ..
            } => "CANCELLED",
            GenerationError::Launch { .. } => "LAUNCH_ERROR",
            GenerationError::InvocationFailure { .. } => "INVOCATION_FAILED",
            GenerationError::NoArtifact { .. } => "NO_ARTIFACT",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            GenerationError::Launch {
                source: LaunchError::Cancelled,
                ..
            }
        )
    }

    /// Composed command line, when composition got that far
    pub fn command_line(&self) -> Option<&str> {
        match self {
            GenerationError::Launch { command_line, .. }
            | GenerationError::InvocationFailure { command_line, .. }
            | GenerationError::NoArtifact { command_line, .. }
            | GenerationError::Output { command_line, .. } => Some(command_line),
            _ => None,
        }
    }

    /// Human-readable failure message with enough detail to reproduce the run
    pub fn status_text(&self) -> String {
        match self {
            GenerationError::InvocationFailure {
                stderr,
                command_line,
                ..
            } => format!("Error: {}\n\nCommand: {}", stderr, command_line),
            GenerationError::NoArtifact {
                source,
                stdout,
                command_line,
            } => format!(
                "Generation completed but no audio files found in {}.\n\nCommand output: {}\n\nCommand: {}",
                source.dir.display(),
                stdout,
                command_line
            ),
            GenerationError::Launch {
                source: LaunchError::Cancelled,
                command_line,
            } => format!("Generation cancelled.\n\nCommand: {}", command_line),
            GenerationError::Launch {
                source,
                command_line,
            } => format!("Failed to launch inference: {}\n\nCommand: {}", source, command_line),
            GenerationError::Output {
                source,
                command_line,
            } => format!("Error: {}\n\nCommand: {}", source, command_line),
            other => format!("Error: {}", other),
        }
    }
}

/// Drives one generation through composition, staging, invocation and output discovery
#[derive(Debug, Clone)]
pub struct GenerationPipeline {
    config: Arc<InferenceConfig>,
    runner: InvocationRunner,
    resolver: OutputResolver,
}

impl GenerationPipeline {
    pub fn new(config: Arc<InferenceConfig>) -> Self {
        let runner = InvocationRunner::from_config(&config);
        let resolver = OutputResolver::from_config(&config);
        Self {
            config,
            runner,
            resolver,
        }
    }

    /// Private output directory for a job
    pub fn job_output_dir(&self, job_id: Uuid) -> PathBuf {
        job_output_dir(&self.config.output_dir, job_id)
    }

    pub async fn run(
        &self,
        request: &GenerationRequest,
        job: &JobContext,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutcome, GenerationError> {
        tokio::fs::create_dir_all(&job.output_dir)
            .await
            .map_err(|source| GenerationError::OutputDir {
                dir: job.output_dir.clone(),
                source,
            })?;

        let composed = compose(
            request,
            InvocationTarget {
                cuda_idx: &job.cuda_idx,
                output_dir: &job.output_dir,
            },
        );
        tracing::debug!(
            job_id = %job.job_id,
            args = ?composed.preview(),
            "Composed inference command"
        );

        let mut staging = StagingArea::new(self.config.staging_dir());
        let result = self.invoke(&mut staging, &composed, request, job, cancel).await;
        let released = staging.release_all();
        tracing::debug!(job_id = %job.job_id, released, "Released staged files");

        let (invocation, command_line) = result?;

        if !invocation.success() {
            tracing::warn!(
                job_id = %job.job_id,
                exit_code = ?invocation.exit_code,
                duration_secs = invocation.duration.as_secs_f64(),
                "Inference exited with failure"
            );
            return Err(GenerationError::InvocationFailure {
                exit_code: invocation.exit_code,
                stdout: invocation.stdout,
                stderr: invocation.stderr,
                command_line,
            });
        }

        let artifacts = match self.resolver.scan(&job.output_dir) {
            Ok(artifacts) => artifacts,
            Err(source) => {
                return Err(GenerationError::Output {
                    source,
                    command_line,
                })
            }
        };
        let artifact = match artifacts.latest() {
            Ok(artifact) => artifact.clone(),
            Err(source) => {
                return Err(GenerationError::NoArtifact {
                    source,
                    stdout: invocation.stdout,
                    command_line,
                })
            }
        };

        tracing::info!(
            job_id = %job.job_id,
            artifact = %artifact.path.display(),
            file_count = artifacts.len(),
            duration_secs = invocation.duration.as_secs_f64(),
            "Generation completed"
        );

        Ok(GenerationOutcome {
            artifact,
            file_count: artifacts.len(),
            output_dir: job.output_dir.clone(),
            command_line,
            invocation,
        })
    }

    /// Stage inputs and run the program; the caller releases `staging`
    async fn invoke(
        &self,
        staging: &mut StagingArea,
        composed: &ComposedCommand,
        request: &GenerationRequest,
        job: &JobContext,
        cancel: &CancellationToken,
    ) -> Result<(InvocationResult, String), GenerationError> {
        let staged = staging
            .stage_all(composed.staging_requests())
            .map_err(GenerationError::Staging)?;
        let args = composed.bind(&staged)?;
        let command_line = self.runner.command_line(&args);

        tracing::info!(
            job_id = %job.job_id,
            cuda_idx = %job.cuda_idx,
            prompt_mode = request.prompt().mode_name(),
            command = %command_line,
            "Launching inference"
        );

        match self.runner.run(&args, request.timeout(), cancel).await {
            Ok(invocation) => Ok((invocation, command_line)),
            Err(source) => {
                tracing::error!(job_id = %job.job_id, error = %source, "Inference launch failed");
                Err(GenerationError::Launch {
                    source,
                    command_line,
                })
            }
        }
    }
}

/// `<output_dir>/<job_id>`
pub fn job_output_dir(output_dir: &Path, job_id: Uuid) -> PathBuf {
    output_dir.join(job_id.to_string())
}
