//! Output discovery
//!
//! After an invocation the resolver scans the job's output directory for
//! audio files. Results are ordered newest first by modification time, with
//! ties broken by ascending path so the order is deterministic.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;
use walkdir::WalkDir;
use yue_common::config::InferenceConfig;

/// Invocation succeeded but produced no recognized audio file
#[derive(Debug, Clone, Error)]
#[error("no audio artifact found in {}", .dir.display())]
pub struct NoArtifactError {
    pub dir: PathBuf,
}

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("output directory {} does not exist", .0.display())]
    MissingDirectory(PathBuf),

    #[error("failed to scan output directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A generated audio file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub modified: SystemTime,
}

impl Artifact {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Audio files found in one directory, newest first
#[derive(Debug, Clone)]
pub struct ArtifactSet {
    dir: PathBuf,
    artifacts: Vec<Artifact>,
}

impl ArtifactSet {
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter()
    }

    /// Artifact with the greatest modification time
    pub fn latest(&self) -> Result<&Artifact, NoArtifactError> {
        self.artifacts.first().ok_or_else(|| NoArtifactError {
            dir: self.dir.clone(),
        })
    }
}

/// Scans directories for files with recognized audio extensions
#[derive(Debug, Clone)]
pub struct OutputResolver {
    extensions: Vec<String>,
    max_depth: usize,
}

impl OutputResolver {
    /// `max_depth` of 1 scans only the directory itself
    pub fn new(extensions: &[String], max_depth: usize) -> Self {
        Self {
            extensions: extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            max_depth: max_depth.max(1),
        }
    }

    pub fn from_config(config: &InferenceConfig) -> Self {
        Self::new(&config.artifact_extensions, config.scan_depth)
    }

    pub fn is_artifact(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .is_some_and(|ext| self.extensions.iter().any(|e| *e == ext))
    }

    pub fn scan(&self, dir: &Path) -> Result<ArtifactSet, OutputError> {
        if !dir.is_dir() {
            return Err(OutputError::MissingDirectory(dir.to_path_buf()));
        }

        let mut artifacts = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(self.max_depth) {
            let entry = entry?;
            if !entry.file_type().is_file() || !self.is_artifact(entry.path()) {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            artifacts.push(Artifact {
                path: entry.into_path(),
                modified,
            });
        }

        artifacts.sort_by(|a, b| {
            b.modified
                .cmp(&a.modified)
                .then_with(|| a.path.cmp(&b.path))
        });

        Ok(ArtifactSet {
            dir: dir.to_path_buf(),
            artifacts,
        })
    }
}
