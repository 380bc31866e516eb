//! Temporary staging of free-text inputs and uploaded prompt audio
//!
//! The inference program only accepts file paths for genre tags, lyrics and
//! reference audio. A [`StagingArea`] writes caller content into uniquely
//! named files and owns them for the duration of one job. Every staged file is removed by
//! [`StagingArea::release_all`], and again on drop, so no exit path (success,
//! failed invocation, early error, task cancellation) leaves files behind.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::command::StagingRequest;

const FILE_PREFIX: &str = "yue_";
const FILE_SUFFIX: &str = ".txt";

/// Owner of the staged files for one invocation
#[derive(Debug)]
pub struct StagingArea {
    dir: PathBuf,
    staged: Vec<PathBuf>,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            staged: Vec::new(),
        }
    }

    /// Write `content` into a new uniquely named file and register it for cleanup
    pub fn stage(&mut self, content: &str) -> io::Result<PathBuf> {
        self.stage_named(FILE_PREFIX, FILE_SUFFIX, content.as_bytes())
    }

    /// Store an uploaded file, keeping a sanitized form of its extension
    ///
    /// The inference program sniffs audio format from the extension, so
    /// uploads without a usable one are stored as `.wav`.
    pub fn stage_upload(&mut self, label: &str, original_name: Option<&str>, bytes: &[u8]) -> io::Result<PathBuf> {
        let extension = original_name
            .and_then(|name| Path::new(name).extension())
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .filter(|ext| !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or_else(|| "wav".to_string());
        let prefix = format!("{}{}_", FILE_PREFIX, label);
        self.stage_named(&prefix, &format!(".{}", extension), bytes)
    }

    /// Stage every request in order; paths line up with `requests`
    ///
    /// On failure, files already staged stay registered and are released
    /// with the rest.
    pub fn stage_all(&mut self, requests: &[StagingRequest]) -> io::Result<Vec<PathBuf>> {
        requests
            .iter()
            .map(|request| {
                let prefix = format!("{}{}_", FILE_PREFIX, request.field);
                self.stage_named(&prefix, FILE_SUFFIX, request.content.as_bytes())
            })
            .collect()
    }

    /// Paths currently registered for cleanup
    pub fn staged_paths(&self) -> &[PathBuf] {
        &self.staged
    }

    /// Delete every registered file
    ///
    /// Missing files are not an error. Returns how many files were actually
    /// removed; a second call returns 0.
    pub fn release_all(&mut self) -> usize {
        let mut removed = 0;
        for path in self.staged.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to remove staged file"
                    );
                }
            }
        }
        removed
    }

    fn stage_named(&mut self, prefix: &str, suffix: &str, content: &[u8]) -> io::Result<PathBuf> {
        let mut file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(suffix)
            .tempfile_in(&self.dir)?;
        file.write_all(content)?;
        file.flush()?;

        // Registered before returning so a later failure still cleans it up
        let path = file.into_temp_path().keep()?;
        self.staged.push(path.clone());

        tracing::debug!(path = %path.display(), bytes = content.len(), "Staged input file");
        Ok(path)
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        if !self.staged.is_empty() {
            self.release_all();
        }
    }
}
