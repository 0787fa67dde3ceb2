//! On-disk storage for rendered reply audio

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use url::Url;
use uuid::Uuid;

use crate::{Error, Result};

/// URL path segment the audio directory is served under
pub const AUDIO_ROUTE: &str = "static";

const AUDIO_EXTENSION: &str = "mp3";

/// Stores audio artifacts under unique filenames in a served directory
#[derive(Debug, Clone)]
pub struct AudioStore {
    dir: PathBuf,
}

impl AudioStore {
    /// Open the store, creating the directory if needed
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            Error::AudioStore(format!("failed to create {}: {e}", dir.display()))
        })?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write audio bytes under a freshly generated `<uuid>.mp3` name
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub async fn save(&self, audio: &[u8]) -> Result<String> {
        let filename = format!("{}.{AUDIO_EXTENSION}", Uuid::new_v4());
        let path = self.dir.join(&filename);

        tokio::fs::write(&path, audio).await.map_err(|e| {
            Error::AudioStore(format!("failed to write {}: {e}", path.display()))
        })?;

        tracing::debug!(filename = %filename, bytes = audio.len(), "stored audio artifact");
        Ok(filename)
    }

    /// Public URL of an artifact relative to the server's base URL
    ///
    /// # Errors
    ///
    /// Returns error if the base URL cannot carry a path
    pub fn url_for(base: &Url, filename: &str) -> Result<Url> {
        let mut base = base.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(base.join(&format!("{AUDIO_ROUTE}/"))?.join(filename)?)
    }

    /// Delete artifacts last modified more than `max_age` before `now`
    ///
    /// Returns the number of files removed.
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be listed
    pub async fn purge_older_than(&self, max_age: Duration, now: SystemTime) -> Result<usize> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut removed = 0;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != AUDIO_EXTENSION) {
                continue;
            }

            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "cannot stat audio artifact");
                    continue;
                }
            };

            let age = now.duration_since(modified).unwrap_or_default();
            if age <= max_age {
                continue;
            }

            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to delete audio artifact");
                }
            }
        }

        Ok(removed)
    }
}
