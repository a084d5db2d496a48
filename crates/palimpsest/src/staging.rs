//! Scratch staging for in-memory payloads.
//!
//! Recognition engines consume file paths, not byte slices, so every attempt
//! writes its payload into a process-scoped scratch directory and removes it
//! again before the attempt resolves. Artifact names are UUIDs so concurrent
//! tasks never collide.

use std::path::{Path, PathBuf};

use tokio::fs;
use uuid::Uuid;

use crate::error::{PalimpsestError, Result};

/// Writes payloads to a scratch directory and guarantees their removal.
#[derive(Debug, Clone)]
pub struct TempStorage {
    root: PathBuf,
}

impl TempStorage {
    /// Create an adapter rooted at `root`, or at a per-process directory
    /// under the system temp dir when `None`.
    ///
    /// The directory itself is created lazily on first `stage` call.
    pub fn new(root: Option<PathBuf>) -> Self {
        let root = root.unwrap_or_else(|| {
            std::env::temp_dir().join(format!("palimpsest-{}", std::process::id()))
        });
        Self { root }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.root
    }

    /// Write `bytes` to a uniquely named artifact and return its path.
    ///
    /// # Errors
    ///
    /// Surfaces [`PalimpsestError::Storage`] when the scratch directory cannot
    /// be created or written.
    pub async fn stage(&self, bytes: &[u8], extension: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.root).await.map_err(|err| {
            PalimpsestError::storage_with_source(
                format!("failed to create scratch directory '{}'", self.root.display()),
                err,
            )
        })?;

        let path = self.root.join(format!("{}.{extension}", Uuid::new_v4()));
        fs::write(&path, bytes).await.map_err(|err| {
            PalimpsestError::storage_with_source(
                format!("failed to write scratch artifact '{}'", path.display()),
                err,
            )
        })?;

        tracing::debug!(path = %path.display(), bytes = bytes.len(), "staged payload");
        Ok(path)
    }

    /// Remove a staged artifact. Idempotent: a missing file is not an error.
    pub async fn release(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "released scratch artifact");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(PalimpsestError::storage_with_source(
                format!("failed to remove scratch artifact '{}'", path.display()),
                err,
            )),
        }
    }

    /// Remove every artifact in the scratch directory.
    ///
    /// Used by the maintenance reset. A scratch directory that was never
    /// created is treated as already clean.
    pub async fn clear_scratch(&self) -> Result<()> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => {
                return Err(PalimpsestError::storage_with_source(
                    format!("failed to read scratch directory '{}'", self.root.display()),
                    err,
                ));
            }
        };

        let mut removed = 0usize;
        while let Some(entry) = entries.next_entry().await.map_err(|err| {
            PalimpsestError::storage_with_source("failed to enumerate scratch directory", err)
        })? {
            if fs::remove_file(entry.path()).await.is_ok() {
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!(removed, dir = %self.root.display(), "cleared scratch artifacts");
        }
        Ok(())
    }
}
