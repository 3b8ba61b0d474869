//! Scratch directory for downloaded images awaiting upload.

use crate::error::ImageError;
use crate::mime::ImageFormat;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::sync::Mutex;
use uuid::Uuid;

const DIR_PREFIX: &str = "richtext-img-";

/// Owns a temporary directory that is created on first use and removed by
/// [`cleanup`](Self::cleanup) or on drop. A cleaned-up area is recreated the
/// next time it is written to.
#[derive(Debug)]
pub struct ScratchArea {
    base: Option<PathBuf>,
    dir: Mutex<Option<TempDir>>,
}

impl ScratchArea {
    /// Scratch area under the system temporary directory.
    pub fn new() -> Self {
        Self {
            base: None,
            dir: Mutex::new(None),
        }
    }

    /// Scratch area under `base`, which must already exist.
    pub fn in_dir(base: impl Into<PathBuf>) -> Self {
        Self {
            base: Some(base.into()),
            dir: Mutex::new(None),
        }
    }

    /// The scratch directory, creating it if needed. Concurrent first callers
    /// wait for a single creation.
    pub async fn path(&self) -> Result<PathBuf, ImageError> {
        let mut dir = self.dir.lock().await;
        if let Some(existing) = dir.as_ref() {
            return Ok(existing.path().to_path_buf());
        }

        let base = self.base.clone();
        let created = tokio::task::spawn_blocking(move || {
            let mut builder = tempfile::Builder::new();
            builder.prefix(DIR_PREFIX);
            match base {
                Some(base) => builder.tempdir_in(base),
                None => builder.tempdir(),
            }
        })
        .await
        .map_err(|e| ImageError::Storage(format!("scratch directory task failed: {}", e)))?
        .map_err(|e| ImageError::Storage(format!("failed to create scratch directory: {}", e)))?;

        tracing::debug!("Created scratch directory {}", created.path().display());
        let path = created.path().to_path_buf();
        *dir = Some(created);
        Ok(path)
    }

    /// The scratch directory if it currently exists.
    pub async fn current(&self) -> Option<PathBuf> {
        self.dir
            .lock()
            .await
            .as_ref()
            .map(|d| d.path().to_path_buf())
    }

    /// Remove the scratch directory and everything in it. Calling this more
    /// than once is harmless.
    pub async fn cleanup(&self) -> Result<(), ImageError> {
        let Some(dir) = self.dir.lock().await.take() else {
            return Ok(());
        };

        let path = dir.path().to_path_buf();
        tokio::task::spawn_blocking(move || dir.close())
            .await
            .map_err(|e| ImageError::Storage(format!("scratch cleanup task failed: {}", e)))?
            .map_err(|e| {
                ImageError::Storage(format!(
                    "failed to remove scratch directory {}: {}",
                    path.display(),
                    e
                ))
            })?;

        tracing::debug!("Removed scratch directory {}", path.display());
        Ok(())
    }

    /// Write `bytes` to a fresh file named `YYYY/MM/DD/<uuid>.<ext>`.
    ///
    /// The returned guard deletes the file when dropped, so a write or an
    /// upload abandoned midway leaves nothing behind.
    pub async fn write_image(&self, bytes: &[u8], format: ImageFormat) -> Result<ScratchFile, ImageError> {
        let root = self.path().await?;
        let dated = root.join(Utc::now().format("%Y/%m/%d").to_string());

        tokio::fs::create_dir_all(&dated)
            .await
            .map_err(|e| storage_error("create", &dated, e))?;

        let file = ScratchFile::new(dated.join(format!("{}.{}", Uuid::now_v7(), format.extension())));
        tokio::fs::write(file.path(), bytes)
            .await
            .map_err(|e| storage_error("write", file.path(), e))?;

        Ok(file)
    }
}

impl Default for ScratchArea {
    fn default() -> Self {
        Self::new()
    }
}

/// A file in the scratch area, deleted when the guard goes away.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
    removed: bool,
}

impl ScratchFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            removed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file now. Failures are logged, not returned.
    pub async fn remove(mut self) {
        self.removed = true;
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove scratch file {}: {}", self.path.display(), e);
            }
        }
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove scratch file {}: {}", self.path.display(), e);
            }
        }
    }
}

fn storage_error(action: &str, path: &Path, e: std::io::Error) -> ImageError {
    ImageError::Storage(format!("failed to {} {}: {}", action, path.display(), e))
}
