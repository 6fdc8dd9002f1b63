//! Ephemeral Artifact Management
//!
//! Request-scoped temp files (the uploaded image and staged copies of
//! bundled scripts). Each file is uniquely named, owned by exactly one
//! request, and deleted when released or dropped, so every exit path of
//! the owning operation cleans up.

use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing::{debug, warn};

use crate::error::{PredictError, Result};
use crate::metrics;

const IMAGE_PREFIX: &str = "crop_image_";
const IMAGE_SUFFIX: &str = ".jpg";
const SCRIPT_PREFIX: &str = "staged_script_";

/// Creates ephemeral files inside a single directory
#[derive(Debug, Clone)]
pub struct ArtifactManager {
    dir: PathBuf,
}

impl Default for ArtifactManager {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

impl ArtifactManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create an empty, uniquely named file
    pub fn acquire(&self, prefix: &str, suffix: &str) -> Result<EphemeralFile> {
        let file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(suffix)
            .tempfile_in(&self.dir)
            .map_err(|e| PredictError::artifact("create temp file", e))?;

        // Close the handle; only the path is needed from here on
        Ok(EphemeralFile::track(file.into_temp_path()))
    }

    /// Persist uploaded image bytes to a fresh temp file
    pub async fn persist_image(&self, bytes: &[u8]) -> Result<EphemeralFile> {
        let file = self.acquire(IMAGE_PREFIX, IMAGE_SUFFIX)?;
        tokio::fs::write(file.path(), bytes)
            .await
            .map_err(|e| PredictError::artifact("write image", e))?;

        debug!(path = %file.path().display(), bytes = bytes.len(), "Persisted uploaded image");
        Ok(file)
    }

    /// Copy embedded script contents to a temp file so it can be executed by path
    pub async fn stage_script(&self, name: &str, contents: &str) -> Result<EphemeralFile> {
        let suffix = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default();

        let file = self.acquire(SCRIPT_PREFIX, &suffix)?;
        tokio::fs::write(file.path(), contents)
            .await
            .map_err(|e| PredictError::artifact("stage script", e))?;

        debug!(script = %name, path = %file.path().display(), "Staged bundled script");
        Ok(file)
    }
}

/// A temp file owned by one request.
///
/// Deleted by [`EphemeralFile::release`] or, failing that, on drop.
#[derive(Debug)]
pub struct EphemeralFile {
    path: Option<TempPath>,
    location: PathBuf,
}

impl EphemeralFile {
    fn track(path: TempPath) -> Self {
        metrics::EPHEMERAL_ARTIFACTS_LIVE.inc();
        let location = path.to_path_buf();
        Self {
            path: Some(path),
            location,
        }
    }

    pub fn path(&self) -> &Path {
        &self.location
    }

    pub fn is_released(&self) -> bool {
        self.path.is_none()
    }

    /// Delete the file. Idempotent: a second call, or a file that was
    /// already removed externally, is not an error.
    pub fn release(&mut self) -> io::Result<()> {
        let Some(path) = self.path.take() else {
            return Ok(());
        };
        metrics::EPHEMERAL_ARTIFACTS_LIVE.dec();

        match path.close() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for EphemeralFile {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(path = %self.location.display(), error = %e, "Failed to delete ephemeral file");
        }
    }
}

/// Where the inference script lives for one request.
///
/// Provenance is carried by the variant: only `Staged` files were created
/// here and are deleted; a `Provided` path belongs to the operator.
#[derive(Debug)]
pub enum ScriptLocation {
    Staged(EphemeralFile),
    Provided(PathBuf),
}

impl ScriptLocation {
    pub fn path(&self) -> &Path {
        match self {
            ScriptLocation::Staged(file) => file.path(),
            ScriptLocation::Provided(path) => path,
        }
    }

    pub fn release(&mut self) -> io::Result<()> {
        match self {
            ScriptLocation::Staged(file) => file.release(),
            ScriptLocation::Provided(_) => Ok(()),
        }
    }
}
