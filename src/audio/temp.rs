//! # Temporary Artifacts
//!
//! Every file the pipeline creates for a single request (the staged upload, the
//! normalized waveform) is owned by a [`TempArtifact`]. Dropping the guard deletes the
//! file, so early returns, `?` propagation and a dropped request future (client
//! disconnect) all run the same cleanup.

use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Owns a pipeline-created file and removes it when dropped.
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
    armed: bool,
}

impl TempArtifact {
    /// Reserve a unique path `<dir>/<prefix>_<uuid>.<extension>`.
    ///
    /// Nothing is created on disk; the guard only promises to remove whatever ends up
    /// at that path. Creating the guard before the file guarantees there is no window
    /// where a file exists without an owner.
    pub fn reserve(dir: &Path, prefix: &str, extension: &str) -> Self {
        let name = format!("{}_{}.{}", prefix, Uuid::new_v4().simple(), extension);
        Self {
            path: dir.join(name),
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the file now, reporting failures instead of only logging them.
    pub fn cleanup(mut self) -> io::Result<()> {
        self.armed = false;
        remove_if_exists(&self.path)
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = remove_if_exists(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove temporary file");
        }
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "Removed temporary file");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
