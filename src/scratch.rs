//! Per-request scratch directories.
//!
//! Every request works inside its own directory under the configured scratch
//! root. The directory lives for exactly one request and is removed on every
//! exit path; a `Drop` backstop covers early returns and panics in callers
//! that never reach the explicit destroy.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{CleanupWarning, Result};

#[derive(Debug)]
pub struct ScratchSpace {
    path: PathBuf,
    destroyed: bool,
}

impl ScratchSpace {
    /// Creates an isolated directory for one request under `root`.
    pub async fn create(root: &Path, request_id: &str) -> Result<Self> {
        let path = root.join(request_id);
        tokio::fs::create_dir_all(&path).await?;
        debug!(path = %path.display(), "scratch space created");
        Ok(Self {
            path,
            destroyed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the directory and everything in it.
    ///
    /// Failure is reported as a [`CleanupWarning`] so the caller can log it
    /// without displacing the request's primary outcome.
    pub async fn destroy(mut self) -> std::result::Result<(), CleanupWarning> {
        self.destroyed = true;
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "scratch space destroyed");
                Ok(())
            }
            Err(e) => Err(CleanupWarning {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

impl Drop for ScratchSpace {
    fn drop(&mut self) {
        if !self.destroyed {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                warn!(path = %self.path.display(), error = %e, "scratch cleanup in drop failed");
            }
        }
    }
}
