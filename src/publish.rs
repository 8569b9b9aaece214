//! Result publishing boundary.
//!
//! The counterpart of [`crate::fetch`]: once an artifact is signed, some
//! store makes it publicly reachable. The crate ships a directory publisher;
//! object-storage adapters implement the same trait externally.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use crate::error::{PublishError, Result};

#[async_trait]
pub trait ResultPublisher: Send + Sync {
    /// Makes the artifact available and returns its public locator.
    async fn publish(&self, artifact: &Path, artifact_name: &str) -> Result<String>;
}

/// Copies artifacts under a directory and reports `{public_base}/{name}`.
pub struct DirectoryPublisher {
    root: PathBuf,
    public_base: String,
}

impl DirectoryPublisher {
    pub fn new(root: PathBuf, public_base: impl Into<String>) -> Self {
        Self {
            root,
            public_base: public_base.into(),
        }
    }
}

#[async_trait]
impl ResultPublisher for DirectoryPublisher {
    async fn publish(&self, artifact: &Path, artifact_name: &str) -> Result<String> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| PublishError::TargetUnavailable(e.to_string()))?;

        let target = self.root.join(artifact_name);
        tokio::fs::copy(artifact, &target)
            .await
            .map_err(|e| PublishError::Copy(e.to_string()))?;

        let locator = format!("{}/{}", self.public_base, artifact_name);
        info!(target = %target.display(), locator, "artifact published");
        Ok(locator)
    }
}
