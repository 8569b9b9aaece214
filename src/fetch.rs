//! Document fetching boundary.
//!
//! Filings may live on local disk, on an HTTP endpoint or in a queue
//! payload; the pipeline only cares that the bytes land in scratch. The
//! trait is the seam for external adapters, and the crate ships the
//! filesystem implementation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::{
    error::{FetchError, Result},
    types::SourceLocator,
};

#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    /// Copies the source document into `scratch` and returns the local path.
    async fn fetch(&self, source: &SourceLocator, scratch: &Path) -> Result<PathBuf>;
}

/// Filesystem fetcher. URL locators belong to an external adapter and are
/// rejected here rather than half-handled.
pub struct LocalFetcher;

#[async_trait]
impl DocumentFetcher for LocalFetcher {
    async fn fetch(&self, source: &SourceLocator, scratch: &Path) -> Result<PathBuf> {
        let path = match source {
            SourceLocator::Path(path) => path,
            SourceLocator::Url(url) => {
                return Err(FetchError::UnsupportedLocator(url.clone()).into());
            }
        };

        match tokio::fs::try_exists(path).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(FetchError::NotFound(path.display().to_string()).into());
            }
            Err(e) => {
                return Err(FetchError::Transfer(e.to_string()).into());
            }
        }

        let target = scratch.join("source.pdf");
        tokio::fs::copy(path, &target)
            .await
            .map_err(|e| FetchError::Transfer(e.to_string()))?;
        debug!(source = %path.display(), target = %target.display(), "document fetched");
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_fetch_copies_into_scratch() {
        let dir = std::env::temp_dir().join("truecopy-fetch-copy");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let source = dir.join("filing.pdf");
        tokio::fs::write(&source, b"%PDF-1.5 stub").await.unwrap();

        let fetched = LocalFetcher
            .fetch(&SourceLocator::Path(source.clone()), &dir)
            .await
            .unwrap();
        assert_eq!(
            tokio::fs::read(&fetched).await.unwrap(),
            b"%PDF-1.5 stub"
        );
        assert_ne!(fetched, source);
    }

    #[tokio::test]
    async fn missing_source_is_a_fetch_error() {
        let dir = std::env::temp_dir().join("truecopy-fetch-missing");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let result = LocalFetcher
            .fetch(
                &SourceLocator::Path(PathBuf::from("/definitely/not/here.pdf")),
                &dir,
            )
            .await;
        assert!(matches!(
            result,
            Err(crate::error::Error::Fetch(FetchError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn unreadable_path_is_a_transfer_error_not_a_missing_filing() {
        let dir = std::env::temp_dir().join("truecopy-fetch-unreadable");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let blocker = dir.join("blocker");
        tokio::fs::write(&blocker, b"a regular file").await.unwrap();

        // Traversing through a regular file fails with NotADirectory, which
        // must not be reported as a missing filing.
        let result = LocalFetcher
            .fetch(&SourceLocator::Path(blocker.join("filing.pdf")), &dir)
            .await;
        assert!(matches!(
            result,
            Err(crate::error::Error::Fetch(FetchError::Transfer(_)))
        ));
    }

    #[tokio::test]
    async fn url_locators_are_rejected() {
        let dir = std::env::temp_dir().join("truecopy-fetch-url");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let result = LocalFetcher
            .fetch(
                &SourceLocator::Url("https://filings.example/doc.pdf".into()),
                &dir,
            )
            .await;
        assert!(matches!(
            result,
            Err(crate::error::Error::Fetch(FetchError::UnsupportedLocator(_)))
        ));
    }
}
