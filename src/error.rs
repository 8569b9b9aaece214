//! Error types for the TrueCopy signing pipeline.

use std::{io, result::Result as StdResult};

use thiserror::Error;

/// Custom result type for signing pipeline operations
pub type Result<T> = StdResult<T, Error>;

/// Core error type for the signing pipeline.
///
/// Each pipeline stage maps to exactly one variant so that a failed
/// [`SigningResult`](crate::types::SigningResult) can always name the stage
/// that produced it.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Document read error: {0}")]
    DocumentRead(#[from] DocumentReadError),

    #[error("Chain build error: {0}")]
    ChainBuild(#[from] ChainBuildError),

    #[error("Signing error: {0}")]
    Signing(#[from] SigningError),

    #[error("Encryption error: {0}")]
    Encryption(#[from] EncryptionError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Gate acquisition timed out after {0} ms")]
    GateTimeout(u64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Short stage tag for result reporting and logs.
    pub fn stage_tag(&self) -> &'static str {
        match self {
            Error::Fetch(_) => "fetch",
            Error::DocumentRead(_) => "document_read",
            Error::ChainBuild(_) => "chain_build",
            Error::Signing(_) => "signing",
            Error::Encryption(_) => "encryption",
            Error::Publish(_) => "publish",
            Error::GateTimeout(_) => "gate_timeout",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
        }
    }
}

// -------------------- Stage error categories --------------------

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FetchError {
    #[error("Source not found: {0}")]
    NotFound(String),

    #[error("Unsupported source locator: {0}")]
    UnsupportedLocator(String),

    #[error("Transfer failed: {0}")]
    Transfer(String),
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DocumentReadError {
    #[error("Not a parseable PDF: {0}")]
    Malformed(String),

    #[error("Document has no pages")]
    NoPages,

    #[error("Page {0} is missing a usable MediaBox")]
    MissingMediaBox(u32),
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ChainBuildError {
    #[error("Chain construction produced no certificates")]
    EmptyChain,

    #[error("Issuer lookup failed: {0}")]
    IssuerLookup(String),

    #[error("Revocation checking requested but no CRL source is configured")]
    RevocationUnavailable,
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SigningError {
    #[error("Signing material unavailable: {0}")]
    MaterialUnavailable(String),

    #[error("PKCS#7 generation failed: {0}")]
    Pkcs7(String),

    #[error("Signature of {got} bytes exceeds the reserved {capacity} bytes")]
    SignatureTooLarge { got: usize, capacity: usize },

    #[error("Serialized file lacks the expected placeholder: {0}")]
    PlaceholderMissing(String),
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EncryptionError {
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Cipher operation failed: {0}")]
    Cipher(String),

    #[error("Encryption requires a non-empty owner password")]
    MissingOwnerPassword,
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PublishError {
    #[error("Publish target unavailable: {0}")]
    TargetUnavailable(String),

    #[error("Artifact copy failed: {0}")]
    Copy(String),
}

/// Non-fatal cleanup problem.
///
/// Cleanup failures are logged and carried alongside the primary outcome,
/// never in place of it.
#[derive(Error, Debug)]
#[error("Cleanup of {path} failed: {reason}")]
pub struct CleanupWarning {
    pub path: String,
    pub reason: String,
}
