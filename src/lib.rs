//! TrueCopy: watermarking, encryption and digital signing for published
//! court filings.
//!
//! A filing goes through one pass: fetch into scratch, overlay the
//! authenticity watermark on every page, encrypt print-only, embed a
//! detached PKCS#7 signature and publish under a deterministic name. The
//! [`pipeline::Pipeline`] orchestrates the pass behind a bounded concurrency
//! gate and guarantees scratch cleanup on every path.

pub mod config;
pub mod error;
pub mod fetch;
pub mod gate;
pub mod pipeline;
pub mod publish;
pub mod scratch;
pub mod security;
pub mod signing;
pub mod types;
pub mod watermark;

pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use pipeline::Pipeline;
pub use types::{RequestStatus, SigningRequest, SigningResult, SourceLocator};
