//! Request and result types shared across the pipeline.

use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a source document lives.
///
/// The core ships a filesystem fetcher only; URL locators are recognized so
/// callers can route them to an external fetch adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceLocator {
    Path(PathBuf),
    Url(String),
}

impl FromStr for SourceLocator {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with("http://") || s.starts_with("https://") {
            Ok(SourceLocator::Url(s.to_string()))
        } else {
            Ok(SourceLocator::Path(PathBuf::from(s)))
        }
    }
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocator::Path(p) => write!(f, "{}", p.display()),
            SourceLocator::Url(u) => write!(f, "{}", u),
        }
    }
}

/// A single filing to watermark, encrypt, sign and publish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningRequest {
    pub id: String,
    pub source: SourceLocator,
    pub case_reference: String,
    pub document_reference: String,
}

impl SigningRequest {
    pub fn new(source: SourceLocator, case_reference: &str, document_reference: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source,
            case_reference: case_reference.to_string(),
            document_reference: document_reference.to_string(),
        }
    }

    /// Output filename, derived from the request alone so reprocessing the
    /// same filing always produces the same name.
    pub fn artifact_name(&self) -> String {
        format!(
            "{}-orderno-{}.pdf",
            self.case_reference, self.document_reference
        )
    }
}

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStage {
    Queued,
    Fetching,
    Rendering,
    Signing,
    Publishing,
    Completed,
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Queued => "queued",
            PipelineStage::Fetching => "fetching",
            PipelineStage::Rendering => "rendering",
            PipelineStage::Signing => "signing",
            PipelineStage::Publishing => "publishing",
            PipelineStage::Completed => "completed",
            PipelineStage::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Terminal status of a processed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    Completed,
    /// Carries the tag of the stage error that stopped the pipeline.
    Failed { stage: String, message: String },
}

impl RequestStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, RequestStatus::Completed)
    }
}

/// Outcome record for one request. Always produced, success or failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningResult {
    pub request_id: String,
    pub status: RequestStatus,
    /// Public locator of the published artifact; `None` on failure.
    pub output_locator: Option<String>,
    pub processed_at: DateTime<Utc>,
    pub processing_time: Duration,
}

/// Geometry of one source page, read from the document and never mutated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub index: u32,
    pub width: f64,
    pub height: f64,
}
