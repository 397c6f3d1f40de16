//! Error types for the capture core.
//!
//! Command handlers wrap these in `anyhow` the same way they wrap everything
//! else; the variants exist so the orchestrator can tell contract misuse
//! (suppressed) apart from I/O and sensor failures (surfaced).

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the recording, export and orchestration layers.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("a recording session is already active")]
    AlreadyRecording,

    #[error("no recording session is active")]
    NotRecording,

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("session folder already exists: {0}")]
    DuplicateFolder(PathBuf),

    #[error("frame source failed: {0}")]
    FrameSource(#[from] FrameSourceError),

    #[error("encoding failed: {0}")]
    Encode(String),

    #[error("capture loop is not running")]
    CaptureLoopClosed,

    #[error("export cancelled")]
    Cancelled,

    #[error("background task failed: {0}")]
    Background(String),
}

impl CaptureError {
    /// Wraps an I/O error with the path it happened at.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// State-machine misuse that the UI is expected to prevent.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::AlreadyRecording | Self::NotRecording)
    }
}

/// A failure reported by the frame source.
///
/// Carries the same three human-readable fields a sensor session reports:
/// what happened, why, and what the operator can do about it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{description}")]
pub struct FrameSourceError {
    pub description: String,
    pub reason: Option<String>,
    pub suggestion: Option<String>,
    /// Whether restarting the source is expected to help
    pub recoverable: bool,
}

impl FrameSourceError {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            reason: None,
            suggestion: None,
            recoverable: true,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn fatal(mut self) -> Self {
        self.recoverable = false;
        self
    }

    /// Joins the present fields, one per line, for display in an alert.
    pub fn message(&self) -> String {
        [
            Some(self.description.as_str()),
            self.reason.as_deref(),
            self.suggestion.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join("\n")
    }
}

pub type Result<T> = std::result::Result<T, CaptureError>;
