//! Error types for biomarker-flux

use crate::types::SessionStatus;
use thiserror::Error;

/// Errors that can occur while capturing or scoring a screening session
#[derive(Debug, Error)]
pub enum ScreeningError {
    #[error("Capture device unavailable: {0}")]
    CaptureDeviceUnavailable(String),

    #[error("Invalid task index: expected {expected}, got {actual}")]
    InvalidTaskIndex { expected: usize, actual: usize },

    #[error("Operation not valid while session is {status}")]
    NotReady { status: SessionStatus },

    #[error("A task is already capturing")]
    AlreadyRunning,

    #[error("Feature extraction failed: {0}")]
    FeatureExtractionFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown baseline key: {0}")]
    UnknownBaseline(String),

    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid TOML: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
