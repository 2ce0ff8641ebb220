use std::{fmt, io};

use image::ImageError;
use machine_learning::MlErr;
use safetensors::SafeTensorError;

/// The result type used in the entire orchestrator.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// All errors that can occur in the orchestrator.
#[derive(Debug)]
pub enum OrchestratorError {
    /// Invalid configuration or file contents, caught before training.
    InvalidConfig(String),
    /// An underlying I/O error.
    Io(io::Error),
    /// A JSON file couldn't be read or written.
    Json(serde_json::Error),
    /// A safetensors file couldn't be read or written.
    SafeTensor(SafeTensorError),
    /// An image file couldn't be decoded or encoded.
    Image(ImageError),
    /// Training or inference failed.
    Ml(MlErr),
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Json(e) => write!(f, "json error: {e}"),
            Self::SafeTensor(e) => write!(f, "safetensors error: {e}"),
            Self::Image(e) => write!(f, "image error: {e}"),
            Self::Ml(e) => write!(f, "machine learning error: {e}"),
        }
    }
}

impl std::error::Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::SafeTensor(e) => Some(e),
            Self::Image(e) => Some(e),
            Self::Ml(e) => Some(e),
            Self::InvalidConfig(_) => None,
        }
    }
}

impl From<io::Error> for OrchestratorError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl From<SafeTensorError> for OrchestratorError {
    fn from(e: SafeTensorError) -> Self {
        Self::SafeTensor(e)
    }
}

impl From<ImageError> for OrchestratorError {
    fn from(e: ImageError) -> Self {
        Self::Image(e)
    }
}

impl From<MlErr> for OrchestratorError {
    fn from(e: MlErr) -> Self {
        Self::Ml(e)
    }
}
