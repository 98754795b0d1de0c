//! Error types for ray and volume handling.

use thiserror::Error;

/// Result type alias using RadarError.
pub type RadarResult<T> = Result<T, RadarError>;

/// Errors raised while building or validating rays and volumes.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RadarError {
    #[error("Field '{field}' has {actual} gates, ray has {expected}")]
    GateCountMismatch {
        field: String,
        expected: usize,
        actual: usize,
    },

    #[error("Field already present in ray: {0}")]
    DuplicateField(String),

    #[error("Field not found in ray: {0}")]
    FieldNotFound(String),

    #[error("Invalid ray geometry: {0}")]
    InvalidGeometry(String),

    #[error("Failed to parse volume: {0}")]
    Parse(String),
}

impl RadarError {
    pub fn gate_count_mismatch(field: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::GateCountMismatch {
            field: field.into(),
            expected,
            actual,
        }
    }

    pub fn invalid_geometry(msg: impl Into<String>) -> Self {
        Self::InvalidGeometry(msg.into())
    }
}

impl From<serde_json::Error> for RadarError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}
