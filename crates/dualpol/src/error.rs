//! Error types for the algorithm modules.

use thiserror::Error;

/// Errors raised by the algorithm modules.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DualpolError {
    /// Parameters rejected at construction time.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// An input array is shorter than the ray.
    #[error("input '{name}' has {actual} values, expected at least {expected}")]
    InputLength {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// The computation could not be carried out for this ray.
    #[error("computation failed: {0}")]
    Compute(String),
}

impl DualpolError {
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::InvalidParams(msg.into())
    }

    pub fn input_length(name: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::InputLength {
            name: name.into(),
            expected,
            actual,
        }
    }
}

/// Result type for algorithm operations.
pub type Result<T> = std::result::Result<T, DualpolError>;
