//! Error types for the ray engine.

use dualpol::DualpolError;
use radar_common::RadarError;
use thiserror::Error;

/// Errors raised while configuring or running the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration or algorithm construction failed; aborts the run.
    #[error("fatal configuration error: {0}")]
    FatalConfig(String),

    /// A required input field is absent from a ray.
    #[error("ray at elevation {elevation:.2} azimuth {azimuth:.2} is missing field '{field}'")]
    MissingField {
        field: String,
        elevation: f64,
        azimuth: f64,
    },

    /// A field's gate count disagrees with its ray.
    #[error("field '{field}' has {actual} gates, ray has {expected}")]
    GateCountMismatch {
        field: String,
        expected: usize,
        actual: usize,
    },

    /// The ray itself is malformed.
    #[error("invalid ray: {0}")]
    InvalidRay(String),

    /// The temperature profile could not be loaded.
    #[error("temperature profile load failed: {0}")]
    ProfileLoad(String),

    /// A worker panicked while processing a ray.
    #[error("worker {worker} panicked while processing a ray")]
    WorkerPanicked { worker: usize },

    /// The dispatcher ran out of workers with rays still outstanding.
    #[error("dispatch exhausted: {in_flight} rays in flight, {undispatched} not dispatched")]
    DispatchExhausted { in_flight: usize, undispatched: usize },

    /// An algorithm module failed on a ray.
    #[error("algorithm failed: {0}")]
    Algorithm(#[from] DualpolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl EngineError {
    pub fn fatal_config(msg: impl Into<String>) -> Self {
        Self::FatalConfig(msg.into())
    }

    pub fn profile_load(msg: impl Into<String>) -> Self {
        Self::ProfileLoad(msg.into())
    }

    pub fn missing_field(field: impl Into<String>, elevation: f64, azimuth: f64) -> Self {
        Self::MissingField {
            field: field.into(),
            elevation,
            azimuth,
        }
    }

    /// Whether this error only affects the ray that raised it.
    pub fn is_per_ray(&self) -> bool {
        matches!(
            self,
            Self::MissingField { .. }
                | Self::GateCountMismatch { .. }
                | Self::InvalidRay(_)
                | Self::Algorithm(_)
                | Self::WorkerPanicked { .. }
        )
    }
}

impl From<RadarError> for EngineError {
    fn from(err: RadarError) -> Self {
        match err {
            RadarError::GateCountMismatch {
                field,
                expected,
                actual,
            } => Self::GateCountMismatch {
                field,
                expected,
                actual,
            },
            other => Self::InvalidRay(other.to_string()),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
