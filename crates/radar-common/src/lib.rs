//! Common types shared across the dual-polarization ray engine crates.

pub mod error;
pub mod field;
pub mod output;
pub mod ray;
pub mod time;
pub mod volume;

pub use error::{RadarError, RadarResult};
pub use field::{RayField, MISSING, MISSING_F32};
pub use output::{OutputField, OutputRay};
pub use ray::{Ray, RayGeometry};
pub use time::{times_match, TIME_MATCH_TOLERANCE};
pub use volume::Volume;
