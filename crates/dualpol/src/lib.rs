//! Dual-polarization algorithm modules.
//!
//! The ray engine treats each algorithm as a black box behind a trait:
//!
//! - [`KdpEstimator`]: specific differential phase (direct and
//!   self-consistency variants) plus attenuation correction of DBZ/ZDR
//! - [`ParticleClassifier`]: per-gate particle category and interest
//! - [`RateEstimator`]: one precipitation-rate array per [`RateVariant`]
//!
//! Concrete analysers feed volume-level calibration and quality checks:
//!
//! - [`ZdrBiasLocator`]: ice and Bragg gates for ZDR bias estimation
//! - [`SelfConsistency`]: Z bias from rain runs
//! - [`RlanLocator`]: radio LAN interference flags
//!
//! Each trait ships with a reference implementation configured from a
//! serde parameter set, so the engine runs end to end out of the box.
//! Every array uses [`radar_common::MISSING`] for gates with no data.

pub mod bias;
pub mod error;
pub mod filters;
pub mod kdp;
pub mod pid;
pub mod precip;
pub mod rlan;
pub mod selfcon;

pub use bias::{
    ZdrBiasInputs, ZdrBiasLocator, ZdrBiasOutputs, ZdrBiasParams, ZdrRegion, ZdrRegionParams,
};
pub use error::{DualpolError, Result};
pub use kdp::{KdpEstimator, KdpFilter, KdpInputs, KdpOutputs, KdpParams};
pub use pid::{
    category, ClassThresholds, FuzzyPid, Membership, ParticleCategory, ParticleClassifier,
    PidInputs, PidOutputs, PidParams, PidWeights,
};
pub use precip::{PrecipInputs, PrecipOutputs, PrecipParams, PrecipRates, RateEstimator, RateVariant};
pub use rlan::{RlanInputs, RlanLocator, RlanOutputs, RlanParams};
pub use selfcon::{KdpRelation, SelfConInputs, SelfConParams, SelfConResult, SelfConsistency};

/// Check that an input slice covers `n_gates`.
pub(crate) fn check_len(name: &str, data: &[f64], n_gates: usize) -> Result<()> {
    if data.len() < n_gates {
        return Err(DualpolError::input_length(name, n_gates, data.len()));
    }
    Ok(())
}
