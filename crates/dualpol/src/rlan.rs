//! Radio LAN interference location.
//!
//! Interference from wireless networks shows up as a return with random
//! Doppler phase, low coherence and a steady SNR and ZDR along the ray.
//! Kernel statistics over those signatures are combined as fuzzy interest
//! and the gate is flagged when the interest clears a threshold.

use radar_common::{RayGeometry, MISSING};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{DualpolError, Result};
use crate::filters::{is_missing, window};
use crate::pid::Membership;

/// Parameters for [`RlanLocator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RlanParams {
    /// Gates in the statistics kernel
    pub n_gates_kernel: usize,
    /// Kernel mode of SNR must reach this before a gate is considered (dB)
    pub min_snr: f64,
    pub interest_threshold: f64,
    /// Mean |gate-to-gate phase change| (deg)
    pub phase_change_error: Membership,
    pub ncp_mean: Membership,
    /// Mean deviation from the kernel mode (dB)
    pub snr_dmode: Membership,
    pub zdr_dmode: Membership,
    pub phase_change_error_weight: f64,
    pub ncp_mean_weight: f64,
    pub snr_dmode_weight: f64,
    pub zdr_dmode_weight: f64,
}

impl Default for RlanParams {
    fn default() -> Self {
        Self {
            n_gates_kernel: 9,
            min_snr: 3.0,
            interest_threshold: 0.55,
            phase_change_error: Membership::new(40.0, 60.0, 180.0, 181.0),
            ncp_mean: Membership::new(-1.0, -0.5, 0.1, 0.2),
            snr_dmode: Membership::new(-1.0, -0.5, 1.5, 3.0),
            zdr_dmode: Membership::new(-1.0, -0.5, 1.5, 3.0),
            phase_change_error_weight: 1.0,
            ncp_mean_weight: 1.0,
            snr_dmode_weight: 0.5,
            zdr_dmode_weight: 0.5,
        }
    }
}

impl RlanParams {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.n_gates_kernel < 3 {
            return Err("rlan.n_gates_kernel must be at least 3".to_string());
        }
        if !(0.0..=1.0).contains(&self.interest_threshold) {
            return Err(format!(
                "rlan.interest_threshold {} outside [0, 1]",
                self.interest_threshold
            ));
        }
        for (name, w) in [
            ("phase_change_error_weight", self.phase_change_error_weight),
            ("ncp_mean_weight", self.ncp_mean_weight),
            ("snr_dmode_weight", self.snr_dmode_weight),
            ("zdr_dmode_weight", self.zdr_dmode_weight),
        ] {
            if !(w >= 0.0) {
                return Err(format!("rlan.{name} must be non-negative"));
            }
        }
        Ok(())
    }
}

/// Per-gate inputs for one ray, all normalised to [`MISSING`].
#[derive(Debug, Clone, Copy)]
pub struct RlanInputs<'a> {
    pub geometry: RayGeometry,
    pub nyquist_mps: f64,
    pub snr: &'a [f64],
    pub zdr: &'a [f64],
    pub vel: &'a [f64],
    /// Normalised coherent power, when the ray carries it
    pub ncp: Option<&'a [f64]>,
}

/// Kernel statistics and the resulting flag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RlanOutputs {
    /// Doppler phase (deg)
    pub phase: Vec<f64>,
    pub phase_change_error: Vec<f64>,
    /// Kernel median, used as the mode estimate
    pub snr_mode: Vec<f64>,
    pub snr_dmode: Vec<f64>,
    pub zdr_mode: Vec<f64>,
    pub zdr_dmode: Vec<f64>,
    pub ncp_mean: Vec<f64>,
    pub interest: Vec<f64>,
    pub flag: Vec<bool>,
}

impl RlanOutputs {
    pub fn reset(&mut self, n_gates: usize) {
        for v in [
            &mut self.phase,
            &mut self.phase_change_error,
            &mut self.snr_mode,
            &mut self.snr_dmode,
            &mut self.zdr_mode,
            &mut self.zdr_dmode,
            &mut self.ncp_mean,
            &mut self.interest,
        ] {
            v.clear();
            v.resize(n_gates, MISSING);
        }
        self.flag.clear();
        self.flag.resize(n_gates, false);
    }

    /// Number of flagged gates.
    pub fn flagged(&self) -> usize {
        self.flag.iter().filter(|f| **f).count()
    }
}

/// Locates interference on one ray at a time.
#[derive(Debug, Clone)]
pub struct RlanLocator {
    params: RlanParams,
    work: Vec<f64>,
}

impl RlanLocator {
    pub fn new(params: RlanParams) -> Result<Self> {
        params.validate().map_err(DualpolError::InvalidParams)?;
        Ok(Self {
            params,
            work: Vec::new(),
        })
    }

    pub fn params(&self) -> &RlanParams {
        &self.params
    }

    pub fn locate(&mut self, inputs: &RlanInputs<'_>, out: &mut RlanOutputs) -> Result<()> {
        let n = inputs.geometry.n_gates;
        for (name, data) in [("snr", inputs.snr), ("zdr", inputs.zdr), ("vel", inputs.vel)] {
            crate::check_len(name, data, n)?;
        }
        if let Some(ncp) = inputs.ncp {
            crate::check_len("ncp", ncp, n)?;
        }
        out.reset(n);
        if !(inputs.nyquist_mps > 0.0) {
            trace!(
                azimuth = inputs.geometry.azimuth_deg,
                "No Nyquist velocity, interference not located"
            );
            return Ok(());
        }

        for i in 0..n {
            let vel = inputs.vel[i];
            if !is_missing(vel) {
                out.phase[i] = vel / inputs.nyquist_mps * 180.0;
            }
        }

        let len = self.params.n_gates_kernel;
        for i in 0..n {
            let (lo, hi) = window(i, len, n);
            out.phase_change_error[i] = phase_change_error(&out.phase[lo..hi]);
            (out.snr_mode[i], out.snr_dmode[i]) = mode_and_deviation(&inputs.snr[lo..hi], &mut self.work);
            (out.zdr_mode[i], out.zdr_dmode[i]) = mode_and_deviation(&inputs.zdr[lo..hi], &mut self.work);
            if let Some(ncp) = inputs.ncp {
                out.ncp_mean[i] = mean(&ncp[lo..hi]);
            }
        }

        let p = &self.params;
        for i in 0..n {
            let snr_mode = out.snr_mode[i];
            if is_missing(inputs.snr[i]) || is_missing(snr_mode) || snr_mode < p.min_snr {
                continue;
            }
            let mut sum = 0.0;
            let mut weights = 0.0;
            for (value, membership, weight) in [
                (out.phase_change_error[i], &p.phase_change_error, p.phase_change_error_weight),
                (out.ncp_mean[i], &p.ncp_mean, p.ncp_mean_weight),
                (out.snr_dmode[i], &p.snr_dmode, p.snr_dmode_weight),
                (out.zdr_dmode[i], &p.zdr_dmode, p.zdr_dmode_weight),
            ] {
                if !is_missing(value) {
                    sum += weight * membership.interest(value);
                    weights += weight;
                }
            }
            if weights > 0.0 {
                let interest = sum / weights;
                out.interest[i] = interest;
                out.flag[i] = interest >= p.interest_threshold;
            }
        }
        Ok(())
    }
}

/// Mean |phase change| between neighbouring gates, folded into [0, 180].
fn phase_change_error(phase: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for pair in phase.windows(2) {
        if is_missing(pair[0]) || is_missing(pair[1]) {
            continue;
        }
        let mut diff = (pair[1] - pair[0]).abs() % 360.0;
        if diff > 180.0 {
            diff = 360.0 - diff;
        }
        sum += diff;
        count += 1;
    }
    if count < 2 {
        MISSING
    } else {
        sum / count as f64
    }
}

fn mode_and_deviation(data: &[f64], work: &mut Vec<f64>) -> (f64, f64) {
    work.clear();
    work.extend(data.iter().copied().filter(|v| !is_missing(*v)));
    if work.len() < 3 {
        return (MISSING, MISSING);
    }
    work.sort_by(|a, b| a.total_cmp(b));
    let mode = work[work.len() / 2];
    let deviation = work.iter().map(|v| (v - mode).abs()).sum::<f64>() / work.len() as f64;
    (mode, deviation)
}

fn mean(data: &[f64]) -> f64 {
    let (sum, count) = data
        .iter()
        .filter(|v| !is_missing(**v))
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        MISSING
    } else {
        sum / count as f64
    }
}
