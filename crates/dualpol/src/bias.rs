//! Per-ray gate selection for ZDR bias estimation.
//!
//! Two regions are looked for along each ray: dry ice aloft and clear-air
//! Bragg scattering. Both should show an intrinsic ZDR near zero, so the
//! mean measured ZDR over many selected gates estimates the system bias.
//! This module only selects gates; reduction to volume statistics happens
//! once every ray is harvested.

use radar_common::{RayGeometry, MISSING};
use serde::{Deserialize, Serialize};

use crate::error::{DualpolError, Result};
use crate::filters::{is_missing, remove_short_runs};
use crate::pid::category;

/// Gate criteria for one scattering region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZdrRegionParams {
    pub min_elevation_deg: f64,
    pub max_elevation_deg: f64,
    pub min_range_km: f64,
    pub max_range_km: f64,
    pub min_dbz: f64,
    pub max_dbz: f64,
    pub min_snr: f64,
    pub max_snr: f64,
    pub min_temp_c: f64,
    pub max_temp_c: f64,
    /// Require the gate's PID category to be one of `pid_types`
    pub check_pid: bool,
    pub pid_types: Vec<i32>,
    /// Shortest run of consecutive selected gates that is kept
    pub min_gate_run: usize,
    /// Statistics are only reported above this many samples per volume
    pub min_npoints_valid: usize,
    /// Percentiles reported for the volume
    pub percentiles: Vec<f64>,
}

impl ZdrRegionParams {
    /// Dry snow and ice crystals well above the melting layer.
    pub fn ice() -> Self {
        Self {
            min_elevation_deg: 0.0,
            max_elevation_deg: 90.0,
            min_range_km: 5.0,
            max_range_km: 150.0,
            min_dbz: 0.0,
            max_dbz: 30.0,
            min_snr: 15.0,
            max_snr: 100.0,
            min_temp_c: -40.0,
            max_temp_c: -5.0,
            check_pid: true,
            pid_types: vec![category::DRY_SNOW, category::ICE_CRYSTALS],
            min_gate_run: 5,
            min_npoints_valid: 100,
            percentiles: default_percentiles(),
        }
    }

    /// Clear-air returns in the boundary layer.
    pub fn bragg() -> Self {
        Self {
            min_elevation_deg: 2.0,
            max_elevation_deg: 10.0,
            min_range_km: 2.0,
            max_range_km: 15.0,
            min_dbz: -10.0,
            max_dbz: 15.0,
            min_snr: 10.0,
            max_snr: 100.0,
            min_temp_c: 0.0,
            max_temp_c: 50.0,
            check_pid: false,
            pid_types: vec![category::CLOUD],
            min_gate_run: 5,
            min_npoints_valid: 100,
            percentiles: default_percentiles(),
        }
    }

    fn validate(&self, name: &str) -> std::result::Result<(), String> {
        for (what, lo, hi) in [
            ("elevation", self.min_elevation_deg, self.max_elevation_deg),
            ("range", self.min_range_km, self.max_range_km),
            ("dbz", self.min_dbz, self.max_dbz),
            ("snr", self.min_snr, self.max_snr),
            ("temp", self.min_temp_c, self.max_temp_c),
        ] {
            if !(lo <= hi) {
                return Err(format!("zdr_bias.{name} {what} range [{lo}, {hi}] is empty"));
            }
        }
        if self.min_gate_run == 0 {
            return Err(format!("zdr_bias.{name}.min_gate_run must be at least 1"));
        }
        if let Some(p) = self.percentiles.iter().find(|p| !(0.0..=100.0).contains(*p)) {
            return Err(format!("zdr_bias.{name} percentile {p} outside [0, 100]"));
        }
        Ok(())
    }

    fn elevation_ok(&self, elevation_deg: f64) -> bool {
        elevation_deg >= self.min_elevation_deg && elevation_deg <= self.max_elevation_deg
    }
}

fn default_percentiles() -> Vec<f64> {
    vec![10.0, 25.0, 50.0, 75.0, 90.0]
}

/// Parameters for [`ZdrBiasLocator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZdrBiasParams {
    /// Gates with |ZDR| above this are never selected (dB)
    pub max_abs_zdr: f64,
    pub max_abs_zdrm: f64,
    pub min_rhohv_nnc: f64,
    /// Drops near-zero velocity returns such as clutter (m/s)
    pub min_abs_vel: f64,
    /// Limits differential attenuation along the path (deg)
    pub max_phidp_accum: f64,
    pub max_abs_kdp: f64,
    #[serde(default = "ZdrRegionParams::ice")]
    pub ice: ZdrRegionParams,
    #[serde(default = "ZdrRegionParams::bragg")]
    pub bragg: ZdrRegionParams,
}

impl Default for ZdrBiasParams {
    fn default() -> Self {
        Self {
            max_abs_zdr: 2.0,
            max_abs_zdrm: 2.0,
            min_rhohv_nnc: 0.95,
            min_abs_vel: 1.0,
            max_phidp_accum: 25.0,
            max_abs_kdp: 0.25,
            ice: ZdrRegionParams::ice(),
            bragg: ZdrRegionParams::bragg(),
        }
    }
}

impl ZdrBiasParams {
    pub fn validate(&self) -> std::result::Result<(), String> {
        for (name, v) in [
            ("max_abs_zdr", self.max_abs_zdr),
            ("max_abs_zdrm", self.max_abs_zdrm),
            ("max_abs_kdp", self.max_abs_kdp),
        ] {
            if !(v > 0.0) {
                return Err(format!("zdr_bias.{name} must be positive"));
            }
        }
        self.ice.validate("ice")?;
        self.bragg.validate("bragg")
    }
}

/// Scattering region a gate was selected for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZdrRegion {
    Ice,
    Bragg,
}

/// Per-gate inputs for one ray, all normalised to [`MISSING`].
#[derive(Debug, Clone, Copy)]
pub struct ZdrBiasInputs<'a> {
    pub geometry: RayGeometry,
    pub snr: &'a [f64],
    pub dbz: &'a [f64],
    pub zdr: &'a [f64],
    /// ZDR before any correction
    pub zdrm: &'a [f64],
    /// RHOHV without noise correction
    pub rhohv_nnc: &'a [f64],
    pub vel: &'a [f64],
    pub kdp: &'a [f64],
    pub phidp_accum: &'a [f64],
    pub temp_c: &'a [f64],
    pub pid: &'a [i32],
}

/// ZDR and ZDRM at the selected gates, [`MISSING`] elsewhere.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZdrBiasOutputs {
    pub zdr_in_ice: Vec<f64>,
    pub zdrm_in_ice: Vec<f64>,
    pub zdr_in_bragg: Vec<f64>,
    pub zdrm_in_bragg: Vec<f64>,
}

impl ZdrBiasOutputs {
    pub fn reset(&mut self, n_gates: usize) {
        for v in [
            &mut self.zdr_in_ice,
            &mut self.zdrm_in_ice,
            &mut self.zdr_in_bragg,
            &mut self.zdrm_in_bragg,
        ] {
            v.clear();
            v.resize(n_gates, MISSING);
        }
    }

    /// Selected `(zdr, zdrm)` arrays for `region`.
    pub fn region(&self, region: ZdrRegion) -> (&[f64], &[f64]) {
        match region {
            ZdrRegion::Ice => (self.zdr_in_ice.as_slice(), self.zdrm_in_ice.as_slice()),
            ZdrRegion::Bragg => (self.zdr_in_bragg.as_slice(), self.zdrm_in_bragg.as_slice()),
        }
    }

    fn region_mut(&mut self, region: ZdrRegion) -> (&mut [f64], &mut [f64]) {
        match region {
            ZdrRegion::Ice => (self.zdr_in_ice.as_mut_slice(), self.zdrm_in_ice.as_mut_slice()),
            ZdrRegion::Bragg => (
                self.zdr_in_bragg.as_mut_slice(),
                self.zdrm_in_bragg.as_mut_slice(),
            ),
        }
    }
}

/// Selects ice and Bragg gates on one ray at a time.
#[derive(Debug, Clone)]
pub struct ZdrBiasLocator {
    params: ZdrBiasParams,
    flags: Vec<bool>,
}

impl ZdrBiasLocator {
    pub fn new(params: ZdrBiasParams) -> Result<Self> {
        params.validate().map_err(DualpolError::InvalidParams)?;
        Ok(Self {
            params,
            flags: Vec::new(),
        })
    }

    pub fn params(&self) -> &ZdrBiasParams {
        &self.params
    }

    /// Fill the arrays of `region` in `out`; the other region is untouched.
    ///
    /// `out` must already be sized with [`ZdrBiasOutputs::reset`].
    pub fn locate(
        &mut self,
        region: ZdrRegion,
        inputs: &ZdrBiasInputs<'_>,
        out: &mut ZdrBiasOutputs,
    ) -> Result<()> {
        let n = inputs.geometry.n_gates;
        for (name, data) in [
            ("snr", inputs.snr),
            ("dbz", inputs.dbz),
            ("zdr", inputs.zdr),
            ("zdrm", inputs.zdrm),
            ("rhohv_nnc", inputs.rhohv_nnc),
            ("vel", inputs.vel),
            ("kdp", inputs.kdp),
            ("phidp_accum", inputs.phidp_accum),
            ("temp", inputs.temp_c),
        ] {
            crate::check_len(name, data, n)?;
        }
        if inputs.pid.len() < n {
            return Err(DualpolError::input_length("pid", n, inputs.pid.len()));
        }

        let params = &self.params;
        let region_params = match region {
            ZdrRegion::Ice => &params.ice,
            ZdrRegion::Bragg => &params.bragg,
        };
        let (zdr_out, zdrm_out) = out.region_mut(region);
        if zdr_out.len() < n || zdrm_out.len() < n {
            return Err(DualpolError::input_length("zdr bias outputs", n, zdr_out.len()));
        }
        if !region_params.elevation_ok(inputs.geometry.elevation_deg) {
            return Ok(());
        }

        self.flags.clear();
        self.flags
            .extend((0..n).map(|i| gate_selected(params, region, region_params, inputs, i)));
        remove_short_runs(&mut self.flags, region_params.min_gate_run);

        for (i, &selected) in self.flags.iter().enumerate() {
            if selected {
                zdr_out[i] = inputs.zdr[i];
                zdrm_out[i] = inputs.zdrm[i];
            }
        }
        Ok(())
    }
}

fn within(v: f64, lo: f64, hi: f64) -> bool {
    !is_missing(v) && v >= lo && v <= hi
}

fn gate_selected(
    p: &ZdrBiasParams,
    region: ZdrRegion,
    r: &ZdrRegionParams,
    inputs: &ZdrBiasInputs<'_>,
    i: usize,
) -> bool {
    let range = inputs.geometry.range_km(i);
    if range < r.min_range_km || range > r.max_range_km {
        return false;
    }
    let zdr = inputs.zdr[i];
    let zdrm = inputs.zdrm[i];
    if is_missing(zdr) || zdr.abs() > p.max_abs_zdr || is_missing(zdrm) || zdrm.abs() > p.max_abs_zdrm {
        return false;
    }
    let rhohv_nnc = inputs.rhohv_nnc[i];
    if is_missing(rhohv_nnc) || rhohv_nnc < p.min_rhohv_nnc {
        return false;
    }
    let vel = inputs.vel[i];
    if is_missing(vel) || vel.abs() < p.min_abs_vel {
        return false;
    }
    let accum = inputs.phidp_accum[i];
    if !is_missing(accum) && accum > p.max_phidp_accum {
        return false;
    }
    let kdp = inputs.kdp[i];
    if !is_missing(kdp) && kdp.abs() > p.max_abs_kdp {
        return false;
    }
    if !within(inputs.dbz[i], r.min_dbz, r.max_dbz)
        || !within(inputs.snr[i], r.min_snr, r.max_snr)
        || !within(inputs.temp_c[i], r.min_temp_c, r.max_temp_c)
    {
        return false;
    }
    // Ice selection always depends on the classifier.
    let check_pid = region == ZdrRegion::Ice || r.check_pid;
    !check_pid || r.pid_types.contains(&inputs.pid[i])
}
