//! Specific differential phase (KDP) and attenuation correction.

use radar_common::{RayGeometry, MISSING};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{DualpolError, Result};
use crate::filters::{is_missing, median_filter, running_sdev, window_slope};

/// Wavelength the self-consistency coefficients are tuned for (m).
const REFERENCE_WAVELENGTH_M: f64 = 0.1071;

/// Parameters for [`KdpFilter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdpParams {
    /// Gates in the least-squares phase slope window
    pub slope_window_gates: usize,
    /// Median filter length applied to conditioned PHIDP (0 disables)
    pub median_filter_len: usize,
    pub check_snr: bool,
    pub snr_threshold: f64,
    pub check_rhohv: bool,
    pub rhohv_threshold: f64,
    /// Gates whose local PHIDP standard deviation exceeds this are not
    /// trusted for phase
    pub phidp_sdev_max: f64,
    pub phidp_sdev_window: usize,
    /// |KDP| below this is reported as zero
    pub min_valid_abs_kdp: f64,
    /// |KDP| above this is reported missing
    pub max_valid_abs_kdp: f64,
    /// Valid gates averaged to estimate the system phase
    pub phidp0_gates: usize,
    pub dbz_atten_coeff: f64,
    pub dbz_atten_exponent: f64,
    pub zdr_atten_coeff: f64,
    pub zdr_atten_exponent: f64,
    /// Self-consistency relation `KDP = aa * Zh^bb * Zdr^cc` (linear units)
    pub self_con_aa: f64,
    pub self_con_bb: f64,
    pub self_con_cc: f64,
}

impl Default for KdpParams {
    fn default() -> Self {
        Self {
            slope_window_gates: 9,
            median_filter_len: 5,
            check_snr: true,
            snr_threshold: -6.0,
            check_rhohv: true,
            rhohv_threshold: 0.7,
            phidp_sdev_max: 20.0,
            phidp_sdev_window: 9,
            min_valid_abs_kdp: 0.01,
            max_valid_abs_kdp: 20.0,
            phidp0_gates: 5,
            dbz_atten_coeff: 0.017,
            dbz_atten_exponent: 1.0,
            zdr_atten_coeff: 0.004,
            zdr_atten_exponent: 1.0,
            self_con_aa: 1.0e-4,
            self_con_bb: 0.95,
            self_con_cc: -2.5,
        }
    }
}

impl KdpParams {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.slope_window_gates < 2 {
            return Err("kdp.slope_window_gates must be at least 2".to_string());
        }
        if self.phidp0_gates == 0 {
            return Err("kdp.phidp0_gates must be at least 1".to_string());
        }
        if self.min_valid_abs_kdp < 0.0 || self.max_valid_abs_kdp <= self.min_valid_abs_kdp {
            return Err(format!(
                "kdp valid range [{}, {}] is empty",
                self.min_valid_abs_kdp, self.max_valid_abs_kdp
            ));
        }
        if self.dbz_atten_coeff < 0.0 || self.zdr_atten_coeff < 0.0 {
            return Err("attenuation coefficients must be non-negative".to_string());
        }
        Ok(())
    }
}

/// Per-gate inputs for one ray, all normalised to [`MISSING`].
#[derive(Debug, Clone, Copy)]
pub struct KdpInputs<'a> {
    pub geometry: RayGeometry,
    pub wavelength_m: f64,
    pub snr: &'a [f64],
    pub dbz: &'a [f64],
    pub zdr: &'a [f64],
    pub rhohv: &'a [f64],
    pub phidp: &'a [f64],
}

/// Arrays produced by a [`KdpEstimator`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KdpOutputs {
    /// Direct estimate from the PHIDP range derivative (deg/km)
    pub kdp: Vec<f64>,
    /// Estimate from the Z/ZDR self-consistency relation (deg/km)
    pub kdp_self_consistent: Vec<f64>,
    pub phidp_filtered: Vec<f64>,
    /// Filtered PHIDP minus the system phase (deg)
    pub phidp_accum: Vec<f64>,
    /// Additive corrections (dB)
    pub dbz_correction: Vec<f64>,
    pub zdr_correction: Vec<f64>,
    pub dbz_corrected: Vec<f64>,
    pub zdr_corrected: Vec<f64>,
}

impl KdpOutputs {
    /// Size every array to `n_gates`, filled with [`MISSING`].
    pub fn reset(&mut self, n_gates: usize) {
        for v in [
            &mut self.kdp,
            &mut self.kdp_self_consistent,
            &mut self.phidp_filtered,
            &mut self.phidp_accum,
            &mut self.dbz_correction,
            &mut self.zdr_correction,
            &mut self.dbz_corrected,
            &mut self.zdr_corrected,
        ] {
            v.clear();
            v.resize(n_gates, MISSING);
        }
    }
}

/// Computes KDP and attenuation corrections for one ray at a time.
pub trait KdpEstimator: Send {
    fn compute(&mut self, inputs: &KdpInputs<'_>, out: &mut KdpOutputs) -> Result<()>;
}

/// Reference KDP estimator: conditioned PHIDP, running median, windowed
/// least-squares slope.
#[derive(Debug, Clone)]
pub struct KdpFilter {
    params: KdpParams,
    range_km: Vec<f64>,
    valid: Vec<bool>,
    phidp_sdev: Vec<f64>,
    median_src: Vec<f64>,
    median_work: Vec<f64>,
}

impl KdpFilter {
    pub fn new(params: KdpParams) -> Result<Self> {
        params.validate().map_err(DualpolError::InvalidParams)?;
        Ok(Self {
            params,
            range_km: Vec::new(),
            valid: Vec::new(),
            phidp_sdev: Vec::new(),
            median_src: Vec::new(),
            median_work: Vec::new(),
        })
    }

    pub fn params(&self) -> &KdpParams {
        &self.params
    }

    fn snr_ok(&self, snr: f64) -> bool {
        !self.params.check_snr || (!is_missing(snr) && snr >= self.params.snr_threshold)
    }

    /// Mark gates whose phase can be trusted.
    fn flag_valid(&mut self, inputs: &KdpInputs<'_>, n: usize) {
        running_sdev(
            &inputs.phidp[..n],
            self.params.phidp_sdev_window,
            &mut self.phidp_sdev[..n],
        );
        for i in 0..n {
            let rhohv = inputs.rhohv[i];
            let rhohv_ok = !self.params.check_rhohv
                || (!is_missing(rhohv) && rhohv >= self.params.rhohv_threshold);
            let sdev = self.phidp_sdev[i];
            let sdev_ok = is_missing(sdev) || sdev <= self.params.phidp_sdev_max;
            let ok = !is_missing(inputs.phidp[i]) && self.snr_ok(inputs.snr[i]) && rhohv_ok && sdev_ok;
            self.valid[i] = ok;
        }
    }

    /// System phase: mean of the first valid gates.
    fn system_phase(&self, phidp: &[f64]) -> Option<f64> {
        let first: Vec<f64> = phidp
            .iter()
            .zip(self.valid.iter())
            .filter(|(_, ok)| **ok)
            .map(|(p, _)| *p)
            .take(self.params.phidp0_gates)
            .collect();
        if first.is_empty() {
            None
        } else {
            Some(first.iter().sum::<f64>() / first.len() as f64)
        }
    }
}

impl KdpEstimator for KdpFilter {
    fn compute(&mut self, inputs: &KdpInputs<'_>, out: &mut KdpOutputs) -> Result<()> {
        let n = inputs.geometry.n_gates;
        for (name, data) in [
            ("snr", inputs.snr),
            ("dbz", inputs.dbz),
            ("zdr", inputs.zdr),
            ("rhohv", inputs.rhohv),
            ("phidp", inputs.phidp),
        ] {
            crate::check_len(name, data, n)?;
        }
        if inputs.wavelength_m <= 0.0 {
            return Err(DualpolError::Compute(format!(
                "wavelength {} m",
                inputs.wavelength_m
            )));
        }

        out.reset(n);
        self.range_km.clear();
        self.range_km.extend((0..n).map(|i| inputs.geometry.range_km(i)));
        self.valid.clear();
        self.valid.resize(n, false);
        self.phidp_sdev.clear();
        self.phidp_sdev.resize(n, MISSING);
        self.flag_valid(inputs, n);

        let Some(phidp0) = self.system_phase(inputs.phidp) else {
            // No usable phase on this ray: KDP and corrections stay missing,
            // corrected moments fall back to raw.
            trace!(
                azimuth = inputs.geometry.azimuth_deg,
                n_gates = n,
                "No valid PHIDP gates for system phase"
            );
            out.dbz_corrected[..n].copy_from_slice(&inputs.dbz[..n]);
            out.zdr_corrected[..n].copy_from_slice(&inputs.zdr[..n]);
            return Ok(());
        };

        // Conditioned phase: hold the last trusted value across bad gates.
        let mut held = phidp0;
        for i in 0..n {
            if self.valid[i] {
                held = inputs.phidp[i];
            }
            out.phidp_filtered[i] = held;
        }
        median_filter(
            &mut out.phidp_filtered,
            self.params.median_filter_len,
            &mut self.median_src,
            &mut self.median_work,
        );

        let p = &self.params;
        let wavelength_scale = REFERENCE_WAVELENGTH_M / inputs.wavelength_m;
        for i in 0..n {
            let dbz = inputs.dbz[i];
            let zdr = inputs.zdr[i];
            let has_echo = !is_missing(dbz) && self.snr_ok(inputs.snr[i]);

            if has_echo {
                out.kdp[i] = match window_slope(
                    &self.range_km,
                    &out.phidp_filtered,
                    i,
                    p.slope_window_gates,
                ) {
                    Some(slope) => {
                        let kdp = 0.5 * slope;
                        if kdp.abs() < p.min_valid_abs_kdp {
                            0.0
                        } else if kdp.abs() > p.max_valid_abs_kdp {
                            MISSING
                        } else {
                            kdp
                        }
                    }
                    None => MISSING,
                };
            }

            out.phidp_accum[i] = out.phidp_filtered[i] - phidp0;
            let dphi = out.phidp_accum[i].max(0.0);
            let dbz_corr = p.dbz_atten_coeff * dphi.powf(p.dbz_atten_exponent);
            let zdr_corr = p.zdr_atten_coeff * dphi.powf(p.zdr_atten_exponent);
            out.dbz_correction[i] = dbz_corr;
            out.zdr_correction[i] = zdr_corr;
            out.dbz_corrected[i] = if is_missing(dbz) { MISSING } else { dbz + dbz_corr };
            out.zdr_corrected[i] = if is_missing(zdr) { MISSING } else { zdr + zdr_corr };

            if has_echo && !is_missing(zdr) {
                let zh = 10f64.powf(out.dbz_corrected[i] / 10.0);
                let zdr_lin = 10f64.powf(out.zdr_corrected[i] / 10.0);
                out.kdp_self_consistent[i] = wavelength_scale
                    * p.self_con_aa
                    * zh.powf(p.self_con_bb)
                    * zdr_lin.powf(p.self_con_cc);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(n: usize) -> RayGeometry {
        RayGeometry {
            n_gates: n,
            start_range_km: 1.0,
            gate_spacing_km: 0.25,
            azimuth_deg: 0.0,
            elevation_deg: 0.5,
        }
    }

    struct Fields {
        snr: Vec<f64>,
        dbz: Vec<f64>,
        zdr: Vec<f64>,
        rhohv: Vec<f64>,
        phidp: Vec<f64>,
    }

    fn linear_phase(n: usize, kdp: f64) -> Fields {
        let g = geometry(n);
        Fields {
            snr: vec![30.0; n],
            dbz: vec![40.0; n],
            zdr: vec![1.0; n],
            rhohv: vec![0.99; n],
            phidp: (0..n).map(|i| 20.0 + 2.0 * kdp * (g.range_km(i) - 1.0)).collect(),
        }
    }

    fn inputs(f: &Fields) -> KdpInputs<'_> {
        KdpInputs {
            geometry: geometry(f.dbz.len()),
            wavelength_m: REFERENCE_WAVELENGTH_M,
            snr: &f.snr,
            dbz: &f.dbz,
            zdr: &f.zdr,
            rhohv: &f.rhohv,
            phidp: &f.phidp,
        }
    }

    #[test]
    fn test_linear_phase_gives_constant_kdp() {
        let f = linear_phase(60, 1.5);
        let mut filter = KdpFilter::new(KdpParams::default()).unwrap();
        let mut out = KdpOutputs::default();
        filter.compute(&inputs(&f), &mut out).unwrap();
        for i in 10..50 {
            assert!((out.kdp[i] - 1.5).abs() < 1e-6, "gate {i}: {}", out.kdp[i]);
        }
    }

    #[test]
    fn test_attenuation_correction_grows_with_phase() {
        let f = linear_phase(40, 1.0);
        let mut filter = KdpFilter::new(KdpParams::default()).unwrap();
        let mut out = KdpOutputs::default();
        filter.compute(&inputs(&f), &mut out).unwrap();
        assert!(out.dbz_correction[35] > out.dbz_correction[10]);
        assert!(out.phidp_accum[35] > out.phidp_accum[10]);
        let i = 30;
        assert!((out.dbz_corrected[i] - (f.dbz[i] + out.dbz_correction[i])).abs() < 1e-12);
        assert!((out.zdr_corrected[i] - (f.zdr[i] + out.zdr_correction[i])).abs() < 1e-12);
    }

    #[test]
    fn test_missing_dbz_gives_missing_kdp() {
        let mut f = linear_phase(30, 1.0);
        f.dbz[12] = MISSING;
        let mut filter = KdpFilter::new(KdpParams::default()).unwrap();
        let mut out = KdpOutputs::default();
        filter.compute(&inputs(&f), &mut out).unwrap();
        assert_eq!(out.kdp[12], MISSING);
        assert_eq!(out.dbz_corrected[12], MISSING);
        assert_eq!(out.kdp_self_consistent[12], MISSING);
    }

    #[test]
    fn test_no_valid_phase_keeps_raw_moments() {
        let mut f = linear_phase(20, 1.0);
        f.phidp = vec![MISSING; 20];
        let mut filter = KdpFilter::new(KdpParams::default()).unwrap();
        let mut out = KdpOutputs::default();
        filter.compute(&inputs(&f), &mut out).unwrap();
        assert!(out.kdp.iter().all(|v| *v == MISSING));
        assert_eq!(out.dbz_corrected, f.dbz);
    }

    #[test]
    fn test_short_input_is_rejected() {
        let mut f = linear_phase(20, 1.0);
        f.rhohv.truncate(10);
        let mut filter = KdpFilter::new(KdpParams::default()).unwrap();
        let mut out = KdpOutputs::default();
        let err = filter.compute(&inputs(&f), &mut out).unwrap_err();
        assert_eq!(err, DualpolError::input_length("rhohv", 20, 10));
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = KdpParams {
            slope_window_gates: 1,
            ..Default::default()
        };
        assert!(matches!(
            KdpFilter::new(params),
            Err(DualpolError::InvalidParams(_))
        ));
    }
}
