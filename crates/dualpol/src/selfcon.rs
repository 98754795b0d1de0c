//! Z bias from the self-consistency of Z, ZDR and PHIDP in rain.
//!
//! In rain, KDP follows from Z and ZDR. Along a run of clean rain gates the
//! PHIDP accumulated from that estimate is compared with the observed
//! accumulation; the ratio gives the bias of the measured Z.

use radar_common::{RayGeometry, MISSING};
use serde::{Deserialize, Serialize};

use crate::error::{DualpolError, Result};
use crate::filters::{fill_short_gaps, flag_runs, is_missing, remove_short_runs};
use crate::pid::category;

/// Relation used to estimate KDP from Z and ZDR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KdpRelation {
    /// `KDP = coeff * Z^z_exponent * Zdr^zdr_exponent`, linear units
    PowerLaw,
    /// `KDP = (a0 + a1 zdr + a2 zdr^2 + a3 zdr^3) * Z * 1e-5`, zdr in dB
    Polynomial,
}

/// Parameters for [`SelfConsistency`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelfConParams {
    pub min_elevation_deg: f64,
    pub max_range_km: f64,
    /// Known calibration offsets added before the check (dB)
    pub dbz_correction: f64,
    pub zdr_correction: f64,
    pub min_dbz: f64,
    pub max_dbz: f64,
    pub min_zdr: f64,
    pub max_zdr: f64,
    pub min_snr: f64,
    pub max_snr: f64,
    pub min_rhohv: f64,
    pub min_temp_c: f64,
    pub pid_types: Vec<i32>,
    /// Largest |raw - filtered PHIDP| accepted (deg)
    pub max_phase_shift_on_backscatter: f64,
    /// Shortest stretch of valid gates before gap filling
    pub min_no_gap_distance_km: f64,
    /// Shortest run that is analysed
    pub min_combined_distance_km: f64,
    pub max_gate_gap: usize,
    pub min_kdp: f64,
    /// Run ends are trimmed until KDP and DBZ are below these
    pub max_kdp_at_run_limits: f64,
    pub max_dbz_at_run_limits: f64,
    /// Runs with less observed PHIDP accumulation are skipped (deg)
    pub min_phidp_accum: f64,
    pub relation: KdpRelation,
    pub kdp_coeff: f64,
    pub kdp_z_exponent: f64,
    pub kdp_zdr_exponent: f64,
    pub kdp_polynomial: [f64; 4],
    /// Attenuation per unit of two-way phase (dB/deg)
    pub dbz_atten_coeff: f64,
    pub zdr_atten_coeff: f64,
}

impl Default for SelfConParams {
    fn default() -> Self {
        Self {
            min_elevation_deg: 0.0,
            max_range_km: 150.0,
            dbz_correction: 0.0,
            zdr_correction: 0.0,
            min_dbz: 20.0,
            max_dbz: 50.0,
            min_zdr: 0.0,
            max_zdr: 3.5,
            min_snr: 10.0,
            max_snr: 100.0,
            min_rhohv: 0.95,
            min_temp_c: 2.0,
            pid_types: vec![
                category::LIGHT_RAIN,
                category::MODERATE_RAIN,
                category::HEAVY_RAIN,
            ],
            max_phase_shift_on_backscatter: 2.5,
            min_no_gap_distance_km: 1.0,
            min_combined_distance_km: 5.0,
            max_gate_gap: 2,
            min_kdp: 0.0,
            max_kdp_at_run_limits: 0.5,
            max_dbz_at_run_limits: 45.0,
            min_phidp_accum: 10.0,
            relation: KdpRelation::PowerLaw,
            kdp_coeff: 1.0e-4,
            kdp_z_exponent: 0.95,
            kdp_zdr_exponent: -2.5,
            kdp_polynomial: [3.696, -1.963, 0.504, -0.047],
            dbz_atten_coeff: 0.017,
            zdr_atten_coeff: 0.004,
        }
    }
}

impl SelfConParams {
    pub fn validate(&self) -> std::result::Result<(), String> {
        for (what, lo, hi) in [
            ("dbz", self.min_dbz, self.max_dbz),
            ("zdr", self.min_zdr, self.max_zdr),
            ("snr", self.min_snr, self.max_snr),
        ] {
            if !(lo <= hi) {
                return Err(format!("self_consistency {what} range [{lo}, {hi}] is empty"));
            }
        }
        if !(self.min_no_gap_distance_km > 0.0)
            || self.min_combined_distance_km < self.min_no_gap_distance_km
        {
            return Err(format!(
                "self_consistency distances {} / {} km must be positive and ordered",
                self.min_no_gap_distance_km, self.min_combined_distance_km
            ));
        }
        if !(self.min_phidp_accum > 0.0) {
            return Err("self_consistency.min_phidp_accum must be positive".to_string());
        }
        if self.kdp_z_exponent == 0.0 || !self.kdp_z_exponent.is_finite() {
            return Err("self_consistency.kdp_z_exponent must be non-zero".to_string());
        }
        Ok(())
    }

    /// KDP implied by `dbz` and `zdr` (deg/km).
    pub fn estimate_kdp(&self, dbz: f64, zdr: f64) -> f64 {
        let z = 10f64.powf(dbz / 10.0);
        match self.relation {
            KdpRelation::PowerLaw => {
                let zdr_lin = 10f64.powf(zdr / 10.0);
                self.kdp_coeff * z.powf(self.kdp_z_exponent) * zdr_lin.powf(self.kdp_zdr_exponent)
            }
            KdpRelation::Polynomial => {
                let [a0, a1, a2, a3] = self.kdp_polynomial;
                ((a0 + zdr * (a1 + zdr * (a2 + zdr * a3))) * z * 1.0e-5).max(0.0)
            }
        }
    }
}

/// Per-gate inputs for one ray, all normalised to [`MISSING`].
#[derive(Debug, Clone, Copy)]
pub struct SelfConInputs<'a> {
    pub geometry: RayGeometry,
    pub snr: &'a [f64],
    /// Measured DBZ, before attenuation correction
    pub dbz: &'a [f64],
    pub zdr: &'a [f64],
    pub rhohv: &'a [f64],
    pub kdp: &'a [f64],
    /// Raw PHIDP
    pub phidp: &'a [f64],
    pub phidp_filtered: &'a [f64],
    pub phidp_accum: &'a [f64],
    pub temp_c: &'a [f64],
    pub pid: &'a [i32],
}

/// Outcome of the check over one run of rain gates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfConResult {
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
    pub run_start: usize,
    pub run_end: usize,
    pub range_start_km: f64,
    pub range_end_km: f64,
    pub dbz_correction: f64,
    pub zdr_correction: f64,
    /// Observed PHIDP accumulation over the run (deg)
    pub accum_observed: f64,
    /// Accumulation implied by the measured Z and ZDR (deg)
    pub accum_estimated: f64,
    /// Positive when the measured Z is too high (dB)
    pub dbz_bias: f64,
    /// Correlation of the observed and estimated accumulation along the run
    pub accum_correlation: f64,
}

/// Runs the self-consistency check on one ray at a time.
#[derive(Debug, Clone)]
pub struct SelfConsistency {
    params: SelfConParams,
    kdp_from_phidp: Vec<f64>,
    valid: Vec<bool>,
    observed: Vec<f64>,
    estimated: Vec<f64>,
}

impl SelfConsistency {
    pub fn new(params: SelfConParams) -> Result<Self> {
        params.validate().map_err(DualpolError::InvalidParams)?;
        Ok(Self {
            params,
            kdp_from_phidp: Vec::new(),
            valid: Vec::new(),
            observed: Vec::new(),
            estimated: Vec::new(),
        })
    }

    pub fn params(&self) -> &SelfConParams {
        &self.params
    }

    /// Append one result per usable run on the ray to `results`.
    pub fn analyze(
        &mut self,
        inputs: &SelfConInputs<'_>,
        results: &mut Vec<SelfConResult>,
    ) -> Result<()> {
        let n = inputs.geometry.n_gates;
        for (name, data) in [
            ("snr", inputs.snr),
            ("dbz", inputs.dbz),
            ("zdr", inputs.zdr),
            ("rhohv", inputs.rhohv),
            ("kdp", inputs.kdp),
            ("phidp", inputs.phidp),
            ("phidp_filtered", inputs.phidp_filtered),
            ("phidp_accum", inputs.phidp_accum),
            ("temp", inputs.temp_c),
        ] {
            crate::check_len(name, data, n)?;
        }
        if inputs.pid.len() < n {
            return Err(DualpolError::input_length("pid", n, inputs.pid.len()));
        }
        let spacing = inputs.geometry.gate_spacing_km;
        if !(spacing > 0.0) {
            return Err(DualpolError::Compute(format!("gate spacing {spacing} km")));
        }
        if inputs.geometry.elevation_deg < self.params.min_elevation_deg || n < 3 {
            return Ok(());
        }

        let min_no_gap = gates_for(self.params.min_no_gap_distance_km, spacing);
        let min_combined = gates_for(self.params.min_combined_distance_km, spacing);

        self.kdp_from_phidp.clear();
        self.kdp_from_phidp.resize(n, MISSING);
        for i in 1..n - 1 {
            let (before, after) = (inputs.phidp[i - 1], inputs.phidp[i + 1]);
            if !is_missing(before) && !is_missing(after) {
                self.kdp_from_phidp[i] = (after - before) / (4.0 * spacing);
            }
        }
        self.kdp_from_phidp[0] = self.kdp_from_phidp[1];
        self.kdp_from_phidp[n - 1] = self.kdp_from_phidp[n - 2];

        self.valid.clear();
        for i in 0..n {
            let ok = self.gate_valid(inputs, i);
            self.valid.push(ok);
        }
        remove_short_runs(&mut self.valid, min_no_gap);
        fill_short_gaps(&mut self.valid, self.params.max_gate_gap);

        for (start, end) in flag_runs(&self.valid) {
            // Drop the edge gates, whose phase is least reliable.
            if end - start + 1 < min_no_gap + 2 {
                continue;
            }
            let Some((start, end)) = self.trim_run(inputs, start + 1, end - 1) else {
                continue;
            };
            if let Some(result) = self.check_run(inputs, start, end, min_combined) {
                results.push(result);
            }
        }
        Ok(())
    }

    fn gate_valid(&self, inputs: &SelfConInputs<'_>, i: usize) -> bool {
        let p = &self.params;
        if inputs.geometry.range_km(i) > p.max_range_km {
            return false;
        }
        let (dbz, zdr, snr, rhohv) = (inputs.dbz[i], inputs.zdr[i], inputs.snr[i], inputs.rhohv[i]);
        if is_missing(dbz) || is_missing(zdr) || is_missing(snr) || is_missing(rhohv) {
            return false;
        }
        let dbz = dbz + p.dbz_correction;
        let zdr = zdr + p.zdr_correction;
        if dbz < p.min_dbz || dbz > p.max_dbz || zdr < p.min_zdr || zdr > p.max_zdr {
            return false;
        }
        if snr < p.min_snr || snr > p.max_snr || rhohv < p.min_rhohv {
            return false;
        }
        if is_missing(inputs.kdp[i])
            || is_missing(self.kdp_from_phidp[i])
            || is_missing(inputs.phidp_accum[i])
        {
            return false;
        }
        let temp = inputs.temp_c[i];
        if !is_missing(temp) && temp < p.min_temp_c {
            return false;
        }
        if !p.pid_types.contains(&inputs.pid[i]) {
            return false;
        }
        let (raw, filtered) = (inputs.phidp[i], inputs.phidp_filtered[i]);
        !is_missing(raw)
            && !is_missing(filtered)
            && (raw - filtered).abs() <= p.max_phase_shift_on_backscatter
    }

    /// Shrink a run until its ends sit in light, steadily accumulating rain.
    fn trim_run(
        &self,
        inputs: &SelfConInputs<'_>,
        mut start: usize,
        mut end: usize,
    ) -> Option<(usize, usize)> {
        let p = &self.params;
        let end_ok = |i: usize| {
            let kdp = self.kdp_from_phidp[i];
            let dbz = inputs.dbz[i] + p.dbz_correction;
            !is_missing(kdp)
                && kdp >= p.min_kdp
                && kdp <= p.max_kdp_at_run_limits
                && dbz <= p.max_dbz_at_run_limits
        };
        while start < end && !end_ok(start) {
            start += 1;
        }
        while end > start && !end_ok(end) {
            end -= 1;
        }
        if start >= end {
            return None;
        }

        // Skip a flat stretch of phase at the start of the run.
        let accum = inputs.phidp_accum;
        let accum_run = accum[end] - accum[start];
        if accum_run > 0.0 {
            if let Some(first) =
                (start + 1..end).find(|&i| (accum[i] - accum[start]) / accum_run >= 0.01)
            {
                if first - start > 3 {
                    start = first;
                }
            }
        }
        Some((start, end))
    }

    fn check_run(
        &mut self,
        inputs: &SelfConInputs<'_>,
        start: usize,
        end: usize,
        min_combined: usize,
    ) -> Option<SelfConResult> {
        let p = &self.params;
        let accum = inputs.phidp_accum;
        let accum_observed = accum[end] - accum[start];
        if accum_observed < p.min_phidp_accum || end - start + 1 < min_combined {
            return None;
        }

        let spacing = inputs.geometry.gate_spacing_km;
        let mut dbz_atten = 0.0;
        let mut zdr_atten = 0.0;
        let mut accum_estimated = 0.0;
        self.observed.clear();
        self.estimated.clear();
        for i in start..=end {
            let kdp = inputs.kdp[i];
            let kdp = if is_missing(kdp) || kdp < p.min_kdp { 0.0 } else { kdp };
            dbz_atten += kdp * p.dbz_atten_coeff * spacing;
            zdr_atten += kdp * p.zdr_atten_coeff * spacing;
            let (dbz, zdr) = (inputs.dbz[i], inputs.zdr[i]);
            if i > start && !is_missing(dbz) && !is_missing(zdr) {
                let dbz = dbz + p.dbz_correction + 2.0 * dbz_atten;
                let zdr = zdr + p.zdr_correction + 2.0 * zdr_atten;
                accum_estimated += p.estimate_kdp(dbz, zdr) * spacing * 2.0;
            }
            self.observed.push(accum[i] - accum[start]);
            self.estimated.push(accum_estimated);
        }
        if !(accum_estimated > 0.0) {
            return None;
        }

        let z_bias = (accum_estimated / accum_observed).powf(1.0 / p.kdp_z_exponent);
        let geometry = &inputs.geometry;
        Some(SelfConResult {
            azimuth_deg: geometry.azimuth_deg,
            elevation_deg: geometry.elevation_deg,
            run_start: start,
            run_end: end,
            range_start_km: geometry.range_km(start),
            range_end_km: geometry.range_km(end),
            dbz_correction: p.dbz_correction,
            zdr_correction: p.zdr_correction,
            accum_observed,
            accum_estimated,
            dbz_bias: 10.0 * z_bias.log10(),
            accum_correlation: correlation(&self.observed, &self.estimated),
        })
    }
}

/// Gate count spanning `distance_km`, at least one.
fn gates_for(distance_km: f64, spacing_km: f64) -> usize {
    ((distance_km / spacing_km + 0.5) as usize).max(1)
}

/// Pearson correlation; 0 when either series is constant.
fn correlation(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n < 2 {
        return 0.0;
    }
    let nf = n as f64;
    let mean_x = x[..n].iter().sum::<f64>() / nf;
    let mean_y = y[..n].iter().sum::<f64>() / nf;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (a, b) in x[..n].iter().zip(&y[..n]) {
        let (dx, dy) = (a - mean_x, b - mean_y);
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    let denom = (sxx * syy).sqrt();
    if denom > 0.0 {
        sxy / denom
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::assert_approx_eq;

    const SPACING: f64 = 0.25;

    struct Fields {
        snr: Vec<f64>,
        dbz: Vec<f64>,
        zdr: Vec<f64>,
        rhohv: Vec<f64>,
        kdp: Vec<f64>,
        phidp: Vec<f64>,
        phidp_accum: Vec<f64>,
        temp_c: Vec<f64>,
        pid: Vec<i32>,
    }

    fn no_attenuation() -> SelfConParams {
        SelfConParams {
            dbz_atten_coeff: 0.0,
            zdr_atten_coeff: 0.0,
            ..Default::default()
        }
    }

    /// Uniform rain whose phase matches what `params` predicts from Z and ZDR.
    fn rain(n: usize, dbz: f64, zdr: f64, params: &SelfConParams) -> Fields {
        let kdp = params.estimate_kdp(dbz, zdr);
        let phidp: Vec<f64> = (0..n).map(|i| 30.0 + 2.0 * kdp * SPACING * i as f64).collect();
        Fields {
            snr: vec![30.0; n],
            dbz: vec![dbz; n],
            zdr: vec![zdr; n],
            rhohv: vec![0.98; n],
            kdp: vec![kdp; n],
            phidp_accum: phidp.iter().map(|p| p - 30.0).collect(),
            phidp,
            temp_c: vec![15.0; n],
            pid: vec![category::MODERATE_RAIN; n],
        }
    }

    fn inputs(f: &Fields, elevation_deg: f64) -> SelfConInputs<'_> {
        SelfConInputs {
            geometry: RayGeometry {
                n_gates: f.dbz.len(),
                start_range_km: 5.0,
                gate_spacing_km: SPACING,
                azimuth_deg: 120.0,
                elevation_deg,
            },
            snr: &f.snr,
            dbz: &f.dbz,
            zdr: &f.zdr,
            rhohv: &f.rhohv,
            kdp: &f.kdp,
            phidp: &f.phidp,
            phidp_filtered: &f.phidp,
            phidp_accum: &f.phidp_accum,
            temp_c: &f.temp_c,
            pid: &f.pid,
        }
    }

    fn analyze(params: SelfConParams, f: &Fields, elevation_deg: f64) -> Vec<SelfConResult> {
        let mut check = SelfConsistency::new(params).unwrap();
        let mut results = Vec::new();
        check.analyze(&inputs(f, elevation_deg), &mut results).unwrap();
        results
    }

    #[test]
    fn test_consistent_rain_has_no_bias() {
        let params = no_attenuation();
        let f = rain(160, 40.0, 1.0, &params);
        let results = analyze(params, &f, 0.5);
        assert_eq!(results.len(), 1);
        let r = &results[0];
        assert_eq!((r.run_start, r.run_end), (1, 158));
        assert_approx_eq!(r.accum_estimated, r.accum_observed, 1e-9);
        assert_approx_eq!(r.dbz_bias, 0.0, 1e-9);
        assert!(r.accum_correlation > 0.999);
        assert_approx_eq!(r.range_start_km, 5.25, 1e-12);
    }

    #[test]
    fn test_hot_reflectivity_shows_positive_bias() {
        let params = no_attenuation();
        let mut f = rain(160, 40.0, 1.0, &params);
        f.dbz.iter_mut().for_each(|v| *v += 1.0);
        let results = analyze(params, &f, 0.5);
        assert_eq!(results.len(), 1);
        assert_approx_eq!(results[0].dbz_bias, 1.0, 1e-9);
    }

    #[test]
    fn test_low_elevation_cutoff() {
        let params = SelfConParams {
            min_elevation_deg: 1.0,
            ..no_attenuation()
        };
        let f = rain(160, 40.0, 1.0, &params);
        assert!(analyze(params, &f, 0.5).is_empty());
    }

    #[test]
    fn test_only_rain_gates_used() {
        let params = no_attenuation();
        let mut f = rain(160, 40.0, 1.0, &params);
        f.pid.fill(category::DRY_SNOW);
        assert!(analyze(params, &f, 0.5).is_empty());
    }

    #[test]
    fn test_short_gaps_bridged() {
        let params = no_attenuation();
        let mut f = rain(160, 40.0, 1.0, &params);
        f.rhohv[80] = 0.5;
        f.rhohv[81] = 0.5;
        let results = analyze(params, &f, 0.5);
        assert_eq!(results.len(), 1);
        assert_eq!((results[0].run_start, results[0].run_end), (1, 158));
    }

    #[test]
    fn test_small_accumulation_skipped() {
        let params = no_attenuation();
        // 5 km of rain accumulates well under 10 degrees.
        let f = rain(20, 40.0, 1.0, &params);
        assert!(analyze(params, &f, 0.5).is_empty());
    }

    #[test]
    fn test_polynomial_relation() {
        let params = SelfConParams {
            relation: KdpRelation::Polynomial,
            ..no_attenuation()
        };
        assert!(params.estimate_kdp(40.0, 1.0) > 0.0);
        assert_eq!(params.estimate_kdp(40.0, 30.0), 0.0);
        let f = rain(160, 40.0, 1.0, &params);
        let results = analyze(params, &f, 0.5);
        assert_eq!(results.len(), 1);
        assert_approx_eq!(results[0].dbz_bias, 0.0, 1e-9);
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = SelfConParams {
            min_combined_distance_km: 0.5,
            ..Default::default()
        };
        assert!(matches!(
            SelfConsistency::new(params),
            Err(DualpolError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_correlation() {
        assert_approx_eq!(correlation(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]), 1.0, 1e-12);
        assert_eq!(correlation(&[1.0, 1.0], &[1.0, 2.0]), 0.0);
    }
}
