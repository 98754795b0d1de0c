//! Per-ray calibration samples and their reduction over a volume.
//!
//! Each worker collects samples for its ray: ZDR at ice and Bragg gates,
//! self-consistency runs in rain, and a count of interference gates. The
//! dispatcher merges them at harvest and statistics are computed once the
//! volume is complete.

use chrono::{DateTime, Utc};
use dualpol::filters::is_missing;
use dualpol::{SelfConResult, ZdrBiasOutputs, ZdrRegion, ZdrRegionParams};
use serde::Serialize;

use crate::config::EngineConfig;

/// One self-consistency run, stamped with its ray time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelfConRun {
    pub time: DateTime<Utc>,
    #[serde(flatten)]
    pub result: SelfConResult,
}

/// Calibration samples from one ray, or merged from many.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationSamples {
    pub zdr_in_ice: Vec<f64>,
    pub zdrm_in_ice: Vec<f64>,
    pub zdr_in_bragg: Vec<f64>,
    pub zdrm_in_bragg: Vec<f64>,
    pub self_consistency: Vec<SelfConRun>,
    /// Gates flagged as interference
    pub rlan_gates: usize,
}

impl CalibrationSamples {
    pub fn clear(&mut self) {
        self.zdr_in_ice.clear();
        self.zdrm_in_ice.clear();
        self.zdr_in_bragg.clear();
        self.zdrm_in_bragg.clear();
        self.self_consistency.clear();
        self.rlan_gates = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.zdr_in_ice.is_empty()
            && self.zdr_in_bragg.is_empty()
            && self.self_consistency.is_empty()
            && self.rlan_gates == 0
    }

    /// Append the gates of `region` selected in `bias`.
    pub fn collect_zdr(&mut self, region: ZdrRegion, bias: &ZdrBiasOutputs) {
        let (zdr, zdrm) = bias.region(region);
        let (zdr_out, zdrm_out) = match region {
            ZdrRegion::Ice => (&mut self.zdr_in_ice, &mut self.zdrm_in_ice),
            ZdrRegion::Bragg => (&mut self.zdr_in_bragg, &mut self.zdrm_in_bragg),
        };
        for (&z, &zm) in zdr.iter().zip(zdrm) {
            if !is_missing(z) && !is_missing(zm) {
                zdr_out.push(z);
                zdrm_out.push(zm);
            }
        }
    }

    fn merge(&mut self, other: CalibrationSamples) {
        self.zdr_in_ice.extend(other.zdr_in_ice);
        self.zdrm_in_ice.extend(other.zdrm_in_ice);
        self.zdr_in_bragg.extend(other.zdr_in_bragg);
        self.zdrm_in_bragg.extend(other.zdrm_in_bragg);
        self.self_consistency.extend(other.self_consistency);
        self.rlan_gates += other.rlan_gates;
    }
}

/// Samples of every harvested ray of a volume.
#[derive(Debug, Clone, Default)]
pub struct VolumeCalibration {
    samples: CalibrationSamples,
    rlan_rays: usize,
}

impl VolumeCalibration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, ray: CalibrationSamples) {
        if ray.rlan_gates > 0 {
            self.rlan_rays += 1;
        }
        self.samples.merge(ray);
    }

    pub fn samples(&self) -> &CalibrationSamples {
        &self.samples
    }

    /// Rays with at least one interference gate.
    pub fn rlan_rays(&self) -> usize {
        self.rlan_rays
    }

    pub fn summarize(&self, config: &EngineConfig) -> CalibrationSummary {
        let ice = &config.zdr_bias.ice;
        let bragg = &config.zdr_bias.bragg;
        let s = &self.samples;
        CalibrationSummary {
            zdr_in_ice: BiasStats::compute(&s.zdr_in_ice, ice),
            zdrm_in_ice: BiasStats::compute(&s.zdrm_in_ice, ice),
            zdr_in_bragg: BiasStats::compute(&s.zdr_in_bragg, bragg),
            zdrm_in_bragg: BiasStats::compute(&s.zdrm_in_bragg, bragg),
            self_con_z_bias: SelfConZBias::compute(&s.self_consistency),
            rlan_rays: self.rlan_rays,
            rlan_gates: s.rlan_gates,
        }
    }
}

/// A percentile of the sample distribution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PercentileValue {
    pub percentile: f64,
    pub value: f64,
}

/// ZDR statistics over one region of a volume (dB).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BiasStats {
    pub count: usize,
    pub mean: f64,
    pub percentiles: Vec<PercentileValue>,
}

impl BiasStats {
    /// Statistics of `values`, or `None` unless there are more than
    /// `params.min_npoints_valid` of them.
    pub fn compute(values: &[f64], params: &ZdrRegionParams) -> Option<Self> {
        if values.is_empty() || values.len() <= params.min_npoints_valid {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;
        let percentiles = params
            .percentiles
            .iter()
            .map(|&percentile| PercentileValue {
                percentile,
                value: percentile_value(&sorted, percentile),
            })
            .collect();
        Some(Self {
            count: sorted.len(),
            mean,
            percentiles,
        })
    }

    pub fn percentile(&self, percentile: f64) -> Option<f64> {
        self.percentiles
            .iter()
            .find(|p| p.percentile == percentile)
            .map(|p| p.value)
    }
}

/// Mean of the sorted values within 1% of the sample count around the
/// percentile position.
fn percentile_value(sorted: &[f64], percentile: f64) -> f64 {
    let n = sorted.len();
    let pos = ((percentile / 100.0 * n as f64 + 0.5) as usize).min(n - 1);
    let margin = (n as f64 / 100.0 + 0.5) as usize;
    let lo = pos.saturating_sub(margin);
    let hi = (pos + margin).min(n - 1);
    let window = &sorted[lo..=hi];
    window.iter().sum::<f64>() / window.len() as f64
}

/// Volume Z bias from the self-consistency runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelfConZBias {
    pub n_runs: usize,
    /// Mean of the per-run biases (dB)
    pub dbz_bias: f64,
}

impl SelfConZBias {
    pub fn compute(runs: &[SelfConRun]) -> Option<Self> {
        if runs.is_empty() {
            return None;
        }
        let sum: f64 = runs.iter().map(|r| r.result.dbz_bias).sum();
        Some(Self {
            n_runs: runs.len(),
            dbz_bias: sum / runs.len() as f64,
        })
    }
}

/// Calibration results for one volume.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CalibrationSummary {
    pub zdr_in_ice: Option<BiasStats>,
    pub zdrm_in_ice: Option<BiasStats>,
    pub zdr_in_bragg: Option<BiasStats>,
    pub zdrm_in_bragg: Option<BiasStats>,
    pub self_con_z_bias: Option<SelfConZBias>,
    pub rlan_rays: usize,
    pub rlan_gates: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use radar_common::MISSING;
    use test_utils::assert_approx_eq;

    fn run(dbz_bias: f64) -> SelfConRun {
        SelfConRun {
            time: Utc::now(),
            result: SelfConResult {
                azimuth_deg: 0.0,
                elevation_deg: 0.5,
                run_start: 10,
                run_end: 90,
                range_start_km: 5.0,
                range_end_km: 25.0,
                dbz_correction: 0.0,
                zdr_correction: 0.0,
                accum_observed: 20.0,
                accum_estimated: 22.0,
                dbz_bias,
                accum_correlation: 0.99,
            },
        }
    }

    #[test]
    fn test_percentiles_average_one_percent_margin() {
        let values: Vec<f64> = (1..=200).rev().map(f64::from).collect();
        let params = ZdrRegionParams {
            min_npoints_valid: 10,
            percentiles: vec![0.0, 50.0, 100.0],
            ..ZdrRegionParams::ice()
        };
        let stats = BiasStats::compute(&values, &params).expect("stats");
        assert_eq!(stats.count, 200);
        assert_approx_eq!(stats.mean, 100.5, 1e-12);
        // Position 100, margin 2: values 99..=103.
        assert_eq!(stats.percentile(50.0), Some(101.0));
        assert_eq!(stats.percentile(0.0), Some(2.0));
        assert_eq!(stats.percentile(100.0), Some(199.0));
        assert_eq!(stats.percentile(25.0), None);
    }

    #[test]
    fn test_stats_need_more_than_min_points() {
        let params = ZdrRegionParams {
            min_npoints_valid: 3,
            ..ZdrRegionParams::ice()
        };
        assert!(BiasStats::compute(&[0.1, 0.2, 0.3], &params).is_none());
        assert!(BiasStats::compute(&[0.1, 0.2, 0.3, 0.4], &params).is_some());
        assert!(BiasStats::compute(&[], &ZdrRegionParams {
            min_npoints_valid: 0,
            ..ZdrRegionParams::ice()
        })
        .is_none());
    }

    #[test]
    fn test_collect_skips_unselected_gates() {
        let mut bias = ZdrBiasOutputs::default();
        bias.reset(4);
        bias.zdr_in_bragg[1] = 0.3;
        bias.zdrm_in_bragg[1] = 0.4;
        bias.zdr_in_bragg[2] = 0.5;
        let mut samples = CalibrationSamples::default();
        samples.collect_zdr(ZdrRegion::Bragg, &bias);
        samples.collect_zdr(ZdrRegion::Ice, &bias);
        assert_eq!(samples.zdr_in_bragg, vec![0.3]);
        assert_eq!(samples.zdrm_in_bragg, vec![0.4]);
        assert!(samples.zdr_in_ice.is_empty());
        assert_eq!(bias.zdr_in_ice[0], MISSING);
    }

    #[test]
    fn test_volume_merge_and_summary() {
        let mut volume = VolumeCalibration::new();
        volume.merge(CalibrationSamples {
            zdr_in_ice: vec![0.2; 150],
            zdrm_in_ice: vec![0.3; 150],
            self_consistency: vec![run(1.0)],
            rlan_gates: 12,
            ..Default::default()
        });
        volume.merge(CalibrationSamples {
            self_consistency: vec![run(2.0)],
            ..Default::default()
        });
        volume.merge(CalibrationSamples::default());
        assert_eq!(volume.rlan_rays(), 1);

        let summary = volume.summarize(&EngineConfig::default());
        let ice = summary.zdr_in_ice.expect("ice stats");
        assert_eq!(ice.count, 150);
        assert_approx_eq!(ice.mean, 0.2, 1e-12);
        assert_approx_eq!(summary.zdrm_in_ice.expect("zdrm").mean, 0.3, 1e-12);
        assert!(summary.zdr_in_bragg.is_none());
        let z_bias = summary.self_con_z_bias.expect("z bias");
        assert_eq!(z_bias.n_runs, 2);
        assert_approx_eq!(z_bias.dbz_bias, 1.5, 1e-12);
        assert_eq!(summary.rlan_gates, 12);
    }

    #[test]
    fn test_clear() {
        let mut samples = CalibrationSamples {
            zdr_in_ice: vec![0.1],
            rlan_gates: 3,
            ..Default::default()
        };
        assert!(!samples.is_empty());
        samples.clear();
        assert!(samples.is_empty());
    }
}
