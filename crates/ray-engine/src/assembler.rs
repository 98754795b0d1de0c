//! Collects harvested output rays and rejoins them to the input stream.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use radar_common::{times_match, OutputRay, Ray, Volume};

use crate::calibration::{CalibrationSamples, CalibrationSummary, VolumeCalibration};
use crate::config::EngineConfig;
use crate::error::EngineError;

/// A ray that produced no output.
#[derive(Debug)]
pub struct RayFailure {
    pub index: usize,
    pub time: DateTime<Utc>,
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
    pub error: EngineError,
}

/// Output rays of one volume, in harvest order.
#[derive(Debug, Default)]
pub struct OutputAssembler {
    outputs: Vec<OutputRay>,
    failures: Vec<RayFailure>,
    calibration: VolumeCalibration,
}

impl OutputAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, output: OutputRay) {
        self.outputs.push(output);
    }

    pub fn record_failure(&mut self, failure: RayFailure) {
        self.failures.push(failure);
    }

    pub fn merge_calibration(&mut self, samples: CalibrationSamples) {
        self.calibration.merge(samples);
    }

    pub fn calibration(&self) -> &VolumeCalibration {
        &self.calibration
    }

    /// ZDR bias statistics, self-consistency Z bias and interference counts.
    pub fn calibration_summary(&self, config: &EngineConfig) -> CalibrationSummary {
        self.calibration.summarize(config)
    }

    /// Number of output rays collected.
    pub fn harvested(&self) -> usize {
        self.outputs.len()
    }

    /// Number of rays that produced no output.
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn failures(&self) -> &[RayFailure] {
        &self.failures
    }

    pub fn outputs(&self) -> &[OutputRay] {
        &self.outputs
    }

    /// Pair each input ray with its output, in input order.
    ///
    /// Each input claims the nearest unused output within the time
    /// tolerance. Equal time offsets are broken by angular distance, so rays
    /// sharing a timestamp pair by azimuth and elevation.
    pub fn match_to_input(&self, volume: &Volume) -> Vec<(Arc<Ray>, Option<&OutputRay>)> {
        let outputs = &self.outputs;
        let mut used = vec![false; outputs.len()];
        volume
            .rays
            .iter()
            .map(|ray| {
                let found = outputs
                    .iter()
                    .enumerate()
                    .filter(|(i, out)| !used[*i] && times_match(out.time, ray.time))
                    .min_by(|(_, a), (_, b)| {
                        time_offset_us(a, ray)
                            .cmp(&time_offset_us(b, ray))
                            .then_with(|| angle_offset(a, ray).total_cmp(&angle_offset(b, ray)))
                    })
                    .map(|(i, _)| i);
                let matched = found.map(|i| {
                    used[i] = true;
                    &outputs[i]
                });
                (Arc::clone(ray), matched)
            })
            .collect()
    }

    /// Output rays ordered by time.
    pub fn into_sorted(mut self) -> Vec<OutputRay> {
        self.outputs.sort_by_key(|out| out.time);
        self.outputs
    }
}

fn time_offset_us(out: &OutputRay, ray: &Ray) -> i64 {
    (out.time - ray.time)
        .num_microseconds()
        .map_or(i64::MAX, i64::abs)
}

fn angle_offset(out: &OutputRay, ray: &Ray) -> f64 {
    let daz = (out.azimuth_deg - ray.azimuth_deg).rem_euclid(360.0);
    daz.min(360.0 - daz) + (out.elevation_deg - ray.elevation_deg).abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn ray_at(t: DateTime<Utc>, az: f64) -> Ray {
        Ray::new(t, 4, 0.0, 0.25, az, 0.5)
    }

    #[test]
    fn test_match_to_input_by_time() {
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let rays = vec![
            ray_at(t0, 0.0),
            ray_at(t0 + Duration::milliseconds(100), 1.0),
            ray_at(t0 + Duration::milliseconds(200), 2.0),
        ];
        let volume = Volume::new(t0, 0.1, rays);

        let mut assembler = OutputAssembler::new();
        // Harvested out of order, the middle ray failed.
        assembler.push(OutputRay::from_source(&volume.rays[2]));
        assembler.push(OutputRay::from_source(&volume.rays[0]));

        let pairs = assembler.match_to_input(&volume);
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[0].1.map(|o| o.azimuth_deg), Some(0.0));
        assert!(pairs[1].1.is_none());
        assert_eq!(pairs[2].1.map(|o| o.azimuth_deg), Some(2.0));
    }

    #[test]
    fn test_match_prefers_nearest_time() {
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let rays = vec![
            ray_at(t0, 10.0),
            ray_at(t0 + Duration::microseconds(600), 11.0),
        ];
        let volume = Volume::new(t0, 0.1, rays);

        let mut assembler = OutputAssembler::new();
        assembler.push(OutputRay::from_source(&volume.rays[1]));
        assembler.push(OutputRay::from_source(&volume.rays[0]));

        let pairs = assembler.match_to_input(&volume);
        assert_eq!(pairs[0].1.map(|o| o.azimuth_deg), Some(10.0));
        assert_eq!(pairs[1].1.map(|o| o.azimuth_deg), Some(11.0));
    }

    #[test]
    fn test_match_same_time_uses_angles() {
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let rays = vec![ray_at(t0, 359.5), ray_at(t0, 20.0), ray_at(t0, 0.5)];
        let volume = Volume::new(t0, 0.1, rays);

        let mut assembler = OutputAssembler::new();
        for i in [2, 1, 0] {
            assembler.push(OutputRay::from_source(&volume.rays[i]));
        }

        let pairs = assembler.match_to_input(&volume);
        let matched: Vec<_> = pairs.iter().map(|(_, o)| o.map(|o| o.azimuth_deg)).collect();
        assert_eq!(matched, vec![Some(359.5), Some(20.0), Some(0.5)]);
    }

    #[test]
    fn test_into_sorted() {
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let mut assembler = OutputAssembler::new();
        for ms in [300, 100, 200] {
            let ray = ray_at(t0 + Duration::milliseconds(ms), 0.0);
            assembler.push(OutputRay::from_source(&ray));
        }
        let times: Vec<_> = assembler.into_sorted().iter().map(|o| o.time).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_counts() {
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let mut assembler = OutputAssembler::new();
        assembler.push(OutputRay::from_source(&ray_at(t0, 0.0)));
        assembler.record_failure(RayFailure {
            index: 1,
            time: t0,
            azimuth_deg: 1.0,
            elevation_deg: 0.5,
            error: EngineError::missing_field("DBZ", 0.5, 1.0),
        });
        assert_eq!(assembler.harvested(), 1);
        assert_eq!(assembler.failed(), 1);
        assert_eq!(assembler.failures()[0].index, 1);
    }

    #[test]
    fn test_calibration_merged_across_rays() {
        let mut assembler = OutputAssembler::new();
        for _ in 0..3 {
            assembler.merge_calibration(CalibrationSamples {
                zdr_in_bragg: vec![0.4; 40],
                zdrm_in_bragg: vec![0.5; 40],
                rlan_gates: 2,
                ..Default::default()
            });
        }
        let summary = assembler.calibration_summary(&EngineConfig::default());
        let bragg = summary.zdr_in_bragg.expect("bragg stats");
        assert_eq!(bragg.count, 120);
        assert_eq!(bragg.percentile(50.0), Some(0.4));
        assert!(summary.zdr_in_ice.is_none());
        assert!(summary.self_con_z_bias.is_none());
        assert_eq!((summary.rlan_rays, summary.rlan_gates), (3, 6));
    }
}
