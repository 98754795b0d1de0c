//! JSON report written for each processed volume.

use chrono::{DateTime, Utc};
use radar_common::{OutputRay, Volume};
use ray_engine::{CalibrationSummary, EngineConfig, OutputAssembler, RayFailure};
use serde::Serialize;

/// A ray that produced no output.
#[derive(Debug, Serialize)]
pub struct FailureReport {
    pub index: usize,
    pub time: DateTime<Utc>,
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
    pub error: String,
}

impl From<&RayFailure> for FailureReport {
    fn from(f: &RayFailure) -> Self {
        Self {
            index: f.index,
            time: f.time,
            azimuth_deg: f.azimuth_deg,
            elevation_deg: f.elevation_deg,
            error: f.error.to_string(),
        }
    }
}

/// Output of one volume.
#[derive(Debug, Serialize)]
pub struct VolumeReport {
    pub start_time: DateTime<Utc>,
    pub rays_in: usize,
    pub harvested: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailureReport>,
    /// ZDR and Z bias estimates and interference counts
    pub calibration: CalibrationSummary,
    /// Output rays ordered by time
    pub rays: Vec<OutputRay>,
}

impl VolumeReport {
    pub fn new(volume: &Volume, assembler: OutputAssembler, config: &EngineConfig) -> Self {
        let failures = assembler.failures().iter().map(FailureReport::from).collect();
        let calibration = assembler.calibration_summary(config);
        Self {
            start_time: volume.start_time,
            rays_in: volume.rays.len(),
            harvested: assembler.harvested(),
            failed: assembler.failed(),
            failures,
            calibration,
            rays: assembler.into_sorted(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ray_engine::RayDispatcher;
    use test_utils::synthetic_volume;

    #[test]
    fn test_report_counts_and_order() {
        let volume = synthetic_volume(4, 30);
        let mut dispatcher = RayDispatcher::new(EngineConfig {
            n_workers: 2,
            ..Default::default()
        })
        .unwrap();
        let assembler = dispatcher.run(&volume).unwrap();
        let report = VolumeReport::new(&volume, assembler, dispatcher.config());

        assert_eq!(report.rays_in, 4);
        assert_eq!(report.harvested, 4);
        assert_eq!(report.failed, 0);
        assert!(report.rays.windows(2).all(|w| w[0].time <= w[1].time));

        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("failures").is_none());
        assert_eq!(json["rays"].as_array().map(|r| r.len()), Some(4));
        assert!(json["calibration"]["zdr_in_ice"].is_null());
        assert_eq!(json["calibration"]["rlan_gates"], 0);
    }
}
