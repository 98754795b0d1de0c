//! A volume: the set of rays sharing one temperature profile.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RadarResult;
use crate::ray::Ray;

/// Default S-band wavelength in meters.
pub const DEFAULT_WAVELENGTH_M: f64 = 0.1071;

/// Rays from one radar volume, plus the site metadata the engine needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    /// Volume start time, used to select the temperature profile
    pub start_time: DateTime<Utc>,
    /// Radar altitude above mean sea level (km)
    #[serde(default)]
    pub radar_altitude_km: f64,
    /// Radar wavelength (m)
    #[serde(default = "default_wavelength")]
    pub wavelength_m: f64,
    pub rays: Vec<Arc<Ray>>,
}

fn default_wavelength() -> f64 {
    DEFAULT_WAVELENGTH_M
}

impl Volume {
    pub fn new(start_time: DateTime<Utc>, radar_altitude_km: f64, rays: Vec<Ray>) -> Self {
        Self {
            start_time,
            radar_altitude_km,
            wavelength_m: DEFAULT_WAVELENGTH_M,
            rays: rays.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn n_rays(&self) -> usize {
        self.rays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rays.is_empty()
    }

    /// Parse a volume from JSON.
    pub fn from_json(json: &str) -> RadarResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a JSON volume file.
    pub fn from_json_file(path: impl AsRef<Path>) -> RadarResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| crate::RadarError::Parse(e.to_string()))?;
        Self::from_json(&text)
    }

    /// Time of the last ray, or the start time for an empty volume.
    pub fn end_time(&self) -> DateTime<Utc> {
        self.rays
            .iter()
            .map(|r| r.time)
            .max()
            .unwrap_or(self.start_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::RayField;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_json_roundtrip_keeps_nanoseconds() {
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap() + Duration::nanoseconds(123_456_789);
        let ray = Ray::new(t, 2, 0.0, 0.25, 10.0, 0.5)
            .with_field(RayField::new("DBZ", "dBZ", vec![1.0, 2.0]))
            .unwrap();
        let vol = Volume::new(t, 1.6, vec![ray]);
        let json = serde_json::to_string(&vol).unwrap();
        let back = Volume::from_json(&json).unwrap();
        assert_eq!(back.rays[0].time, t);
        assert_eq!(back.wavelength_m, DEFAULT_WAVELENGTH_M);
        assert_eq!(back.end_time(), t);
    }
}
