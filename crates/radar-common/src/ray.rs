//! Input rays: one radial of per-gate dual-polarization moments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RadarError, RadarResult};
use crate::field::RayField;

/// Range geometry and pointing of a ray.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RayGeometry {
    pub n_gates: usize,
    pub start_range_km: f64,
    pub gate_spacing_km: f64,
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
}

impl RayGeometry {
    /// Range to the center of gate `igate` in km.
    #[inline]
    pub fn range_km(&self, igate: usize) -> f64 {
        self.start_range_km + igate as f64 * self.gate_spacing_km
    }

    /// Number of gates that lie within `max_range_km`.
    pub fn gates_within(&self, max_range_km: f64) -> usize {
        if self.gate_spacing_km <= 0.0 {
            return self.n_gates;
        }
        let n = ((max_range_km - self.start_range_km) / self.gate_spacing_km).floor() as i64 + 1;
        n.clamp(0, self.n_gates as i64) as usize
    }
}

/// A single radar ray.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ray {
    /// Ray time; copied verbatim to every derived output ray
    pub time: DateTime<Utc>,
    pub n_gates: usize,
    pub start_range_km: f64,
    pub gate_spacing_km: f64,
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
    /// Nyquist velocity in m/s
    #[serde(default)]
    pub nyquist_mps: f64,
    /// Per-gate fields, each with `n_gates` values
    #[serde(default)]
    pub fields: Vec<RayField>,
}

impl Ray {
    /// Create a ray with no fields.
    pub fn new(
        time: DateTime<Utc>,
        n_gates: usize,
        start_range_km: f64,
        gate_spacing_km: f64,
        azimuth_deg: f64,
        elevation_deg: f64,
    ) -> Self {
        Self {
            time,
            n_gates,
            start_range_km,
            gate_spacing_km,
            azimuth_deg,
            elevation_deg,
            nyquist_mps: 0.0,
            fields: Vec::new(),
        }
    }

    pub fn with_nyquist(mut self, nyquist_mps: f64) -> Self {
        self.nyquist_mps = nyquist_mps;
        self
    }

    pub fn geometry(&self) -> RayGeometry {
        RayGeometry {
            n_gates: self.n_gates,
            start_range_km: self.start_range_km,
            gate_spacing_km: self.gate_spacing_km,
            azimuth_deg: self.azimuth_deg,
            elevation_deg: self.elevation_deg,
        }
    }

    /// Add a field, enforcing the gate count.
    pub fn add_field(&mut self, field: RayField) -> RadarResult<()> {
        let actual = field.n_gates();
        if actual != self.n_gates {
            return Err(RadarError::gate_count_mismatch(field.name, self.n_gates, actual));
        }
        if self.field(&field.name).is_some() {
            return Err(RadarError::DuplicateField(field.name));
        }
        self.fields.push(field);
        Ok(())
    }

    /// Builder-style [`Ray::add_field`].
    pub fn with_field(mut self, field: RayField) -> RadarResult<Self> {
        self.add_field(field)?;
        Ok(self)
    }

    pub fn field(&self, name: &str) -> Option<&RayField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Remove a field by name, returning it.
    pub fn remove_field(&mut self, name: &str) -> Option<RayField> {
        let idx = self.fields.iter().position(|f| f.name == name)?;
        Some(self.fields.remove(idx))
    }

    /// Check the geometry and that every field has `n_gates` values.
    pub fn validate(&self) -> RadarResult<()> {
        if self.gate_spacing_km <= 0.0 || !self.gate_spacing_km.is_finite() {
            return Err(RadarError::invalid_geometry(format!(
                "gate spacing {} km",
                self.gate_spacing_km
            )));
        }
        if self.start_range_km < 0.0 || !self.start_range_km.is_finite() {
            return Err(RadarError::invalid_geometry(format!(
                "start range {} km",
                self.start_range_km
            )));
        }
        for field in &self.fields {
            if field.n_gates() != self.n_gates {
                return Err(RadarError::gate_count_mismatch(
                    field.name.clone(),
                    self.n_gates,
                    field.n_gates(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ray(n: usize) -> Ray {
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        Ray::new(t, n, 0.5, 0.25, 90.0, 1.5)
    }

    #[test]
    fn test_add_field_rejects_wrong_length() {
        let mut r = ray(4);
        let err = r
            .add_field(RayField::new("DBZ", "dBZ", vec![0.0; 3]))
            .unwrap_err();
        assert_eq!(err, RadarError::gate_count_mismatch("DBZ", 4, 3));
    }

    #[test]
    fn test_add_field_rejects_duplicate() {
        let mut r = ray(2);
        r.add_field(RayField::new("DBZ", "dBZ", vec![0.0; 2])).unwrap();
        let err = r
            .add_field(RayField::new("DBZ", "dBZ", vec![1.0; 2]))
            .unwrap_err();
        assert!(matches!(err, RadarError::DuplicateField(_)));
    }

    #[test]
    fn test_validate_catches_mutated_field() {
        let mut r = ray(3)
            .with_field(RayField::new("ZDR", "dB", vec![0.0; 3]))
            .unwrap();
        assert!(r.validate().is_ok());
        r.fields[0].data.push(1.0);
        assert!(r.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_gate_spacing() {
        let mut r = ray(3);
        r.gate_spacing_km = 0.0;
        assert!(matches!(r.validate(), Err(RadarError::InvalidGeometry(_))));
        r.gate_spacing_km = f64::NAN;
        assert!(r.validate().is_err());
    }

    #[test]
    fn test_geometry_ranges() {
        let g = ray(10).geometry();
        assert!((g.range_km(0) - 0.5).abs() < 1e-12);
        assert!((g.range_km(4) - 1.5).abs() < 1e-12);
        assert_eq!(g.gates_within(1.5), 5);
        assert_eq!(g.gates_within(100.0), 10);
        assert_eq!(g.gates_within(0.1), 0);
    }
}
