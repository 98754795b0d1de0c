//! Derived output rays handed to the downstream interpolation stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::field::{RayField, MISSING_F32};
use crate::ray::{Ray, RayGeometry};

/// A derived field on an output ray.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputField {
    /// Semantic identifier (snake_case) for computed fields; `None` for
    /// fields copied through from the input or diagnostic extras
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub long_name: String,
    #[serde(default)]
    pub standard_name: String,
    #[serde(default)]
    pub units: String,
    pub missing: f32,
    pub data: Vec<f32>,
}

impl OutputField {
    pub fn new(name: impl Into<String>, units: impl Into<String>, data: Vec<f32>) -> Self {
        Self {
            id: None,
            name: name.into(),
            long_name: String::new(),
            standard_name: String::new(),
            units: units.into(),
            missing: MISSING_F32,
            data,
        }
    }

    /// Build from a copied input field under a new name.
    pub fn from_input(field: &RayField, output_name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: output_name.into(),
            long_name: String::new(),
            standard_name: String::new(),
            units: field.units.clone(),
            missing: field.missing,
            data: field.data.clone(),
        }
    }

    pub fn is_missing(&self, gate: usize) -> bool {
        self.data.get(gate).map_or(true, |v| *v == self.missing)
    }
}

/// A ray of derived fields, carrying the source ray's metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRay {
    /// Copied verbatim from the source ray
    pub time: DateTime<Utc>,
    pub n_gates: usize,
    pub start_range_km: f64,
    pub gate_spacing_km: f64,
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
    pub nyquist_mps: f64,
    pub fields: Vec<OutputField>,
}

impl OutputRay {
    /// Empty output ray with the metadata of `source`.
    pub fn from_source(source: &Ray) -> Self {
        Self {
            time: source.time,
            n_gates: source.n_gates,
            start_range_km: source.start_range_km,
            gate_spacing_km: source.gate_spacing_km,
            azimuth_deg: source.azimuth_deg,
            elevation_deg: source.elevation_deg,
            nyquist_mps: source.nyquist_mps,
            fields: Vec::new(),
        }
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

    pub fn add_field(&mut self, field: OutputField) {
        self.fields.push(field);
    }

    pub fn field(&self, name: &str) -> Option<&OutputField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Look up a field by its semantic identifier.
    pub fn field_by_id(&self, id: &str) -> Option<&OutputField> {
        self.fields.iter().find(|f| f.id.as_deref() == Some(id))
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Drop all gates beyond `n_gates`.
    pub fn truncate_gates(&mut self, n_gates: usize) {
        if n_gates >= self.n_gates {
            return;
        }
        self.n_gates = n_gates;
        for field in &mut self.fields {
            field.data.truncate(n_gates);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_from_source_copies_metadata() {
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let ray = Ray::new(t, 5, 0.1, 0.15, 42.0, 2.4).with_nyquist(26.0);
        let out = OutputRay::from_source(&ray);
        assert_eq!(out.time, ray.time);
        assert_eq!(out.geometry(), ray.geometry());
        assert_eq!(out.nyquist_mps, 26.0);
        assert!(out.fields.is_empty());
    }

    #[test]
    fn test_truncate_gates() {
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let ray = Ray::new(t, 4, 0.0, 1.0, 0.0, 0.5);
        let mut out = OutputRay::from_source(&ray);
        out.add_field(OutputField::new("RATE", "mm/h", vec![1.0, 2.0, 3.0, 4.0]));
        out.truncate_gates(2);
        assert_eq!(out.n_gates, 2);
        assert_eq!(out.field("RATE").unwrap().data, vec![1.0, 2.0]);
    }
}
