//! Per-gate input fields.

use serde::{Deserialize, Serialize};

/// Missing-data sentinel used by every computed array.
pub const MISSING: f64 = -9999.0;

/// `MISSING` as stored in output fields.
pub const MISSING_F32: f32 = -9999.0;

/// A named per-gate field on an input ray.
///
/// Each field carries its own missing value; consumers normalise it to
/// [`MISSING`] when they load the data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RayField {
    /// Field name (e.g., "DBZ", "ZDR")
    pub name: String,
    /// Units string (e.g., "dBZ", "deg")
    #[serde(default)]
    pub units: String,
    /// Value used for gates with no data
    #[serde(default = "default_missing")]
    pub missing: f32,
    /// One value per gate
    pub data: Vec<f32>,
}

fn default_missing() -> f32 {
    MISSING_F32
}

impl RayField {
    pub fn new(name: impl Into<String>, units: impl Into<String>, data: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            units: units.into(),
            missing: MISSING_F32,
            data,
        }
    }

    /// Same field with a custom missing value.
    pub fn with_missing(mut self, missing: f32) -> Self {
        self.missing = missing;
        self
    }

    pub fn n_gates(&self) -> usize {
        self.data.len()
    }

    /// Whether the value at `gate` is flagged missing (or not finite).
    pub fn is_missing(&self, gate: usize) -> bool {
        match self.data.get(gate) {
            Some(v) => *v == self.missing || !v.is_finite(),
            None => true,
        }
    }

    /// Copy the data into `out` as f64, mapping missing values to [`MISSING`].
    ///
    /// `out` must be at least as long as the field.
    pub fn load_into(&self, out: &mut [f64]) {
        for (dst, &v) in out.iter_mut().zip(self.data.iter()) {
            *dst = if v == self.missing || !v.is_finite() {
                MISSING
            } else {
                v as f64
            };
        }
    }

    /// Set one gate to this field's missing value.
    pub fn set_gate_missing(&mut self, gate: usize) {
        let missing = self.missing;
        if let Some(v) = self.data.get_mut(gate) {
            *v = missing;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_into_normalises_missing() {
        let field = RayField::new("DBZ", "dBZ", vec![10.0, -32768.0, f32::NAN, 25.5])
            .with_missing(-32768.0);
        let mut out = vec![0.0; 4];
        field.load_into(&mut out);
        assert_eq!(out, vec![10.0, MISSING, MISSING, 25.5]);
    }

    #[test]
    fn test_set_gate_missing() {
        let mut field = RayField::new("DBZ", "dBZ", vec![1.0, 2.0, 3.0]);
        field.set_gate_missing(1);
        assert!(field.is_missing(1));
        assert!(!field.is_missing(0));
        // out of range is a no-op
        field.set_gate_missing(10);
        assert!(field.is_missing(10));
    }
}
