//! Engine configuration.

use std::path::{Path, PathBuf};

use dualpol::{category, KdpParams, PidParams, PrecipParams, RlanParams, SelfConParams, ZdrBiasParams};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::fields::{default_output_fields, CopyFieldSpec, OutputFieldSpec};
use crate::profile::ProfilePoint;

/// Configuration for the ray engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of worker threads, fixed for the life of the pool.
    pub n_workers: usize,

    /// Names of the input fields on each ray.
    pub field_names: FieldNames,

    /// Whether the corresponding optional fields are present on input rays.
    pub snr_available: bool,
    pub ldr_available: bool,
    pub kdp_available: bool,
    pub temp_available: bool,
    pub ncp_available: bool,

    /// Receiver noise at 100 km, used to derive SNR from DBZ.
    pub noise_dbz_at_100km: f64,

    /// Feed attenuation-corrected DBZ/ZDR to classification and rates.
    pub use_attenuation_corrected: bool,

    /// Feed the self-consistency KDP instead of the direct estimate.
    pub use_self_consistency_kdp: bool,

    /// Override of the 4/3 effective earth radius ratio.
    pub pseudo_earth_radius_ratio: Option<f64>,

    pub kdp: KdpParams,
    pub pid: PidParams,
    pub precip: PrecipParams,

    /// Flag radio LAN interference; needs VEL and the ray's Nyquist.
    pub locate_rlan_interference: bool,
    pub rlan: RlanParams,

    /// Collect gates for volume ZDR bias; needs VEL, ZDRM and RHOHV_NNC.
    pub estimate_zdr_bias_in_ice: bool,
    pub estimate_zdr_bias_in_bragg: bool,
    pub zdr_bias: ZdrBiasParams,

    /// Check Z/ZDR/PHIDP self-consistency in rain for a volume Z bias.
    pub estimate_z_bias_using_self_consistency: bool,
    pub self_consistency: SelfConParams,

    /// Computed fields written to each output ray.
    pub output_fields: Vec<OutputFieldSpec>,

    /// Copy input fields through to the output.
    pub copy_input_fields: bool,
    pub copy_fields: Vec<CopyFieldSpec>,

    /// Category ids treated as non-weather when censoring copied fields.
    pub non_weather_classes: Vec<i32>,
    /// Gates with category ids outside this range are also censored.
    pub valid_class_min: i32,
    pub valid_class_max: i32,

    pub diagnostics: DiagnosticsConfig,

    /// Output rays are truncated beyond this range.
    pub max_range_km: Option<f64>,

    pub profile: ProfileConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            n_workers: 4,
            field_names: FieldNames::default(),
            snr_available: false,
            ldr_available: false,
            kdp_available: false,
            temp_available: false,
            ncp_available: false,
            noise_dbz_at_100km: 0.0,
            use_attenuation_corrected: true,
            use_self_consistency_kdp: false,
            pseudo_earth_radius_ratio: None,
            kdp: KdpParams::default(),
            pid: PidParams::default(),
            precip: PrecipParams::default(),
            locate_rlan_interference: false,
            rlan: RlanParams::default(),
            estimate_zdr_bias_in_ice: false,
            estimate_zdr_bias_in_bragg: false,
            zdr_bias: ZdrBiasParams::default(),
            estimate_z_bias_using_self_consistency: false,
            self_consistency: SelfConParams::default(),
            output_fields: default_output_fields(),
            copy_input_fields: false,
            copy_fields: Vec::new(),
            non_weather_classes: category::NON_WEATHER.to_vec(),
            valid_class_min: category::CLOUD,
            valid_class_max: category::SATURATED_SNR,
            diagnostics: DiagnosticsConfig::default(),
            max_range_km: None,
            profile: ProfileConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Read a YAML configuration file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply environment variable overrides on top of this configuration.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("RAY_ENGINE_WORKERS") {
            if let Ok(n) = val.parse() {
                self.n_workers = n;
            }
        }

        if let Ok(val) = std::env::var("RAY_ENGINE_NOISE_DBZ_AT_100KM") {
            if let Ok(noise) = val.parse() {
                self.noise_dbz_at_100km = noise;
            }
        }

        if let Ok(val) = std::env::var("RAY_ENGINE_MAX_RANGE_KM") {
            if let Ok(range) = val.parse() {
                self.max_range_km = Some(range);
            }
        }

        if let Ok(val) = std::env::var("RAY_ENGINE_SOUNDING_DIR") {
            self.profile.source = ProfileSourceKind::SoundingDir;
            self.profile.dir = Some(PathBuf::from(val));
        }

        if let Ok(val) = std::env::var("RAY_ENGINE_DEBUG_FIELDS") {
            self.diagnostics.debug_fields = val.to_lowercase() == "true" || val == "1";
        }

        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.n_workers == 0 {
            return Err("n_workers must be > 0".to_string());
        }

        if !self.noise_dbz_at_100km.is_finite() {
            return Err("noise_dbz_at_100km must be finite".to_string());
        }

        if let Some(ratio) = self.pseudo_earth_radius_ratio {
            if ratio <= 0.0 || !ratio.is_finite() {
                return Err(format!("pseudo_earth_radius_ratio {ratio} must be > 0"));
            }
        }

        if let Some(range) = self.max_range_km {
            if range <= 0.0 {
                return Err(format!("max_range_km {range} must be > 0"));
            }
        }

        if self.valid_class_min > self.valid_class_max {
            return Err(format!(
                "valid_class_min {} exceeds valid_class_max {}",
                self.valid_class_min, self.valid_class_max
            ));
        }

        let mut names: Vec<&str> = self.output_fields.iter().map(|f| f.name.as_str()).collect();
        if self.copy_input_fields {
            names.extend(self.copy_fields.iter().map(|f| f.output_name.as_str()));
        }
        if names.iter().any(|n| n.is_empty()) {
            return Err("output field names must not be empty".to_string());
        }
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        if names.len() != total {
            return Err("output field names must be unique".to_string());
        }

        self.kdp.validate()?;
        self.pid.validate()?;
        self.precip.validate()?;
        self.rlan.validate()?;
        self.zdr_bias.validate()?;
        self.self_consistency.validate()?;
        self.profile.validate()?;
        Ok(())
    }

    /// Validate, mapping failures to [`EngineError::FatalConfig`].
    pub fn check(&self) -> Result<()> {
        self.validate().map_err(EngineError::FatalConfig)
    }

    /// Whether either ZDR bias region is collected.
    pub fn estimates_zdr_bias(&self) -> bool {
        self.estimate_zdr_bias_in_ice || self.estimate_zdr_bias_in_bragg
    }

    /// Effective earth radius ratio for beam height.
    pub fn earth_radius_ratio(&self) -> f64 {
        self.pseudo_earth_radius_ratio.unwrap_or(4.0 / 3.0)
    }
}

/// Names of the input fields on each ray.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldNames {
    pub dbz: String,
    pub zdr: String,
    pub phidp: String,
    pub rhohv: String,
    pub snr: String,
    pub ldr: String,
    pub kdp: String,
    pub temp: String,
    pub vel: String,
    pub ncp: String,
    /// ZDR before any correction
    pub zdrm: String,
    /// RHOHV without noise correction
    pub rhohv_nnc: String,
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            dbz: "DBZ".to_string(),
            zdr: "ZDR".to_string(),
            phidp: "PHIDP".to_string(),
            rhohv: "RHOHV".to_string(),
            snr: "SNR".to_string(),
            ldr: "LDR".to_string(),
            kdp: "KDP".to_string(),
            temp: "TEMP".to_string(),
            vel: "VEL".to_string(),
            ncp: "NCP".to_string(),
            zdrm: "ZDRM".to_string(),
            rhohv_nnc: "RHOHV_NNC".to_string(),
        }
    }
}

/// Extra fields appended to each output ray.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Every intermediate array from ingestion through rate estimation
    pub debug_fields: bool,
    /// One `<label>_interest` field per particle category
    pub particle_interest_fields: bool,
}

/// Where temperature profiles come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileSourceKind {
    /// Always use `default_profile` (or the standard atmosphere)
    #[default]
    Static,
    /// Nearest JSON sounding in `dir`
    SoundingDir,
}

/// Temperature profile configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub source: ProfileSourceKind,
    pub dir: Option<PathBuf>,
    /// Soundings further than this from the volume time are ignored.
    pub search_margin_secs: i64,
    /// Require soundings to span `[min_height_km, max_height_km]`.
    pub check_height_range: bool,
    pub min_height_km: f64,
    pub max_height_km: f64,
    /// Reject soundings whose pressure does not decrease with height.
    pub check_pressure_decreasing: bool,
    /// Added to every sounding height.
    pub height_correction_km: f64,
    pub min_points: usize,
    /// Used when no sounding is configured or found; the standard
    /// atmosphere when empty.
    pub default_profile: Vec<ProfilePoint>,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            source: ProfileSourceKind::Static,
            dir: None,
            search_margin_secs: 86_400,
            check_height_range: false,
            min_height_km: 0.5,
            max_height_km: 8.0,
            check_pressure_decreasing: false,
            height_correction_km: 0.0,
            min_points: 2,
            default_profile: Vec::new(),
        }
    }
}

impl ProfileConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.source == ProfileSourceKind::SoundingDir && self.dir.is_none() {
            return Err("profile.dir is required for the sounding_dir source".to_string());
        }
        if self.search_margin_secs < 0 {
            return Err("profile.search_margin_secs must be >= 0".to_string());
        }
        if self.check_height_range && self.min_height_km >= self.max_height_km {
            return Err(format!(
                "profile height range [{}, {}] is empty",
                self.min_height_km, self.max_height_km
            ));
        }
        if self.min_points < 2 {
            return Err("profile.min_points must be >= 2".to_string());
        }
        if !self.default_profile.is_empty() && self.default_profile.len() < 2 {
            return Err("profile.default_profile needs at least 2 points".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.non_weather_classes, vec![15, 16, 17]);
        assert!((config.earth_radius_ratio() - 4.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
n_workers: 8
snr_available: true
field_names:
  dbz: DBZ_F
precip:
  min_valid_rate: 0.5
diagnostics:
  particle_interest_fields: true
"#;
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.n_workers, 8);
        assert!(config.snr_available);
        assert_eq!(config.field_names.dbz, "DBZ_F");
        assert_eq!(config.field_names.zdr, "ZDR");
        assert_eq!(config.precip.min_valid_rate, 0.5);
        assert_eq!(config.precip.zh_aa, PrecipParams::default().zh_aa);
        assert!(config.diagnostics.particle_interest_fields);
        assert!(!config.diagnostics.debug_fields);
        assert_eq!(config.output_fields, default_output_fields());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = EngineConfig {
            max_range_km: Some(150.0),
            copy_input_fields: true,
            copy_fields: vec![CopyFieldSpec {
                input_name: "VEL".to_string(),
                output_name: "VEL_CENSORED".to_string(),
                censor_non_weather: true,
            }],
            ..Default::default()
        };
        let yaml = serde_yaml::to_string(&config).unwrap();
        let back = EngineConfig::from_yaml(&yaml).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_validation_errors() {
        let config = EngineConfig {
            n_workers: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            valid_class_min: 10,
            valid_class_max: 5,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.output_fields[1].name = "SNR".to_string();
        assert!(config.validate().unwrap_err().contains("unique"));

        let mut config = EngineConfig::default();
        config.profile.source = ProfileSourceKind::SoundingDir;
        assert!(matches!(config.check(), Err(EngineError::FatalConfig(_))));
    }

    #[test]
    fn test_bias_and_rlan_sections_from_yaml() {
        let yaml = r#"
estimate_zdr_bias_in_ice: true
zdr_bias:
  min_abs_vel: 2.0
self_consistency:
  relation: polynomial
rlan:
  n_gates_kernel: 11
"#;
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert!(config.estimates_zdr_bias());
        assert!(!config.estimate_zdr_bias_in_bragg);
        assert_eq!(config.zdr_bias.min_abs_vel, 2.0);
        assert_eq!(config.zdr_bias.ice, dualpol::ZdrRegionParams::ice());
        assert_eq!(config.self_consistency.relation, dualpol::KdpRelation::Polynomial);
        assert_eq!(config.rlan.n_gates_kernel, 11);
        assert_eq!(config.field_names.zdrm, "ZDRM");
        assert!(config.validate().is_ok());

        let mut config = EngineConfig::default();
        config.rlan.n_gates_kernel = 1;
        assert!(config.validate().unwrap_err().contains("rlan"));
    }

    #[test]
    fn test_copy_field_names_checked_only_when_enabled() {
        let mut config = EngineConfig::default();
        config.copy_fields.push(CopyFieldSpec {
            input_name: "DBZ".to_string(),
            output_name: "SNR".to_string(),
            censor_non_weather: false,
        });
        assert!(config.validate().is_ok());
        config.copy_input_fields = true;
        assert!(config.validate().is_err());
    }
}
