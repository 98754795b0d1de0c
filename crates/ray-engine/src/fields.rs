//! The output field table: which computed arrays are written, and under
//! what names.

use dualpol::RateVariant;
use serde::{Deserialize, Serialize};

/// Semantic identifier of a computed output field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFieldId {
    Snr,
    Dbz,
    Zdr,
    Zdp,
    Ldr,
    Rhohv,
    Phidp,
    Kdp,
    KdpSelfConsistent,
    DbzAttenCorrection,
    ZdrAttenCorrection,
    DbzAttenCorrected,
    ZdrAttenCorrected,
    Pid,
    PidInterest,
    Temp,
    BeamHeight,
    RateZh,
    RateZhSnow,
    RateZZdr,
    RateKdp,
    RateKdpZdr,
    RateHybrid,
    RatePid,
    RateHidro,
    RateBringi,
    RlanFlag,
    ZdrInIce,
    ZdrmInIce,
    ZdrInBragg,
    ZdrmInBragg,
}

impl OutputFieldId {
    /// The rate estimator behind a rate field.
    pub fn rate_variant(&self) -> Option<RateVariant> {
        let variant = match self {
            Self::RateZh => RateVariant::Zh,
            Self::RateZhSnow => RateVariant::ZhSnow,
            Self::RateZZdr => RateVariant::ZZdr,
            Self::RateKdp => RateVariant::Kdp,
            Self::RateKdpZdr => RateVariant::KdpZdr,
            Self::RateHybrid => RateVariant::Hybrid,
            Self::RatePid => RateVariant::Pid,
            Self::RateHidro => RateVariant::Hidro,
            Self::RateBringi => RateVariant::Bringi,
            _ => return None,
        };
        Some(variant)
    }

    pub fn is_rate(&self) -> bool {
        self.rate_variant().is_some()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Snr => "snr",
            Self::Dbz => "dbz",
            Self::Zdr => "zdr",
            Self::Zdp => "zdp",
            Self::Ldr => "ldr",
            Self::Rhohv => "rhohv",
            Self::Phidp => "phidp",
            Self::Kdp => "kdp",
            Self::KdpSelfConsistent => "kdp_self_consistent",
            Self::DbzAttenCorrection => "dbz_atten_correction",
            Self::ZdrAttenCorrection => "zdr_atten_correction",
            Self::DbzAttenCorrected => "dbz_atten_corrected",
            Self::ZdrAttenCorrected => "zdr_atten_corrected",
            Self::Pid => "pid",
            Self::PidInterest => "pid_interest",
            Self::Temp => "temp",
            Self::BeamHeight => "beam_height",
            Self::RateZh => "rate_zh",
            Self::RateZhSnow => "rate_zh_snow",
            Self::RateZZdr => "rate_z_zdr",
            Self::RateKdp => "rate_kdp",
            Self::RateKdpZdr => "rate_kdp_zdr",
            Self::RateHybrid => "rate_hybrid",
            Self::RatePid => "rate_pid",
            Self::RateHidro => "rate_hidro",
            Self::RateBringi => "rate_bringi",
            Self::RlanFlag => "rlan_flag",
            Self::ZdrInIce => "zdr_in_ice",
            Self::ZdrmInIce => "zdrm_in_ice",
            Self::ZdrInBragg => "zdr_in_bragg",
            Self::ZdrmInBragg => "zdrm_in_bragg",
        }
    }
}

impl std::fmt::Display for OutputFieldId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry of the output field table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputFieldSpec {
    pub id: OutputFieldId,
    pub name: String,
    #[serde(default)]
    pub long_name: String,
    #[serde(default)]
    pub standard_name: String,
    #[serde(default)]
    pub units: String,
}

impl OutputFieldSpec {
    pub fn new(
        id: OutputFieldId,
        name: &str,
        long_name: &str,
        standard_name: &str,
        units: &str,
    ) -> Self {
        Self {
            id,
            name: name.to_string(),
            long_name: long_name.to_string(),
            standard_name: standard_name.to_string(),
            units: units.to_string(),
        }
    }
}

/// An input field copied through to the output, optionally censored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyFieldSpec {
    pub input_name: String,
    pub output_name: String,
    /// Blank gates classified as non-weather
    #[serde(default)]
    pub censor_non_weather: bool,
}

/// Fields written when the configuration does not list any.
pub fn default_output_fields() -> Vec<OutputFieldSpec> {
    use OutputFieldId::*;
    vec![
        OutputFieldSpec::new(Snr, "SNR", "signal_to_noise_ratio", "", "dB"),
        OutputFieldSpec::new(
            Kdp,
            "KDP",
            "specific_differential_phase",
            "radar_specific_differential_phase_hv",
            "deg/km",
        ),
        OutputFieldSpec::new(
            KdpSelfConsistent,
            "KDP_SC",
            "kdp_from_self_consistency",
            "",
            "deg/km",
        ),
        OutputFieldSpec::new(
            DbzAttenCorrected,
            "DBZ_ATTEN_CORRECTED",
            "reflectivity_corrected_for_attenuation",
            "",
            "dBZ",
        ),
        OutputFieldSpec::new(
            ZdrAttenCorrected,
            "ZDR_ATTEN_CORRECTED",
            "zdr_corrected_for_attenuation",
            "",
            "dB",
        ),
        OutputFieldSpec::new(Pid, "PID", "particle_id", "hydrometeor_type", ""),
        OutputFieldSpec::new(PidInterest, "PID_INTEREST", "particle_id_interest", "", ""),
        OutputFieldSpec::new(Temp, "TEMP_FOR_PID", "temperature_for_pid", "air_temperature", "C"),
        OutputFieldSpec::new(RateZh, "RATE_ZH", "precip_rate_from_z", "", "mm/h"),
        OutputFieldSpec::new(RateZhSnow, "RATE_ZH_SNOW", "snow_rate_from_z", "", "mm/h"),
        OutputFieldSpec::new(RateZZdr, "RATE_Z_ZDR", "precip_rate_from_z_and_zdr", "", "mm/h"),
        OutputFieldSpec::new(RateKdp, "RATE_KDP", "precip_rate_from_kdp", "", "mm/h"),
        OutputFieldSpec::new(
            RateKdpZdr,
            "RATE_KDP_ZDR",
            "precip_rate_from_kdp_and_zdr",
            "",
            "mm/h",
        ),
        OutputFieldSpec::new(RateHybrid, "RATE_HYBRID", "precip_rate_hybrid", "", "mm/h"),
        OutputFieldSpec::new(RatePid, "RATE_PID", "precip_rate_from_pid", "", "mm/h"),
        OutputFieldSpec::new(RateHidro, "RATE_HIDRO", "precip_rate_hidro", "", "mm/h"),
        OutputFieldSpec::new(RateBringi, "RATE_BRINGI", "precip_rate_bringi", "", "mm/h"),
    ]
}
