//! Precipitation-rate estimators.
//!
//! Power-law relations in linear units (`Zh` in mm^6/m^3, `Zdr` as a
//! ratio, KDP in deg/km), combined by the blended variants according to
//! thresholds or the particle classification. Rates are in mm/h.

use radar_common::MISSING;
use serde::{Deserialize, Serialize};

use crate::error::{DualpolError, Result};
use crate::filters::is_missing;
use crate::pid::category;

/// The rate estimates produced for every gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateVariant {
    /// Z-R relation for rain
    Zh,
    /// Z-S relation for snow
    ZhSnow,
    ZZdr,
    Kdp,
    KdpZdr,
    /// Threshold blend of the above
    Hybrid,
    /// Selected by particle category
    Pid,
    /// Category-gated blend
    Hidro,
    /// Blend with a hail override
    Bringi,
}

impl RateVariant {
    pub const ALL: [RateVariant; 9] = [
        RateVariant::Zh,
        RateVariant::ZhSnow,
        RateVariant::ZZdr,
        RateVariant::Kdp,
        RateVariant::KdpZdr,
        RateVariant::Hybrid,
        RateVariant::Pid,
        RateVariant::Hidro,
        RateVariant::Bringi,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RateVariant::Zh => "zh",
            RateVariant::ZhSnow => "zh_snow",
            RateVariant::ZZdr => "z_zdr",
            RateVariant::Kdp => "kdp",
            RateVariant::KdpZdr => "kdp_zdr",
            RateVariant::Hybrid => "hybrid",
            RateVariant::Pid => "pid",
            RateVariant::Hidro => "hidro",
            RateVariant::Bringi => "bringi",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Parameters for [`PrecipRates`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrecipParams {
    pub check_snr: bool,
    pub snr_threshold: f64,
    /// Rates below this are reported missing in the output fields
    pub min_valid_rate: f64,
    /// Rates are capped at this value
    pub max_valid_rate: f64,
    /// Reflectivity is capped here before the Z relations
    pub max_valid_dbz: f64,
    /// Added to DBZ at wet-snow gates before the Z relations
    pub brightband_dbz_correction: f64,

    pub zh_aa: f64,
    pub zh_bb: f64,
    pub zh_aa_snow: f64,
    pub zh_bb_snow: f64,
    pub zzdr_aa: f64,
    pub zzdr_bb: f64,
    pub zzdr_cc: f64,
    pub kdp_aa: f64,
    pub kdp_bb: f64,
    pub kdpzdr_aa: f64,
    pub kdpzdr_bb: f64,
    pub kdpzdr_cc: f64,

    pub pid_kdp_threshold: f64,
    pub hybrid_dbz_threshold: f64,
    pub hybrid_kdp_threshold: f64,
    pub hybrid_zdr_threshold: f64,
    pub hidro_dbz_threshold: f64,
    pub hidro_kdp_threshold: f64,
    pub hidro_zdr_threshold: f64,
    pub bringi_dbz_threshold: f64,
    pub bringi_kdp_threshold: f64,
    pub bringi_zdr_threshold: f64,
}

impl Default for PrecipParams {
    fn default() -> Self {
        Self {
            check_snr: true,
            snr_threshold: 0.0,
            min_valid_rate: 0.1,
            max_valid_rate: 250.0,
            max_valid_dbz: 53.0,
            brightband_dbz_correction: 0.0,
            zh_aa: 0.017,
            zh_bb: 0.714,
            zh_aa_snow: 0.0365,
            zh_bb_snow: 0.625,
            zzdr_aa: 0.0067,
            zzdr_bb: 0.927,
            zzdr_cc: -3.43,
            kdp_aa: 40.6,
            kdp_bb: 0.866,
            kdpzdr_aa: 136.0,
            kdpzdr_bb: 0.968,
            kdpzdr_cc: -2.86,
            pid_kdp_threshold: 0.3,
            hybrid_dbz_threshold: 40.0,
            hybrid_kdp_threshold: 0.3,
            hybrid_zdr_threshold: 0.5,
            hidro_dbz_threshold: 38.0,
            hidro_kdp_threshold: 0.3,
            hidro_zdr_threshold: 0.5,
            bringi_dbz_threshold: 38.0,
            bringi_kdp_threshold: 0.3,
            bringi_zdr_threshold: 0.5,
        }
    }
}

impl PrecipParams {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.min_valid_rate < 0.0 {
            return Err(format!(
                "precip.min_valid_rate {} is negative",
                self.min_valid_rate
            ));
        }
        if self.max_valid_rate <= self.min_valid_rate {
            return Err(format!(
                "precip.max_valid_rate {} must exceed min_valid_rate {}",
                self.max_valid_rate, self.min_valid_rate
            ));
        }
        for (name, v) in [
            ("zh_aa", self.zh_aa),
            ("zh_aa_snow", self.zh_aa_snow),
            ("zzdr_aa", self.zzdr_aa),
            ("kdp_aa", self.kdp_aa),
            ("kdpzdr_aa", self.kdpzdr_aa),
        ] {
            if v <= 0.0 {
                return Err(format!("precip.{name} must be positive"));
            }
        }
        Ok(())
    }
}

/// Per-gate inputs for one ray, all normalised to [`MISSING`].
#[derive(Debug, Clone, Copy)]
pub struct PrecipInputs<'a> {
    pub n_gates: usize,
    pub snr: &'a [f64],
    pub dbz: &'a [f64],
    pub zdr: &'a [f64],
    pub kdp: &'a [f64],
    /// Particle category per gate
    pub pid: &'a [i32],
}

/// One rate array per [`RateVariant`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrecipOutputs {
    rates: [Vec<f64>; 9],
}

impl PrecipOutputs {
    pub fn reset(&mut self, n_gates: usize) {
        for v in &mut self.rates {
            v.clear();
            v.resize(n_gates, MISSING);
        }
    }

    pub fn get(&self, variant: RateVariant) -> &[f64] {
        &self.rates[variant.index()]
    }

    pub fn get_mut(&mut self, variant: RateVariant) -> &mut [f64] {
        &mut self.rates[variant.index()]
    }

    fn set(&mut self, variant: RateVariant, gate: usize, value: f64) {
        self.rates[variant.index()][gate] = value;
    }
}

/// Estimates precipitation rates for one ray at a time.
pub trait RateEstimator: Send {
    fn estimate(&mut self, inputs: &PrecipInputs<'_>, out: &mut PrecipOutputs) -> Result<()>;
}

/// Reference rate estimator over all [`RateVariant`]s.
#[derive(Debug, Clone)]
pub struct PrecipRates {
    params: PrecipParams,
}

/// Rates for a single gate before blending.
struct GateRates {
    zh: f64,
    snow: f64,
    zzdr: f64,
    kdp: f64,
    kdpzdr: f64,
}

impl GateRates {
    /// First non-missing of `preferred`, falling back to the Z-R rate.
    fn or_zh(&self, preferred: f64) -> f64 {
        if is_missing(preferred) {
            self.zh
        } else {
            preferred
        }
    }
}

impl PrecipRates {
    pub fn new(params: PrecipParams) -> Result<Self> {
        params.validate().map_err(DualpolError::InvalidParams)?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &PrecipParams {
        &self.params
    }

    fn gate_rates(&self, dbz: f64, zdr: f64, kdp: f64, pid: i32) -> GateRates {
        let p = &self.params;
        let mut dbz = dbz.min(p.max_valid_dbz);
        if pid == category::WET_SNOW {
            dbz += p.brightband_dbz_correction;
        }
        let zh = 10f64.powf(dbz / 10.0);
        let zdr_lin = if is_missing(zdr) {
            None
        } else {
            Some(10f64.powf(zdr / 10.0))
        };
        let kdp = if is_missing(kdp) { None } else { Some(kdp) };

        GateRates {
            zh: p.zh_aa * zh.powf(p.zh_bb),
            snow: p.zh_aa_snow * zh.powf(p.zh_bb_snow),
            zzdr: zdr_lin.map_or(MISSING, |zr| {
                p.zzdr_aa * zh.powf(p.zzdr_bb) * zr.powf(p.zzdr_cc)
            }),
            kdp: kdp.map_or(MISSING, |k| {
                if k > 0.0 {
                    p.kdp_aa * k.powf(p.kdp_bb)
                } else {
                    0.0
                }
            }),
            kdpzdr: match (kdp, zdr_lin) {
                (Some(k), Some(zr)) if k > 0.0 => {
                    p.kdpzdr_aa * k.powf(p.kdpzdr_bb) * zr.powf(p.kdpzdr_cc)
                }
                (Some(_), Some(_)) => 0.0,
                _ => MISSING,
            },
        }
    }

    fn hybrid(&self, r: &GateRates, dbz: f64, zdr: f64, kdp: f64) -> f64 {
        let p = &self.params;
        let heavy =
            !is_missing(kdp) && kdp >= p.hybrid_kdp_threshold && dbz >= p.hybrid_dbz_threshold;
        let oblate = !is_missing(zdr) && zdr >= p.hybrid_zdr_threshold;
        match (heavy, oblate) {
            (true, true) => r.or_zh(r.kdpzdr),
            (true, false) => r.or_zh(r.kdp),
            (false, true) => r.or_zh(r.zzdr),
            (false, false) => r.zh,
        }
    }

    fn by_pid(&self, r: &GateRates, kdp: f64, pid: i32) -> f64 {
        use category::*;
        match pid {
            CLOUD | DRIZZLE | LIGHT_RAIN | SUPERCOOLED_DROPS => r.zh,
            MODERATE_RAIN | HEAVY_RAIN => {
                if !is_missing(kdp) && kdp >= self.params.pid_kdp_threshold {
                    r.or_zh(r.kdp)
                } else {
                    r.zh
                }
            }
            HAIL | RAIN_HAIL_MIXTURE | GRAUPEL_RAIN => r.or_zh(r.kdp),
            GRAUPEL_SMALL_HAIL => r.zh,
            DRY_SNOW | WET_SNOW | ICE_CRYSTALS | IRREG_ICE_CRYSTALS => r.snow,
            id if id <= NONE => MISSING,
            _ => 0.0,
        }
    }

    fn hidro(&self, r: &GateRates, dbz: f64, zdr: f64, kdp: f64, pid: i32) -> f64 {
        let p = &self.params;
        if pid <= category::NONE {
            return MISSING;
        }
        if category::is_rain(pid) {
            let heavy =
                !is_missing(kdp) && kdp > p.hidro_kdp_threshold && dbz > p.hidro_dbz_threshold;
            let oblate = !is_missing(zdr) && zdr > p.hidro_zdr_threshold;
            return match (heavy, oblate) {
                (true, true) => r.or_zh(r.kdpzdr),
                (true, false) => r.or_zh(r.kdp),
                (false, true) => r.or_zh(r.zzdr),
                (false, false) => r.zh,
            };
        }
        if category::is_ice(pid) {
            return r.snow;
        }
        if matches!(pid, category::HAIL | category::CLOUD | category::SUPERCOOLED_DROPS) {
            return r.or_zh(r.kdp);
        }
        0.0
    }

    fn bringi(&self, r: &GateRates, dbz: f64, zdr: f64, kdp: f64, pid: i32) -> f64 {
        let p = &self.params;
        if matches!(pid, category::HAIL | category::RAIN_HAIL_MIXTURE) {
            return r.or_zh(r.kdp);
        }
        let heavy =
            !is_missing(kdp) && kdp > p.bringi_kdp_threshold && dbz > p.bringi_dbz_threshold;
        let oblate = !is_missing(zdr) && zdr > p.bringi_zdr_threshold;
        if heavy {
            if oblate {
                r.or_zh(r.kdpzdr)
            } else {
                r.or_zh(r.kdp)
            }
        } else if oblate {
            r.or_zh(r.zzdr)
        } else {
            r.zh
        }
    }
}

impl RateEstimator for PrecipRates {
    fn estimate(&mut self, inputs: &PrecipInputs<'_>, out: &mut PrecipOutputs) -> Result<()> {
        let n = inputs.n_gates;
        for (name, data) in [
            ("snr", inputs.snr),
            ("dbz", inputs.dbz),
            ("zdr", inputs.zdr),
            ("kdp", inputs.kdp),
        ] {
            crate::check_len(name, data, n)?;
        }
        if inputs.pid.len() < n {
            return Err(DualpolError::input_length("pid", n, inputs.pid.len()));
        }

        out.reset(n);
        let max_rate = self.params.max_valid_rate;
        for i in 0..n {
            let dbz = inputs.dbz[i];
            if is_missing(dbz) {
                continue;
            }
            let snr = inputs.snr[i];
            if self.params.check_snr && (is_missing(snr) || snr < self.params.snr_threshold) {
                for variant in RateVariant::ALL {
                    out.set(variant, i, 0.0);
                }
                continue;
            }

            let (zdr, kdp, pid) = (inputs.zdr[i], inputs.kdp[i], inputs.pid[i]);
            let r = self.gate_rates(dbz, zdr, kdp, pid);
            let values = [
                (RateVariant::Zh, r.zh),
                (RateVariant::ZhSnow, r.snow),
                (RateVariant::ZZdr, r.zzdr),
                (RateVariant::Kdp, r.kdp),
                (RateVariant::KdpZdr, r.kdpzdr),
                (RateVariant::Hybrid, self.hybrid(&r, dbz, zdr, kdp)),
                (RateVariant::Pid, self.by_pid(&r, kdp, pid)),
                (RateVariant::Hidro, self.hidro(&r, dbz, zdr, kdp, pid)),
                (RateVariant::Bringi, self.bringi(&r, dbz, zdr, kdp, pid)),
            ];
            for (variant, value) in values {
                let value = if is_missing(value) { MISSING } else { value.min(max_rate) };
                out.set(variant, i, value);
            }
        }
        Ok(())
    }
}
