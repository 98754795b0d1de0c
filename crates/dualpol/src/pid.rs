//! Fuzzy-logic particle identification.
//!
//! Each category has a trapezoidal membership function per input variable.
//! A gate's interest in a category is the weighted mean of its memberships
//! over the variables that are present; the category with the highest
//! interest wins if it clears `min_valid_interest`.

use radar_common::MISSING;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DualpolError, Result};
use crate::filters::{is_missing, median_filter, running_sdev};

/// Category ids shared by the classifier, the rate estimators and output
/// censoring. Ids `<= 0` mean "no class".
pub mod category {
    pub const NONE: i32 = 0;
    pub const CLOUD: i32 = 1;
    pub const DRIZZLE: i32 = 2;
    pub const LIGHT_RAIN: i32 = 3;
    pub const MODERATE_RAIN: i32 = 4;
    pub const HEAVY_RAIN: i32 = 5;
    pub const HAIL: i32 = 6;
    pub const RAIN_HAIL_MIXTURE: i32 = 7;
    pub const GRAUPEL_SMALL_HAIL: i32 = 8;
    pub const GRAUPEL_RAIN: i32 = 9;
    pub const DRY_SNOW: i32 = 10;
    pub const WET_SNOW: i32 = 11;
    pub const ICE_CRYSTALS: i32 = 12;
    pub const IRREG_ICE_CRYSTALS: i32 = 13;
    pub const SUPERCOOLED_DROPS: i32 = 14;
    pub const FLYING_INSECTS: i32 = 15;
    pub const SECOND_TRIP: i32 = 16;
    pub const GROUND_CLUTTER: i32 = 17;
    pub const CHAFF: i32 = 18;
    pub const MISC: i32 = 19;
    pub const SATURATED_SNR: i32 = 20;

    /// Default non-weather categories.
    pub const NON_WEATHER: [i32; 3] = [FLYING_INSECTS, SECOND_TRIP, GROUND_CLUTTER];

    /// Short label for a category id.
    pub fn label(id: i32) -> Option<&'static str> {
        let label = match id {
            CLOUD => "cl",
            DRIZZLE => "drz",
            LIGHT_RAIN => "lr",
            MODERATE_RAIN => "mr",
            HEAVY_RAIN => "hr",
            HAIL => "ha",
            RAIN_HAIL_MIXTURE => "rh",
            GRAUPEL_SMALL_HAIL => "gsh",
            GRAUPEL_RAIN => "grr",
            DRY_SNOW => "ds",
            WET_SNOW => "ws",
            ICE_CRYSTALS => "ic",
            IRREG_ICE_CRYSTALS => "iic",
            SUPERCOOLED_DROPS => "sld",
            FLYING_INSECTS => "bgs",
            SECOND_TRIP => "trip2",
            GROUND_CLUTTER => "gcl",
            CHAFF => "chaff",
            MISC => "misc",
            SATURATED_SNR => "sat_snr",
            _ => return None,
        };
        Some(label)
    }

    pub fn is_rain(id: i32) -> bool {
        matches!(
            id,
            DRIZZLE | LIGHT_RAIN | MODERATE_RAIN | HEAVY_RAIN | RAIN_HAIL_MIXTURE | GRAUPEL_RAIN
        )
    }

    pub fn is_ice(id: i32) -> bool {
        matches!(
            id,
            DRY_SNOW | WET_SNOW | ICE_CRYSTALS | IRREG_ICE_CRYSTALS | GRAUPEL_SMALL_HAIL
        )
    }
}

/// Trapezoidal membership: 0 outside `(x1, x4)`, 1 on `[x2, x3]`.
///
/// Serialized as `[x1, x2, x3, x4]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct Membership {
    pub x1: f64,
    pub x2: f64,
    pub x3: f64,
    pub x4: f64,
}

impl From<[f64; 4]> for Membership {
    fn from(v: [f64; 4]) -> Self {
        Self {
            x1: v[0],
            x2: v[1],
            x3: v[2],
            x4: v[3],
        }
    }
}

impl From<Membership> for [f64; 4] {
    fn from(m: Membership) -> Self {
        [m.x1, m.x2, m.x3, m.x4]
    }
}

impl Membership {
    pub const fn new(x1: f64, x2: f64, x3: f64, x4: f64) -> Self {
        Self { x1, x2, x3, x4 }
    }

    pub fn interest(&self, v: f64) -> f64 {
        if v <= self.x1 || v >= self.x4 {
            0.0
        } else if v < self.x2 {
            (v - self.x1) / (self.x2 - self.x1)
        } else if v <= self.x3 {
            1.0
        } else {
            (self.x4 - v) / (self.x4 - self.x3)
        }
    }

    fn is_ordered(&self) -> bool {
        self.x1 <= self.x2 && self.x2 <= self.x3 && self.x3 <= self.x4
    }
}

/// Membership functions for one category. Variables without a function
/// do not contribute to that category's interest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassThresholds {
    pub id: i32,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dbz: Option<Membership>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zdr: Option<Membership>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kdp: Option<Membership>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ldr: Option<Membership>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rhohv: Option<Membership>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdzdr: Option<Membership>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdphidp: Option<Membership>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp: Option<Membership>,
}

impl ClassThresholds {
    fn new(id: i32) -> Self {
        Self {
            id,
            label: category::label(id).unwrap_or("unknown").to_string(),
            dbz: None,
            zdr: None,
            kdp: None,
            ldr: None,
            rhohv: None,
            sdzdr: None,
            sdphidp: None,
            temp: None,
        }
    }

    fn memberships(&self) -> [Option<&Membership>; 8] {
        [
            self.dbz.as_ref(),
            self.zdr.as_ref(),
            self.kdp.as_ref(),
            self.ldr.as_ref(),
            self.rhohv.as_ref(),
            self.sdzdr.as_ref(),
            self.sdphidp.as_ref(),
            self.temp.as_ref(),
        ]
    }
}

/// Relative weight of each input variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PidWeights {
    pub dbz: f64,
    pub zdr: f64,
    pub kdp: f64,
    pub ldr: f64,
    pub rhohv: f64,
    pub sdzdr: f64,
    pub sdphidp: f64,
    pub temp: f64,
}

impl Default for PidWeights {
    fn default() -> Self {
        Self {
            dbz: 1.5,
            zdr: 1.0,
            kdp: 1.0,
            ldr: 0.5,
            rhohv: 1.0,
            sdzdr: 0.5,
            sdphidp: 0.5,
            temp: 1.5,
        }
    }
}

impl PidWeights {
    fn as_array(&self) -> [f64; 8] {
        [
            self.dbz,
            self.zdr,
            self.kdp,
            self.ldr,
            self.rhohv,
            self.sdzdr,
            self.sdphidp,
            self.temp,
        ]
    }
}

/// Parameters for [`FuzzyPid`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PidParams {
    /// Gates below this SNR are not classified
    pub snr_threshold: f64,
    /// Gates above this SNR are flagged `SATURATED_SNR`
    pub snr_upper_threshold: f64,
    pub min_valid_interest: f64,
    /// Window for the ZDR and PHIDP texture fields
    pub sdev_window_gates: usize,
    /// Median filter lengths applied to DBZ and ZDR before classifying
    /// (0 disables)
    pub dbz_median_len: usize,
    pub zdr_median_len: usize,
    pub weights: PidWeights,
    pub classes: Vec<ClassThresholds>,
}

impl Default for PidParams {
    fn default() -> Self {
        Self {
            snr_threshold: 3.0,
            snr_upper_threshold: 100.0,
            min_valid_interest: 0.5,
            sdev_window_gates: 9,
            dbz_median_len: 0,
            zdr_median_len: 0,
            weights: PidWeights::default(),
            classes: default_classes(),
        }
    }
}

impl PidParams {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.classes.is_empty() {
            return Err("pid.classes is empty".to_string());
        }
        let mut seen = Vec::with_capacity(self.classes.len());
        for class in &self.classes {
            if class.id <= 0 {
                return Err(format!("pid class '{}' has id {} <= 0", class.label, class.id));
            }
            if seen.contains(&class.id) {
                return Err(format!("pid class id {} appears twice", class.id));
            }
            seen.push(class.id);
            if class.label.is_empty() {
                return Err(format!("pid class {} has an empty label", class.id));
            }
            if class.memberships().iter().flatten().any(|m| !m.is_ordered()) {
                return Err(format!("pid class '{}' has an unordered membership", class.label));
            }
        }
        if self.weights.as_array().iter().any(|w| *w < 0.0) {
            return Err("pid weights must be non-negative".to_string());
        }
        if !(0.0..=1.0).contains(&self.min_valid_interest) {
            return Err(format!(
                "pid.min_valid_interest {} outside [0, 1]",
                self.min_valid_interest
            ));
        }
        Ok(())
    }
}

/// S-band membership table.
fn default_classes() -> Vec<ClassThresholds> {
    use category::*;
    let m = Membership::new;
    let warm = m(-10.0, 0.0, 40.0, 45.0);

    let mut table = Vec::new();
    let mut add = |id: i32, f: &dyn Fn(&mut ClassThresholds)| {
        let mut c = ClassThresholds::new(id);
        f(&mut c);
        table.push(c);
    };

    add(CLOUD, &|c: &mut ClassThresholds| {
        c.dbz = Some(m(-40.0, -35.0, 5.0, 10.0));
        c.zdr = Some(m(-0.5, 0.0, 0.3, 0.6));
        c.rhohv = Some(m(0.95, 0.97, 1.0, 1.01));
    });
    add(DRIZZLE, &|c: &mut ClassThresholds| {
        c.dbz = Some(m(5.0, 10.0, 18.0, 25.0));
        c.zdr = Some(m(-0.2, 0.0, 0.6, 1.0));
        c.kdp = Some(m(-0.1, 0.0, 0.03, 0.05));
        c.rhohv = Some(m(0.95, 0.97, 1.0, 1.01));
        c.temp = Some(warm);
    });
    add(LIGHT_RAIN, &|c: &mut ClassThresholds| {
        c.dbz = Some(m(20.0, 25.0, 30.0, 38.0));
        c.zdr = Some(m(0.1, 0.4, 1.0, 1.5));
        c.kdp = Some(m(-0.1, 0.0, 0.1, 0.3));
        c.rhohv = Some(m(0.95, 0.97, 1.0, 1.01));
        c.temp = Some(warm);
    });
    add(MODERATE_RAIN, &|c: &mut ClassThresholds| {
        c.dbz = Some(m(30.0, 35.0, 40.0, 45.0));
        c.zdr = Some(m(0.5, 1.0, 2.0, 2.5));
        c.kdp = Some(m(0.1, 0.25, 0.6, 1.0));
        c.rhohv = Some(m(0.95, 0.97, 1.0, 1.01));
        c.temp = Some(warm);
    });
    add(HEAVY_RAIN, &|c: &mut ClassThresholds| {
        c.dbz = Some(m(40.0, 45.0, 55.0, 60.0));
        c.zdr = Some(m(1.5, 2.0, 4.0, 5.0));
        c.kdp = Some(m(0.5, 1.0, 4.0, 6.0));
        c.rhohv = Some(m(0.92, 0.95, 1.0, 1.01));
        c.temp = Some(warm);
    });
    add(HAIL, &|c: &mut ClassThresholds| {
        c.dbz = Some(m(50.0, 55.0, 75.0, 80.0));
        c.zdr = Some(m(-1.5, -0.5, 0.5, 1.0));
        c.kdp = Some(m(-1.0, -0.5, 0.5, 1.0));
        c.rhohv = Some(m(0.75, 0.8, 0.95, 0.97));
        c.temp = Some(m(-40.0, -20.0, 30.0, 35.0));
    });
    add(RAIN_HAIL_MIXTURE, &|c: &mut ClassThresholds| {
        c.dbz = Some(m(45.0, 50.0, 70.0, 75.0));
        c.zdr = Some(m(-0.5, 0.0, 3.0, 4.0));
        c.kdp = Some(m(0.5, 1.0, 5.0, 8.0));
        c.rhohv = Some(m(0.8, 0.85, 0.95, 0.97));
        c.temp = Some(warm);
    });
    add(GRAUPEL_SMALL_HAIL, &|c: &mut ClassThresholds| {
        c.dbz = Some(m(30.0, 35.0, 50.0, 55.0));
        c.zdr = Some(m(-0.5, 0.0, 1.0, 1.5));
        c.kdp = Some(m(-0.5, 0.0, 1.0, 1.5));
        c.rhohv = Some(m(0.9, 0.94, 0.99, 1.0));
        c.temp = Some(m(-30.0, -20.0, 0.0, 5.0));
    });
    add(GRAUPEL_RAIN, &|c: &mut ClassThresholds| {
        c.dbz = Some(m(35.0, 40.0, 55.0, 60.0));
        c.zdr = Some(m(0.0, 0.5, 2.5, 3.0));
        c.kdp = Some(m(0.0, 0.5, 2.0, 3.0));
        c.rhohv = Some(m(0.88, 0.92, 0.98, 1.0));
        c.temp = Some(m(-10.0, -5.0, 10.0, 15.0));
    });
    add(DRY_SNOW, &|c: &mut ClassThresholds| {
        c.dbz = Some(m(0.0, 5.0, 30.0, 35.0));
        c.zdr = Some(m(-0.3, 0.0, 0.5, 0.8));
        c.kdp = Some(m(-0.1, 0.0, 0.1, 0.2));
        c.rhohv = Some(m(0.95, 0.97, 1.0, 1.01));
        c.temp = Some(m(-60.0, -50.0, -2.0, 0.0));
    });
    add(WET_SNOW, &|c: &mut ClassThresholds| {
        c.dbz = Some(m(20.0, 25.0, 45.0, 50.0));
        c.zdr = Some(m(0.5, 1.0, 2.5, 3.0));
        c.kdp = Some(m(-0.1, 0.0, 0.5, 1.0));
        c.ldr = Some(m(-22.0, -18.0, -12.0, -10.0));
        c.rhohv = Some(m(0.7, 0.8, 0.92, 0.95));
        c.temp = Some(m(-3.0, -1.0, 3.0, 5.0));
    });
    add(ICE_CRYSTALS, &|c: &mut ClassThresholds| {
        c.dbz = Some(m(-10.0, -5.0, 15.0, 20.0));
        c.zdr = Some(m(0.5, 1.0, 4.0, 5.0));
        c.kdp = Some(m(-0.1, 0.0, 0.2, 0.3));
        c.rhohv = Some(m(0.95, 0.97, 1.0, 1.01));
        c.temp = Some(m(-60.0, -50.0, -10.0, -5.0));
    });
    add(IRREG_ICE_CRYSTALS, &|c: &mut ClassThresholds| {
        c.dbz = Some(m(-10.0, -5.0, 25.0, 30.0));
        c.zdr = Some(m(0.0, 0.5, 2.0, 3.0));
        c.kdp = Some(m(-0.1, 0.0, 0.1, 0.2));
        c.rhohv = Some(m(0.93, 0.95, 1.0, 1.01));
        c.temp = Some(m(-60.0, -50.0, -5.0, 0.0));
    });
    add(SUPERCOOLED_DROPS, &|c: &mut ClassThresholds| {
        c.dbz = Some(m(-20.0, -15.0, 10.0, 15.0));
        c.zdr = Some(m(-0.3, 0.0, 0.5, 0.8));
        c.rhohv = Some(m(0.97, 0.98, 1.0, 1.01));
        c.temp = Some(m(-40.0, -30.0, -2.0, 0.0));
    });
    add(FLYING_INSECTS, &|c: &mut ClassThresholds| {
        c.dbz = Some(m(-20.0, -10.0, 10.0, 20.0));
        c.zdr = Some(m(0.0, 2.0, 10.0, 12.0));
        c.rhohv = Some(m(0.2, 0.3, 0.6, 0.8));
        c.temp = Some(m(5.0, 10.0, 40.0, 50.0));
    });
    add(SECOND_TRIP, &|c: &mut ClassThresholds| {
        c.dbz = Some(m(-30.0, -25.0, 5.0, 10.0));
        c.rhohv = Some(m(0.0, 0.1, 0.5, 0.7));
        c.sdphidp = Some(m(20.0, 30.0, 100.0, 110.0));
    });
    add(GROUND_CLUTTER, &|c: &mut ClassThresholds| {
        c.dbz = Some(m(15.0, 20.0, 70.0, 80.0));
        c.zdr = Some(m(-4.0, -2.0, 2.0, 4.0));
        c.rhohv = Some(m(0.3, 0.5, 0.85, 0.9));
        c.sdzdr = Some(m(1.0, 2.0, 10.0, 12.0));
        c.sdphidp = Some(m(10.0, 20.0, 100.0, 110.0));
    });
    table
}

/// A category the classifier can emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticleCategory {
    pub id: i32,
    pub label: String,
}

/// Per-gate inputs for one ray, all normalised to [`MISSING`].
#[derive(Debug, Clone, Copy)]
pub struct PidInputs<'a> {
    pub n_gates: usize,
    pub snr: &'a [f64],
    pub dbz: &'a [f64],
    pub zdr: &'a [f64],
    pub kdp: &'a [f64],
    pub ldr: &'a [f64],
    pub rhohv: &'a [f64],
    pub phidp: &'a [f64],
    pub temp_c: &'a [f64],
}

/// Arrays produced by a [`ParticleClassifier`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PidOutputs {
    /// Winning category id per gate; `<= 0` when unclassified
    pub pid: Vec<i32>,
    /// Interest of the winning category
    pub interest: Vec<f64>,
    /// Interest per category, in [`ParticleClassifier::categories`] order
    pub class_interest: Vec<Vec<f64>>,
    pub sdzdr: Vec<f64>,
    pub sdphidp: Vec<f64>,
}

impl PidOutputs {
    pub fn reset(&mut self, n_gates: usize, n_categories: usize) {
        self.pid.clear();
        self.pid.resize(n_gates, category::NONE);
        self.interest.clear();
        self.interest.resize(n_gates, MISSING);
        self.class_interest.resize_with(n_categories, Vec::new);
        for v in &mut self.class_interest {
            v.clear();
            v.resize(n_gates, MISSING);
        }
        self.sdzdr.clear();
        self.sdzdr.resize(n_gates, MISSING);
        self.sdphidp.clear();
        self.sdphidp.resize(n_gates, MISSING);
    }
}

/// Classifies the dominant scatterer at each gate of one ray.
pub trait ParticleClassifier: Send {
    /// Categories this classifier can emit.
    fn categories(&self) -> &[ParticleCategory];

    fn classify(&mut self, inputs: &PidInputs<'_>, out: &mut PidOutputs) -> Result<()>;
}

/// Reference classifier driven by a [`PidParams`] membership table.
#[derive(Debug, Clone)]
pub struct FuzzyPid {
    params: PidParams,
    categories: Vec<ParticleCategory>,
    dbz: Vec<f64>,
    zdr: Vec<f64>,
    median_src: Vec<f64>,
    median_work: Vec<f64>,
}

impl FuzzyPid {
    pub fn new(params: PidParams) -> Result<Self> {
        params.validate().map_err(DualpolError::InvalidParams)?;
        let categories = params
            .classes
            .iter()
            .map(|c| ParticleCategory {
                id: c.id,
                label: c.label.clone(),
            })
            .collect::<Vec<_>>();
        debug!(classes = categories.len(), "Built fuzzy particle classifier");
        Ok(Self {
            params,
            categories,
            dbz: Vec::new(),
            zdr: Vec::new(),
            median_src: Vec::new(),
            median_work: Vec::new(),
        })
    }

    pub fn params(&self) -> &PidParams {
        &self.params
    }
}

impl ParticleClassifier for FuzzyPid {
    fn categories(&self) -> &[ParticleCategory] {
        &self.categories
    }

    fn classify(&mut self, inputs: &PidInputs<'_>, out: &mut PidOutputs) -> Result<()> {
        let n = inputs.n_gates;
        for (name, data) in [
            ("snr", inputs.snr),
            ("dbz", inputs.dbz),
            ("zdr", inputs.zdr),
            ("kdp", inputs.kdp),
            ("ldr", inputs.ldr),
            ("rhohv", inputs.rhohv),
            ("phidp", inputs.phidp),
            ("temp", inputs.temp_c),
        ] {
            crate::check_len(name, data, n)?;
        }

        let n_classes = self.params.classes.len();
        out.reset(n, n_classes);

        self.dbz.clear();
        self.dbz.extend_from_slice(&inputs.dbz[..n]);
        median_filter(
            &mut self.dbz,
            self.params.dbz_median_len,
            &mut self.median_src,
            &mut self.median_work,
        );
        self.zdr.clear();
        self.zdr.extend_from_slice(&inputs.zdr[..n]);
        median_filter(
            &mut self.zdr,
            self.params.zdr_median_len,
            &mut self.median_src,
            &mut self.median_work,
        );
        running_sdev(&self.zdr, self.params.sdev_window_gates, &mut out.sdzdr);
        running_sdev(
            &inputs.phidp[..n],
            self.params.sdev_window_gates,
            &mut out.sdphidp,
        );

        let weights = self.params.weights.as_array();
        for i in 0..n {
            let snr = inputs.snr[i];
            if is_missing(snr) || snr < self.params.snr_threshold || is_missing(self.dbz[i]) {
                continue;
            }
            if snr > self.params.snr_upper_threshold {
                out.pid[i] = category::SATURATED_SNR;
                out.interest[i] = 1.0;
                continue;
            }

            let values = [
                self.dbz[i],
                self.zdr[i],
                inputs.kdp[i],
                inputs.ldr[i],
                inputs.rhohv[i],
                out.sdzdr[i],
                out.sdphidp[i],
                inputs.temp_c[i],
            ];

            let mut best = (category::NONE, 0.0);
            for (k, class) in self.params.classes.iter().enumerate() {
                let mut sum = 0.0;
                let mut sum_w = 0.0;
                for ((membership, value), weight) in
                    class.memberships().iter().zip(values).zip(weights)
                {
                    if let Some(m) = membership {
                        if !is_missing(value) {
                            sum += weight * m.interest(value);
                            sum_w += weight;
                        }
                    }
                }
                let interest = if sum_w > 0.0 { sum / sum_w } else { 0.0 };
                out.class_interest[k][i] = interest;
                if interest > best.1 {
                    best = (class.id, interest);
                }
            }

            out.interest[i] = best.1;
            if best.1 >= self.params.min_valid_interest {
                out.pid[i] = best.0;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Gates {
        snr: Vec<f64>,
        dbz: Vec<f64>,
        zdr: Vec<f64>,
        kdp: Vec<f64>,
        ldr: Vec<f64>,
        rhohv: Vec<f64>,
        phidp: Vec<f64>,
        temp: Vec<f64>,
    }

    impl Gates {
        fn uniform(n: usize, dbz: f64, zdr: f64, kdp: f64, rhohv: f64, temp: f64) -> Self {
            Self {
                snr: vec![30.0; n],
                dbz: vec![dbz; n],
                zdr: vec![zdr; n],
                kdp: vec![kdp; n],
                ldr: vec![MISSING; n],
                rhohv: vec![rhohv; n],
                phidp: vec![30.0; n],
                temp: vec![temp; n],
            }
        }

        fn inputs(&self) -> PidInputs<'_> {
            PidInputs {
                n_gates: self.dbz.len(),
                snr: &self.snr,
                dbz: &self.dbz,
                zdr: &self.zdr,
                kdp: &self.kdp,
                ldr: &self.ldr,
                rhohv: &self.rhohv,
                phidp: &self.phidp,
                temp_c: &self.temp,
            }
        }
    }

    fn classify(gates: &Gates) -> PidOutputs {
        let mut pid = FuzzyPid::new(PidParams::default()).unwrap();
        let mut out = PidOutputs::default();
        pid.classify(&gates.inputs(), &mut out).unwrap();
        out
    }

    #[test]
    fn test_membership_trapezoid() {
        let m = Membership::new(0.0, 1.0, 2.0, 4.0);
        assert_eq!(m.interest(-1.0), 0.0);
        assert_eq!(m.interest(0.5), 0.5);
        assert_eq!(m.interest(1.5), 1.0);
        assert_eq!(m.interest(3.0), 0.5);
        assert_eq!(m.interest(4.0), 0.0);
    }

    #[test]
    fn test_moderate_rain() {
        let out = classify(&Gates::uniform(20, 38.0, 1.5, 0.4, 0.99, 15.0));
        assert!(out.pid.iter().all(|id| *id == category::MODERATE_RAIN));
        assert!(out.interest.iter().all(|v| *v >= 0.5));
    }

    #[test]
    fn test_dry_snow_below_freezing() {
        let out = classify(&Gates::uniform(20, 22.0, 0.2, 0.05, 0.99, -15.0));
        assert_eq!(out.pid[10], category::DRY_SNOW);
    }

    #[test]
    fn test_ground_clutter_from_texture() {
        let n = 30;
        let mut gates = Gates::uniform(n, 50.0, 0.0, 0.0, 0.6, MISSING);
        gates.zdr = (0..n).map(|i| if i % 2 == 0 { 3.0 } else { -3.0 }).collect();
        gates.phidp = (0..n).map(|i| if i % 2 == 0 { 0.0 } else { 60.0 }).collect();
        let out = classify(&gates);
        assert_eq!(out.pid[15], category::GROUND_CLUTTER);
    }

    #[test]
    fn test_low_snr_is_unclassified() {
        let mut gates = Gates::uniform(10, 38.0, 1.5, 0.4, 0.99, 15.0);
        gates.snr[3] = 0.0;
        gates.snr[4] = MISSING;
        let out = classify(&gates);
        assert_eq!(out.pid[3], category::NONE);
        assert_eq!(out.pid[4], category::NONE);
        assert_eq!(out.interest[3], MISSING);
        assert_eq!(out.pid[5], category::MODERATE_RAIN);
    }

    #[test]
    fn test_class_interest_per_category() {
        let pid = FuzzyPid::new(PidParams::default()).unwrap();
        let n_categories = pid.categories().len();
        let out = classify(&Gates::uniform(5, 38.0, 1.5, 0.4, 0.99, 15.0));
        assert_eq!(out.class_interest.len(), n_categories);
        let k = pid
            .categories()
            .iter()
            .position(|c| c.id == category::MODERATE_RAIN)
            .unwrap();
        assert_eq!(out.class_interest[k][2], out.interest[2]);
    }

    #[test]
    fn test_duplicate_class_rejected() {
        let mut params = PidParams::default();
        let dup = params.classes[0].clone();
        params.classes.push(dup);
        assert!(matches!(
            FuzzyPid::new(params),
            Err(DualpolError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_membership_yaml_as_array() {
        let yaml = "id: 3\nlabel: lr\ndbz: [20.0, 25.0, 30.0, 38.0]\n";
        let class: ClassThresholds = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(class.dbz, Some(Membership::new(20.0, 25.0, 30.0, 38.0)));
        assert!(class.zdr.is_none());
    }
}
