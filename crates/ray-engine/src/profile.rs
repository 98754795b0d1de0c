//! Temperature profiles and their per-volume broadcast to workers.
//!
//! The dispatcher thread is the only loader: it calls
//! [`ProfileBroadcast::load_for_volume`] once per volume and hands the
//! resulting `Arc<TemperatureProfile>` to every job of that volume.
//! Profiles are immutable once built.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, NaiveDateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{ProfileConfig, ProfileSourceKind};
use crate::error::{EngineError, Result};

/// Mean earth radius (km).
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Height of the beam centre above mean sea level (km).
///
/// Uses an effective earth radius of `ratio * EARTH_RADIUS_KM`.
pub fn beam_height_km(range_km: f64, elevation_deg: f64, radar_alt_km: f64, ratio: f64) -> f64 {
    let re = ratio * EARTH_RADIUS_KM;
    let sin_el = elevation_deg.to_radians().sin();
    (range_km * range_km + re * re + 2.0 * range_km * re * sin_el).sqrt() - re + radar_alt_km
}

/// One level of a temperature profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfilePoint {
    pub height_km: f64,
    pub temp_c: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pressure_hpa: Option<f64>,
}

impl ProfilePoint {
    pub fn new(height_km: f64, temp_c: f64) -> Self {
        Self {
            height_km,
            temp_c,
            pressure_hpa: None,
        }
    }
}

/// Height-sorted temperature profile.
///
/// Serialized as a plain list of points; deserialization goes through
/// [`TemperatureProfile::new`], so a profile is never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ProfilePoint>", into = "Vec<ProfilePoint>")]
pub struct TemperatureProfile {
    points: Vec<ProfilePoint>,
}

impl TryFrom<Vec<ProfilePoint>> for TemperatureProfile {
    type Error = EngineError;

    fn try_from(points: Vec<ProfilePoint>) -> Result<Self> {
        Self::new(points)
    }
}

impl From<TemperatureProfile> for Vec<ProfilePoint> {
    fn from(profile: TemperatureProfile) -> Self {
        profile.points
    }
}

impl TemperatureProfile {
    /// Build from points in any order. Non-finite points are dropped.
    pub fn new(mut points: Vec<ProfilePoint>) -> Result<Self> {
        points.retain(|p| p.height_km.is_finite() && p.temp_c.is_finite());
        if points.is_empty() {
            return Err(EngineError::profile_load("profile has no valid points"));
        }
        points.sort_by(|a, b| a.height_km.total_cmp(&b.height_km));
        points.dedup_by(|a, b| a.height_km == b.height_km);
        Ok(Self { points })
    }

    /// ICAO standard atmosphere up to 20 km.
    pub fn standard_atmosphere() -> Self {
        Self {
            points: vec![
                ProfilePoint {
                    height_km: 0.0,
                    temp_c: 15.0,
                    pressure_hpa: Some(1013.25),
                },
                ProfilePoint {
                    height_km: 11.0,
                    temp_c: -56.5,
                    pressure_hpa: Some(226.32),
                },
                ProfilePoint {
                    height_km: 20.0,
                    temp_c: -56.5,
                    pressure_hpa: Some(54.75),
                },
            ],
        }
    }

    pub fn points(&self) -> &[ProfilePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Temperature at `height_km`, linearly interpolated and clamped to the
    /// end temperatures outside the profile.
    pub fn temp_at(&self, height_km: f64) -> f64 {
        let pts = &self.points;
        let first = pts[0];
        let last = pts[pts.len() - 1];
        if height_km <= first.height_km {
            return first.temp_c;
        }
        if height_km >= last.height_km {
            return last.temp_c;
        }
        let idx = pts.partition_point(|p| p.height_km <= height_km);
        let (lo, hi) = (pts[idx - 1], pts[idx]);
        let frac = (height_km - lo.height_km) / (hi.height_km - lo.height_km);
        lo.temp_c + frac * (hi.temp_c - lo.temp_c)
    }

    /// Lowest height where the temperature falls through 0 C.
    pub fn freezing_level_km(&self) -> Option<f64> {
        let pts = &self.points;
        if pts[0].temp_c <= 0.0 {
            return Some(pts[0].height_km);
        }
        pts.windows(2).find_map(|w| {
            let (lo, hi) = (w[0], w[1]);
            if lo.temp_c > 0.0 && hi.temp_c <= 0.0 {
                let frac = lo.temp_c / (lo.temp_c - hi.temp_c);
                Some(lo.height_km + frac * (hi.height_km - lo.height_km))
            } else {
                None
            }
        })
    }

    /// Shift every level by `offset_km`.
    pub fn with_height_offset(mut self, offset_km: f64) -> Self {
        for p in &mut self.points {
            p.height_km += offset_km;
        }
        self
    }

    /// Apply the configured quality checks.
    pub fn check(&self, config: &ProfileConfig) -> Result<()> {
        if self.points.len() < config.min_points {
            return Err(EngineError::profile_load(format!(
                "profile has {} points, need {}",
                self.points.len(),
                config.min_points
            )));
        }
        if config.check_height_range {
            let bottom = self.points[0].height_km;
            let top = self.points[self.points.len() - 1].height_km;
            if bottom > config.min_height_km || top < config.max_height_km {
                return Err(EngineError::profile_load(format!(
                    "profile spans [{bottom:.2}, {top:.2}] km, need [{:.2}, {:.2}]",
                    config.min_height_km, config.max_height_km
                )));
            }
        }
        if config.check_pressure_decreasing {
            let pressures: Vec<f64> = self.points.iter().filter_map(|p| p.pressure_hpa).collect();
            if pressures.windows(2).any(|w| w[1] >= w[0]) {
                return Err(EngineError::profile_load(
                    "pressure does not decrease with height",
                ));
            }
        }
        Ok(())
    }
}

/// Supplies the temperature profile valid at a given time.
pub trait ProfileSource: Send + Sync {
    fn fetch(&self, time: DateTime<Utc>) -> Result<TemperatureProfile>;
}

/// Always returns the same profile.
#[derive(Debug, Clone)]
pub struct StaticProfileSource {
    profile: TemperatureProfile,
}

impl StaticProfileSource {
    pub fn new(profile: TemperatureProfile) -> Self {
        Self { profile }
    }
}

impl ProfileSource for StaticProfileSource {
    fn fetch(&self, _time: DateTime<Utc>) -> Result<TemperatureProfile> {
        Ok(self.profile.clone())
    }
}

/// Sounding file contents.
#[derive(Debug, Deserialize)]
struct SoundingFile {
    #[serde(default)]
    station: Option<String>,
    points: Vec<ProfilePoint>,
}

/// Reads soundings from a directory of `YYYYMMDD_HHMMSS.json` files,
/// choosing the one nearest the requested time.
#[derive(Debug, Clone)]
pub struct SoundingDirSource {
    dir: PathBuf,
    search_margin_secs: i64,
    height_correction_km: f64,
}

impl SoundingDirSource {
    pub fn new(dir: impl Into<PathBuf>, search_margin_secs: i64, height_correction_km: f64) -> Self {
        Self {
            dir: dir.into(),
            search_margin_secs,
            height_correction_km,
        }
    }

    /// Time encoded in a sounding file name.
    fn file_time(path: &Path) -> Option<DateTime<Utc>> {
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        NaiveDateTime::parse_from_str(stem, "%Y%m%d_%H%M%S")
            .ok()
            .map(|t| t.and_utc())
    }

    /// Nearest sounding file within the search margin.
    fn nearest(&self, time: DateTime<Utc>) -> Option<(PathBuf, DateTime<Utc>)> {
        WalkDir::new(&self.dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                let t = Self::file_time(e.path())?;
                Some((e.into_path(), t))
            })
            .filter(|(_, t)| (*t - time).num_seconds().abs() <= self.search_margin_secs)
            .min_by_key(|(path, t)| ((*t - time).num_seconds().abs(), path.clone()))
    }
}

impl ProfileSource for SoundingDirSource {
    fn fetch(&self, time: DateTime<Utc>) -> Result<TemperatureProfile> {
        let (path, sounding_time) = self.nearest(time).ok_or_else(|| {
            EngineError::profile_load(format!(
                "no sounding in {} within {} s of {}",
                self.dir.display(),
                self.search_margin_secs,
                time
            ))
        })?;
        let text = std::fs::read_to_string(&path)?;
        let sounding: SoundingFile = serde_json::from_str(&text)?;
        debug!(
            path = %path.display(),
            station = sounding.station.as_deref().unwrap_or("unknown"),
            sounding_time = %sounding_time,
            points = sounding.points.len(),
            "Read sounding"
        );
        Ok(TemperatureProfile::new(sounding.points)?.with_height_offset(self.height_correction_km))
    }
}

/// Holds the profile for the volume being processed.
pub struct ProfileBroadcast {
    source: Box<dyn ProfileSource>,
    checks: ProfileConfig,
    fallback: Arc<TemperatureProfile>,
    current: RwLock<Arc<TemperatureProfile>>,
    loads: AtomicUsize,
    fallbacks: AtomicUsize,
}

impl ProfileBroadcast {
    pub fn new(
        source: Box<dyn ProfileSource>,
        fallback: TemperatureProfile,
        checks: ProfileConfig,
    ) -> Self {
        let fallback = Arc::new(fallback);
        Self {
            source,
            checks,
            current: RwLock::new(Arc::clone(&fallback)),
            fallback,
            loads: AtomicUsize::new(0),
            fallbacks: AtomicUsize::new(0),
        }
    }

    /// Build the source named by the configuration.
    pub fn from_config(config: &ProfileConfig) -> Result<Self> {
        let fallback = if config.default_profile.is_empty() {
            TemperatureProfile::standard_atmosphere()
        } else {
            TemperatureProfile::new(config.default_profile.clone())
                .map_err(|e| EngineError::fatal_config(format!("default_profile: {e}")))?
        };
        let source: Box<dyn ProfileSource> = match config.source {
            ProfileSourceKind::Static => Box::new(StaticProfileSource::new(fallback.clone())),
            ProfileSourceKind::SoundingDir => {
                let dir = config.dir.clone().ok_or_else(|| {
                    EngineError::fatal_config("profile.dir is required for sounding_dir")
                })?;
                Box::new(SoundingDirSource::new(
                    dir,
                    config.search_margin_secs,
                    config.height_correction_km,
                ))
            }
        };
        Ok(Self::new(source, fallback, config.clone()))
    }

    /// Load the profile for a volume starting at `start_time`, falling back
    /// to the default profile when the source fails.
    pub fn load_for_volume(&self, start_time: DateTime<Utc>) -> Arc<TemperatureProfile> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        let loaded = self
            .source
            .fetch(start_time)
            .and_then(|p| p.check(&self.checks).map(|_| p));

        let profile = match loaded {
            Ok(profile) => {
                info!(
                    time = %start_time,
                    points = profile.len(),
                    freezing_level_km = ?profile.freezing_level_km(),
                    "Loaded temperature profile"
                );
                Arc::new(profile)
            }
            Err(e) => {
                warn!(
                    time = %start_time,
                    error = %e,
                    "Temperature profile unavailable, using default"
                );
                counter!("profile_fallbacks_total").increment(1);
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
                Arc::clone(&self.fallback)
            }
        };

        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = Arc::clone(&profile);
        profile
    }

    /// The most recently loaded profile.
    pub fn current(&self) -> Arc<TemperatureProfile> {
        Arc::clone(&self.current.read().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn fallback(&self) -> Arc<TemperatureProfile> {
        Arc::clone(&self.fallback)
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    pub fn fallbacks(&self) -> usize {
        self.fallbacks.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn profile() -> TemperatureProfile {
        TemperatureProfile::new(vec![
            ProfilePoint::new(4.0, -10.0),
            ProfilePoint::new(0.0, 20.0),
            ProfilePoint::new(2.0, 6.0),
        ])
        .unwrap()
    }

    #[test]
    fn test_interpolation_and_clamping() {
        let p = profile();
        assert_eq!(p.points()[0].height_km, 0.0);
        assert!((p.temp_at(1.0) - 13.0).abs() < 1e-12);
        assert!((p.temp_at(3.0) - -2.0).abs() < 1e-12);
        assert_eq!(p.temp_at(-1.0), 20.0);
        assert_eq!(p.temp_at(10.0), -10.0);
    }

    #[test]
    fn test_deserialize_validates_points() {
        let p: TemperatureProfile = serde_json::from_str(
            r#"[{"height_km": 3.0, "temp_c": -4.0}, {"height_km": 0.0, "temp_c": 14.0}]"#,
        )
        .unwrap();
        assert_eq!(p.points()[0].height_km, 0.0);
        assert_eq!(p.temp_at(5.0), -4.0);

        assert!(serde_json::from_str::<TemperatureProfile>("[]").is_err());
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.starts_with('['));
    }

    #[test]
    fn test_freezing_level() {
        let p = profile();
        let fl = p.freezing_level_km().unwrap();
        assert!((fl - 2.75).abs() < 1e-12);
        let sa = TemperatureProfile::standard_atmosphere();
        assert!((sa.freezing_level_km().unwrap() - 15.0 / 71.5 * 11.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_profile_rejected() {
        let err = TemperatureProfile::new(vec![ProfilePoint::new(f64::NAN, 1.0)]).unwrap_err();
        assert!(matches!(err, EngineError::ProfileLoad(_)));
    }

    #[test]
    fn test_beam_height() {
        // Horizontal beam rises with earth curvature.
        let h = beam_height_km(100.0, 0.0, 0.0, 4.0 / 3.0);
        let expected = (100.0f64.powi(2) + (4.0 / 3.0 * EARTH_RADIUS_KM).powi(2)).sqrt()
            - 4.0 / 3.0 * EARTH_RADIUS_KM;
        assert!((h - expected).abs() < 1e-9);
        assert!(h > 0.5 && h < 0.7);
        assert!((beam_height_km(0.0, 10.0, 1.5, 4.0 / 3.0) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_height_range_check() {
        let checks = ProfileConfig {
            check_height_range: true,
            min_height_km: 0.5,
            max_height_km: 8.0,
            ..Default::default()
        };
        assert!(profile().check(&checks).is_err());
        assert!(TemperatureProfile::standard_atmosphere().check(&checks).is_ok());
    }

    #[test]
    fn test_pressure_check() {
        let checks = ProfileConfig {
            check_pressure_decreasing: true,
            ..Default::default()
        };
        let bad = TemperatureProfile::new(vec![
            ProfilePoint {
                height_km: 0.0,
                temp_c: 10.0,
                pressure_hpa: Some(900.0),
            },
            ProfilePoint {
                height_km: 1.0,
                temp_c: 5.0,
                pressure_hpa: Some(950.0),
            },
        ])
        .unwrap();
        assert!(bad.check(&checks).is_err());
        assert!(TemperatureProfile::standard_atmosphere().check(&checks).is_ok());
    }

    struct FailingSource;

    impl ProfileSource for FailingSource {
        fn fetch(&self, _time: DateTime<Utc>) -> Result<TemperatureProfile> {
            Err(EngineError::profile_load("sounding server down"))
        }
    }

    #[test]
    fn test_broadcast_falls_back() {
        let broadcast = ProfileBroadcast::new(
            Box::new(FailingSource),
            TemperatureProfile::standard_atmosphere(),
            ProfileConfig::default(),
        );
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let p = broadcast.load_for_volume(t);
        assert_eq!(*p, TemperatureProfile::standard_atmosphere());
        assert!(Arc::ptr_eq(&p, &broadcast.current()));
        assert_eq!(broadcast.fallbacks(), 1);
        assert_eq!(broadcast.loads(), 1);
    }

    #[test]
    fn test_broadcast_replaces_current() {
        let broadcast = ProfileBroadcast::new(
            Box::new(StaticProfileSource::new(profile())),
            TemperatureProfile::standard_atmosphere(),
            ProfileConfig::default(),
        );
        let before = broadcast.current();
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let loaded = broadcast.load_for_volume(t);
        assert_eq!(*loaded, profile());
        assert!(!Arc::ptr_eq(&before, &broadcast.current()));
        assert_eq!(broadcast.fallbacks(), 0);
    }

    #[test]
    fn test_sounding_file_time() {
        let t = SoundingDirSource::file_time(Path::new("/x/20240601_120000.json")).unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
        assert!(SoundingDirSource::file_time(Path::new("/x/20240601_120000.txt")).is_none());
        assert!(SoundingDirSource::file_time(Path::new("/x/latest.json")).is_none());
    }
}
