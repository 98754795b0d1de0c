//! Common test fixtures: sounding files and engine config snippets.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::json;
use tempfile::TempDir;

/// Names of the input fields every generated ray carries.
pub const REQUIRED_FIELDS: [&str; 4] = ["DBZ", "ZDR", "PHIDP", "RHOHV"];

/// A warm-season sounding as `(height_km, temp_c, pressure_hpa)`.
///
/// Freezing level at 4.0 km.
pub const SUMMER_SOUNDING: [(f64, f64, f64); 6] = [
    (0.2, 26.0, 990.0),
    (1.5, 17.0, 850.0),
    (3.0, 7.0, 700.0),
    (4.0, 0.0, 620.0),
    (6.0, -14.0, 470.0),
    (10.0, -45.0, 265.0),
];

/// A cold sounding with the freezing level at the surface.
pub const WINTER_SOUNDING: [(f64, f64, f64); 4] = [
    (0.2, 0.0, 1000.0),
    (1.5, -8.0, 850.0),
    (5.0, -30.0, 540.0),
    (10.0, -60.0, 260.0),
];

/// File name a sounding valid at `time` is stored under.
pub fn sounding_file_name(time: DateTime<Utc>) -> String {
    format!("{}.json", time.format("%Y%m%d_%H%M%S"))
}

/// Write a sounding JSON file into `dir` and return its path.
pub fn write_sounding(
    dir: &Path,
    time: DateTime<Utc>,
    station: &str,
    levels: &[(f64, f64, f64)],
) -> io::Result<PathBuf> {
    let points: Vec<_> = levels
        .iter()
        .map(|(h, t, p)| json!({ "height_km": h, "temp_c": t, "pressure_hpa": p }))
        .collect();
    let body = json!({ "station": station, "points": points });
    let path = dir.join(sounding_file_name(time));
    fs::write(&path, serde_json::to_vec_pretty(&body)?)?;
    Ok(path)
}

/// A temporary directory holding one sounding per `(time, levels)` entry.
pub fn sounding_dir(soundings: &[(DateTime<Utc>, &[(f64, f64, f64)])]) -> io::Result<TempDir> {
    let dir = TempDir::new()?;
    for (time, levels) in soundings {
        write_sounding(dir.path(), *time, "TEST", levels)?;
    }
    Ok(dir)
}

/// Minimal engine YAML pointing the profile source at `dir`.
pub fn sounding_config_yaml(dir: &Path, n_workers: usize) -> String {
    format!(
        "n_workers: {n_workers}\nprofile:\n  source: sounding_dir\n  dir: {}\n  search_margin_secs: 10800\n",
        dir.display()
    )
}
