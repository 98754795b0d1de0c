//! Timestamp matching between input and derived rays.

use chrono::{DateTime, Utc};

/// Two ray times closer than this (microseconds) are the same ray.
pub const TIME_MATCH_TOLERANCE: i64 = 1_000;

/// Whether `a` and `b` identify the same ray.
pub fn times_match(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    match (a - b).num_microseconds() {
        Some(us) => us.abs() < TIME_MATCH_TOLERANCE,
        None => false,
    }
}
