//! Synthetic ray and volume generators.
//!
//! These generators create deterministic dual-pol moments that look like
//! real weather (or real clutter) closely enough for the algorithms to
//! classify, so integration tests can check end-to-end behavior.

use chrono::{DateTime, Duration, TimeZone, Utc};
use radar_common::{Ray, RayField, Volume};

/// Gate spacing of generated rays (km).
pub const GATE_SPACING_KM: f64 = 0.25;

/// Start range of generated rays (km).
pub const START_RANGE_KM: f64 = 0.125;

/// Elevation of generated rays (deg).
pub const ELEVATION_DEG: f64 = 0.5;

/// Time between consecutive rays of a generated volume.
pub const RAY_INTERVAL_MS: i64 = 100;

/// Fixed reference time so generated data is reproducible.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Per-gate moments of a generated ray.
#[derive(Debug, Clone, PartialEq)]
pub struct Moments {
    pub dbz: Vec<f32>,
    pub zdr: Vec<f32>,
    pub phidp: Vec<f32>,
    pub rhohv: Vec<f32>,
}

impl Moments {
    /// Attach the moments to `ray` as DBZ, ZDR, PHIDP and RHOHV.
    pub fn into_ray(self, mut ray: Ray) -> Ray {
        ray.fields.push(RayField::new("DBZ", "dBZ", self.dbz));
        ray.fields.push(RayField::new("ZDR", "dB", self.zdr));
        ray.fields.push(RayField::new("PHIDP", "deg", self.phidp));
        ray.fields.push(RayField::new("RHOHV", "", self.rhohv));
        ray
    }
}

/// A convective rain cell centred a third of the way out.
///
/// Reflectivity peaks near 50 dBZ; differential phase accumulates through
/// the core so KDP is positive there and near zero outside.
pub fn rain_moments(n_gates: usize, azimuth_deg: f64) -> Moments {
    let centre = n_gates as f64 / 3.0;
    let width = (n_gates as f64 / 10.0).max(2.0);
    // Small azimuthal variation so rays of a volume differ.
    let peak = 48.0 + 2.0 * azimuth_deg.to_radians().sin();

    let mut dbz = Vec::with_capacity(n_gates);
    let mut zdr = Vec::with_capacity(n_gates);
    let mut phidp = Vec::with_capacity(n_gates);
    let mut rhohv = Vec::with_capacity(n_gates);
    let mut phase = 12.0;

    for i in 0..n_gates {
        let x = (i as f64 - centre) / width;
        let z = 10.0 + (peak - 10.0) * (-0.5 * x * x).exp();
        let kdp = if z > 35.0 { 0.04 * (z - 35.0) } else { 0.0 };
        phase += 2.0 * kdp * GATE_SPACING_KM;

        dbz.push(z as f32);
        zdr.push((0.2 + 0.06 * (z - 10.0).max(0.0)) as f32);
        phidp.push(phase as f32);
        rhohv.push(0.985);
    }

    Moments {
        dbz,
        zdr,
        phidp,
        rhohv,
    }
}

/// Strong, noisy returns typical of ground clutter.
pub fn clutter_moments(n_gates: usize) -> Moments {
    let mut dbz = Vec::with_capacity(n_gates);
    let mut zdr = Vec::with_capacity(n_gates);
    let mut phidp = Vec::with_capacity(n_gates);
    let mut rhohv = Vec::with_capacity(n_gates);

    for i in 0..n_gates {
        let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
        dbz.push(55.0 + 5.0 * sign);
        zdr.push(4.0 * sign);
        phidp.push(60.0 + 50.0 * sign);
        rhohv.push(0.6);
    }

    Moments {
        dbz,
        zdr,
        phidp,
        rhohv,
    }
}

/// Weak steady returns with a Doppler velocity that jumps between every
/// gate, the signature of radio LAN interference.
pub fn interference_ray(time: DateTime<Utc>, azimuth_deg: f64, n_gates: usize) -> Ray {
    let moments = Moments {
        dbz: vec![5.0; n_gates],
        zdr: vec![0.2; n_gates],
        phidp: (0..n_gates).map(|i| ((i * 37) % 180) as f32).collect(),
        rhohv: vec![0.3; n_gates],
    };
    let vel = (0..n_gates).map(|i| ((i * 19) % 50) as f32 - 25.0).collect();
    let mut ray = moments.into_ray(empty_ray(time, azimuth_deg, n_gates));
    ray.fields.push(RayField::new("VEL", "m/s", vel));
    ray
}

/// An empty ray with the generator's geometry.
pub fn empty_ray(time: DateTime<Utc>, azimuth_deg: f64, n_gates: usize) -> Ray {
    Ray::new(
        time,
        n_gates,
        START_RANGE_KM,
        GATE_SPACING_KM,
        azimuth_deg,
        ELEVATION_DEG,
    )
    .with_nyquist(26.0)
}

/// A ray through a rain cell with DBZ, ZDR, PHIDP and RHOHV.
pub fn rain_ray(time: DateTime<Utc>, azimuth_deg: f64, n_gates: usize) -> Ray {
    rain_moments(n_gates, azimuth_deg).into_ray(empty_ray(time, azimuth_deg, n_gates))
}

/// A ray of ground clutter with DBZ, ZDR, PHIDP and RHOHV.
pub fn clutter_ray(time: DateTime<Utc>, azimuth_deg: f64, n_gates: usize) -> Ray {
    clutter_moments(n_gates).into_ray(empty_ray(time, azimuth_deg, n_gates))
}

/// `ray` with the named field removed.
pub fn without_field(mut ray: Ray, name: &str) -> Ray {
    ray.fields.retain(|f| f.name != name);
    ray
}

/// `ray` with an extra constant-valued field.
pub fn with_constant_field(mut ray: Ray, name: &str, units: &str, value: f32) -> Ray {
    let data = vec![value; ray.n_gates];
    ray.fields.push(RayField::new(name, units, data));
    ray
}

/// Time of ray `index` in a generated volume.
pub fn ray_time(index: usize) -> DateTime<Utc> {
    base_time() + Duration::milliseconds(RAY_INTERVAL_MS * index as i64)
}

/// A volume of rain rays one degree apart.
pub fn synthetic_volume(n_rays: usize, n_gates: usize) -> Volume {
    let rays = (0..n_rays)
        .map(|i| rain_ray(ray_time(i), i as f64, n_gates))
        .collect();
    Volume::new(base_time(), 0.3, rays)
}
