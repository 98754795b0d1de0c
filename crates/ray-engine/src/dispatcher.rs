//! The control loop feeding rays to the worker pool.
//!
//! For each ray the dispatcher tries an idle worker; when every worker is
//! busy it blocks on one harvest and retries the same ray, so no ray is
//! ever skipped. Once every ray is submitted it drains the pool.

use std::sync::Arc;
use std::time::Instant;

use metrics::counter;
use radar_common::Volume;
use tracing::{info, instrument, warn};

use crate::assembler::{OutputAssembler, RayFailure};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::pipeline::SiteGeometry;
use crate::pool::{Harvest, RayJob, SubmitError, WorkerPool};
use crate::profile::ProfileBroadcast;

/// Runs volumes through a worker pool.
pub struct RayDispatcher {
    config: Arc<EngineConfig>,
    pool: WorkerPool,
    profiles: ProfileBroadcast,
}

impl RayDispatcher {
    /// Validate `config` and start its worker pool and profile source.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.check()?;
        let config = Arc::new(config);
        let pool = WorkerPool::new(Arc::clone(&config))?;
        let profiles = ProfileBroadcast::from_config(&config.profile)?;
        Ok(Self {
            config,
            pool,
            profiles,
        })
    }

    /// Assemble a dispatcher from prebuilt parts.
    pub fn with_parts(config: Arc<EngineConfig>, pool: WorkerPool, profiles: ProfileBroadcast) -> Self {
        Self {
            config,
            pool,
            profiles,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn profiles(&self) -> &ProfileBroadcast {
        &self.profiles
    }

    /// Process every ray of `volume`.
    ///
    /// Per-ray failures are recorded in the returned assembler. Only a pool
    /// that can no longer finish its in-flight rays is an error.
    #[instrument(skip(self, volume), fields(start = %volume.start_time, rays = volume.rays.len()))]
    pub fn run(&mut self, volume: &Volume) -> Result<OutputAssembler> {
        let start = Instant::now();
        let profile = self.profiles.load_for_volume(volume.start_time);
        let site = SiteGeometry::from_volume(volume);
        let mut assembler = OutputAssembler::new();

        for (index, ray) in volume.rays.iter().enumerate() {
            let mut job = RayJob::new(index, Arc::clone(ray), Arc::clone(&profile), site);
            loop {
                match self.pool.try_submit(job) {
                    Ok(_) => break,
                    Err(SubmitError::Busy(returned)) => {
                        job = returned;
                        let harvest = self.harvest_blocking(volume.rays.len() - index)?;
                        record(&mut assembler, harvest);
                    }
                    Err(SubmitError::NoWorkers(_)) => {
                        return Err(EngineError::DispatchExhausted {
                            in_flight: self.pool.in_flight(),
                            undispatched: volume.rays.len() - index,
                        });
                    }
                }
            }
        }

        while self.pool.in_flight() > 0 {
            let harvest = self.harvest_blocking(0)?;
            record(&mut assembler, harvest);
        }

        let duration = start.elapsed();
        info!(
            rays = volume.rays.len(),
            harvested = assembler.harvested(),
            failed = assembler.failed(),
            workers = self.pool.size(),
            duration_ms = duration.as_millis(),
            "Volume processed"
        );
        self.log_calibration(&assembler);
        Ok(assembler)
    }

    /// Process several volumes in order, one profile load each.
    pub fn run_volumes(&mut self, volumes: &[Volume]) -> Result<Vec<OutputAssembler>> {
        volumes.iter().map(|v| self.run(v)).collect()
    }

    fn log_calibration(&self, assembler: &OutputAssembler) {
        let config = &self.config;
        if !config.estimates_zdr_bias()
            && !config.estimate_z_bias_using_self_consistency
            && !config.locate_rlan_interference
        {
            return;
        }
        let summary = assembler.calibration_summary(config);
        let samples = assembler.calibration().samples();
        info!(
            zdr_ice_samples = samples.zdr_in_ice.len(),
            zdr_ice_mean = summary.zdr_in_ice.as_ref().map(|s| s.mean),
            zdr_bragg_samples = samples.zdr_in_bragg.len(),
            zdr_bragg_mean = summary.zdr_in_bragg.as_ref().map(|s| s.mean),
            self_con_runs = samples.self_consistency.len(),
            self_con_dbz_bias = summary.self_con_z_bias.as_ref().map(|b| b.dbz_bias),
            rlan_rays = summary.rlan_rays,
            rlan_gates = summary.rlan_gates,
            "Volume calibration"
        );
    }

    fn harvest_blocking(&mut self, undispatched: usize) -> Result<Harvest> {
        self.pool
            .harvest_completed(true)
            .ok_or_else(|| EngineError::DispatchExhausted {
                in_flight: self.pool.in_flight(),
                undispatched,
            })
    }
}

fn record(assembler: &mut OutputAssembler, harvest: Harvest) {
    match harvest.result {
        Ok(output) => {
            counter!("rays_processed_total").increment(1);
            counter!("rlan_gates_total").increment(harvest.calibration.rlan_gates as u64);
            assembler.push(output);
            assembler.merge_calibration(harvest.calibration);
        }
        Err(error) => {
            counter!("rays_failed_total").increment(1);
            warn!(
                index = harvest.index,
                time = %harvest.time,
                azimuth = harvest.azimuth_deg,
                elevation = harvest.elevation_deg,
                error = %error,
                "Ray produced no output"
            );
            assembler.record_failure(RayFailure {
                index: harvest.index,
                time: harvest.time,
                azimuth_deg: harvest.azimuth_deg,
                elevation_deg: harvest.elevation_deg,
                error,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_is_fatal() {
        let config = EngineConfig {
            noise_dbz_at_100km: f64::NAN,
            ..Default::default()
        };
        assert!(matches!(
            RayDispatcher::new(config),
            Err(EngineError::FatalConfig(_))
        ));
    }

    #[test]
    fn test_empty_volume() {
        let mut dispatcher = RayDispatcher::new(EngineConfig::default()).unwrap();
        let volume = Volume::new(chrono::Utc::now(), 0.0, Vec::new());
        let assembler = dispatcher.run(&volume).unwrap();
        assert_eq!(assembler.harvested(), 0);
        assert_eq!(assembler.failed(), 0);
        assert_eq!(dispatcher.profiles().loads(), 1);
    }
}
