//! Fixed-size worker pool.
//!
//! Each worker is a named OS thread that owns one [`RayPipeline`]. The
//! dispatcher submits jobs to idle slots with [`WorkerPool::try_submit`] and
//! collects finished rays with [`WorkerPool::harvest_completed`]. Each slot
//! has its own job channel, so a slot holds at most one ray at a time;
//! results come back on a single shared channel. A retired worker
//! ([`WorkerPool::retire`]) takes no further jobs.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use metrics::histogram;
use radar_common::{OutputRay, Ray};
use tracing::{error, info};

use crate::calibration::CalibrationSamples;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::pipeline::{RayPipeline, SiteGeometry};
use crate::profile::TemperatureProfile;

/// How often a blocking harvest checks for exited workers.
const LIVENESS_POLL: Duration = Duration::from_millis(100);

/// State of one worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Waiting for a ray
    Idle,
    /// Processing a ray
    Busy,
    /// Finished a ray whose result has not been harvested
    DoneUnclaimed,
    /// The worker thread has exited
    Stopped,
}

impl SlotState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Busy,
            2 => Self::DoneUnclaimed,
            _ => Self::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Busy => 1,
            Self::DoneUnclaimed => 2,
            Self::Stopped => 3,
        }
    }
}

/// A ray bound for a worker, with the profile of its volume.
#[derive(Debug, Clone)]
pub struct RayJob {
    /// Position of the ray in its volume
    pub index: usize,
    pub ray: Arc<Ray>,
    pub profile: Arc<TemperatureProfile>,
    pub site: SiteGeometry,
}

impl RayJob {
    pub fn new(
        index: usize,
        ray: Arc<Ray>,
        profile: Arc<TemperatureProfile>,
        site: SiteGeometry,
    ) -> Self {
        Self {
            index,
            ray,
            profile,
            site,
        }
    }
}

/// Receipt for a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: u64,
    pub worker: usize,
}

/// Why a job was handed back by [`WorkerPool::try_submit`].
#[derive(Debug)]
pub enum SubmitError {
    /// Every live slot is occupied; harvest and retry.
    Busy(RayJob),
    /// No worker thread is left to take the job.
    NoWorkers(RayJob),
}

impl SubmitError {
    pub fn into_job(self) -> RayJob {
        match self {
            Self::Busy(job) | Self::NoWorkers(job) => job,
        }
    }
}

/// A finished job.
#[derive(Debug)]
pub struct Harvest {
    pub job_id: u64,
    pub worker: usize,
    pub index: usize,
    pub time: DateTime<Utc>,
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
    pub elapsed: Duration,
    /// The output ray, or why the ray produced none
    pub result: Result<OutputRay>,
    /// Calibration samples of the ray; empty when it failed
    pub calibration: CalibrationSamples,
}

impl Harvest {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// The output ray, discarding any failure.
    pub fn output(self) -> Option<OutputRay> {
        self.result.ok()
    }
}

struct WorkerJob {
    job_id: u64,
    job: RayJob,
}

struct Worker {
    /// `None` once the worker is retired
    jobs: Option<Sender<WorkerJob>>,
    handle: Option<JoinHandle<()>>,
}

/// Fixed set of worker threads, each bound to one pipeline.
pub struct WorkerPool {
    workers: Vec<Worker>,
    states: Arc<[AtomicU8]>,
    results: Receiver<Harvest>,
    next_job_id: u64,
    in_flight: usize,
}

impl WorkerPool {
    /// Spawn `config.n_workers` workers with the reference algorithms.
    pub fn new(config: Arc<EngineConfig>) -> Result<Self> {
        config.check()?;
        let pipelines = (0..config.n_workers)
            .map(|_| RayPipeline::new(Arc::clone(&config)))
            .collect::<Result<Vec<_>>>()?;
        Self::with_pipelines(pipelines)
    }

    /// Spawn one worker per pipeline.
    pub fn with_pipelines(pipelines: Vec<RayPipeline>) -> Result<Self> {
        if pipelines.is_empty() {
            return Err(EngineError::fatal_config("worker pool needs at least one pipeline"));
        }
        let n = pipelines.len();
        let states: Arc<[AtomicU8]> = (0..n)
            .map(|_| AtomicU8::new(SlotState::Idle.as_u8()))
            .collect();
        let (result_tx, results) = unbounded();

        let mut workers = Vec::with_capacity(n);
        for (id, pipeline) in pipelines.into_iter().enumerate() {
            let (job_tx, job_rx) = bounded(1);
            let result_tx = result_tx.clone();
            let states = Arc::clone(&states);
            let handle = std::thread::Builder::new()
                .name(format!("ray-worker-{id}"))
                .spawn(move || worker_loop(id, pipeline, job_rx, result_tx, states))?;
            workers.push(Worker {
                jobs: Some(job_tx),
                handle: Some(handle),
            });
        }

        info!(workers = n, "Worker pool started");
        Ok(Self {
            workers,
            states,
            results,
            next_job_id: 0,
            in_flight: 0,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Jobs submitted but not yet harvested.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn slot_state(&self, worker: usize) -> Option<SlotState> {
        self.states
            .get(worker)
            .map(|s| SlotState::from_u8(s.load(Ordering::Acquire)))
    }

    pub fn slot_states(&self) -> Vec<SlotState> {
        (0..self.size()).filter_map(|i| self.slot_state(i)).collect()
    }

    fn set_state(&self, worker: usize, state: SlotState) {
        self.states[worker].store(state.as_u8(), Ordering::Release);
    }

    /// Hand `job` to an idle worker, or give it back if none is idle.
    pub fn try_submit(&mut self, job: RayJob) -> std::result::Result<JobHandle, SubmitError> {
        let mut job = job;
        for worker in 0..self.workers.len() {
            if self.slot_state(worker) != Some(SlotState::Idle) {
                continue;
            }
            let Some(jobs) = self.workers[worker].jobs.as_ref() else {
                self.set_state(worker, SlotState::Stopped);
                continue;
            };
            let job_id = self.next_job_id;
            self.set_state(worker, SlotState::Busy);
            match jobs.send(WorkerJob { job_id, job }) {
                Ok(()) => {
                    self.next_job_id += 1;
                    self.in_flight += 1;
                    return Ok(JobHandle { job_id, worker });
                }
                Err(returned) => {
                    error!(worker, "Worker thread has exited");
                    self.set_state(worker, SlotState::Stopped);
                    job = returned.into_inner().job;
                }
            }
        }

        if self.slot_states().iter().all(|s| *s == SlotState::Stopped) {
            Err(SubmitError::NoWorkers(job))
        } else {
            Err(SubmitError::Busy(job))
        }
    }

    /// Collect one finished job.
    ///
    /// Returns `None` when nothing is in flight, when `blocking` is false and
    /// no result is ready, or when a busy worker thread has exited and its
    /// ray can never complete.
    pub fn harvest_completed(&mut self, blocking: bool) -> Option<Harvest> {
        if self.in_flight == 0 {
            return None;
        }
        loop {
            let received = if blocking {
                match self.results.recv_timeout(LIVENESS_POLL) {
                    Ok(h) => Some(h),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => {
                        self.reap_exited();
                        return None;
                    }
                }
            } else {
                match self.results.try_recv() {
                    Ok(h) => Some(h),
                    Err(TryRecvError::Empty) => return None,
                    Err(TryRecvError::Disconnected) => {
                        self.reap_exited();
                        return None;
                    }
                }
            };

            if let Some(harvest) = received {
                self.set_state(harvest.worker, SlotState::Idle);
                self.in_flight -= 1;
                return Some(harvest);
            }
            if self.reap_exited() > 0 {
                return None;
            }
        }
    }

    /// Close a worker's job channel so its thread exits after any ray it
    /// holds. An idle worker is joined and stopped at once.
    ///
    /// Returns false if the worker does not exist or is already retired.
    pub fn retire(&mut self, worker: usize) -> bool {
        let Some(slot) = self.workers.get_mut(worker) else {
            return false;
        };
        if slot.jobs.take().is_none() {
            return false;
        }
        info!(worker, "Retiring worker");
        if self.slot_state(worker) == Some(SlotState::Idle) {
            if let Some(handle) = self.workers[worker].handle.take() {
                if handle.join().is_err() {
                    error!(worker, "Worker thread panicked on exit");
                }
            }
            self.set_state(worker, SlotState::Stopped);
        }
        true
    }

    /// Mark busy slots whose thread has exited as stopped.
    fn reap_exited(&mut self) -> usize {
        let mut reaped = 0;
        for worker in 0..self.workers.len() {
            let finished = self.workers[worker]
                .handle
                .as_ref()
                .map_or(true, |h| h.is_finished());
            if finished && self.slot_state(worker) == Some(SlotState::Busy) {
                error!(worker, "Worker exited with a ray in flight");
                self.set_state(worker, SlotState::Stopped);
                reaped += 1;
            }
        }
        reaped
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let handles: Vec<_> = self
            .workers
            .iter_mut()
            .filter_map(|w| w.handle.take())
            .collect();
        // Closing the job channels ends each worker loop.
        self.workers.clear();
        for handle in handles {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    id: usize,
    mut pipeline: RayPipeline,
    jobs: Receiver<WorkerJob>,
    results: Sender<Harvest>,
    states: Arc<[AtomicU8]>,
) {
    while let Ok(WorkerJob { job_id, job }) = jobs.recv() {
        let start = Instant::now();
        let ray = Arc::clone(&job.ray);
        let result = catch_unwind(AssertUnwindSafe(|| {
            pipeline.process(Arc::clone(&job.ray), Arc::clone(&job.profile), job.site)
        }))
        .unwrap_or_else(|_| Err(EngineError::WorkerPanicked { worker: id }));
        let calibration = if result.is_ok() {
            pipeline.take_calibration()
        } else {
            CalibrationSamples::default()
        };
        let elapsed = start.elapsed();
        histogram!("ray_compute_seconds").record(elapsed.as_secs_f64());

        states[id].store(SlotState::DoneUnclaimed.as_u8(), Ordering::Release);
        let harvest = Harvest {
            job_id,
            worker: id,
            index: job.index,
            time: ray.time,
            azimuth_deg: ray.azimuth_deg,
            elevation_deg: ray.elevation_deg,
            elapsed,
            result,
            calibration,
        };
        if results.send(harvest).is_err() {
            break;
        }
    }
    states[id].store(SlotState::Stopped.as_u8(), Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_state_encoding() {
        for state in [
            SlotState::Idle,
            SlotState::Busy,
            SlotState::DoneUnclaimed,
            SlotState::Stopped,
        ] {
            assert_eq!(SlotState::from_u8(state.as_u8()), state);
        }
    }

    #[test]
    fn test_new_pool_is_idle() {
        let config = EngineConfig {
            n_workers: 3,
            ..Default::default()
        };
        let mut pool = WorkerPool::new(Arc::new(config)).unwrap();
        assert_eq!(pool.size(), 3);
        assert_eq!(pool.slot_states(), vec![SlotState::Idle; 3]);
        assert_eq!(pool.in_flight(), 0);
        assert!(pool.harvest_completed(true).is_none());
    }

    fn job() -> RayJob {
        RayJob::new(
            0,
            Arc::new(test_utils::rain_ray(test_utils::base_time(), 0.0, 20)),
            Arc::new(TemperatureProfile::standard_atmosphere()),
            SiteGeometry {
                radar_altitude_km: 0.3,
                wavelength_m: 0.1071,
            },
        )
    }

    fn pool(n_workers: usize) -> WorkerPool {
        let config = EngineConfig {
            n_workers,
            ..Default::default()
        };
        WorkerPool::new(Arc::new(config)).unwrap()
    }

    #[test]
    fn test_retired_workers_take_no_jobs() {
        let mut pool = pool(2);
        assert!(pool.retire(0));
        assert!(!pool.retire(0));
        assert!(!pool.retire(7));
        assert_eq!(pool.slot_states(), vec![SlotState::Stopped, SlotState::Idle]);

        let handle = pool.try_submit(job()).unwrap();
        assert_eq!(handle.worker, 1);
        assert!(pool.harvest_completed(true).unwrap().is_ok());

        assert!(pool.retire(1));
        assert!(matches!(pool.try_submit(job()), Err(SubmitError::NoWorkers(_))));
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn test_lost_ray_is_reaped() {
        let mut pool = pool(2);
        assert!(pool.retire(0));
        // A ray held by a thread that is gone never comes back.
        pool.set_state(0, SlotState::Busy);
        pool.in_flight = 1;
        assert!(pool.harvest_completed(true).is_none());
        assert_eq!(pool.slot_state(0), Some(SlotState::Stopped));
        assert_eq!(pool.slot_state(1), Some(SlotState::Idle));
    }

    #[test]
    fn test_lost_ray_reaped_when_every_worker_is_gone() {
        let mut pool = pool(1);
        assert!(pool.retire(0));
        pool.set_state(0, SlotState::Busy);
        pool.in_flight = 1;
        assert!(pool.harvest_completed(false).is_none());
        assert_eq!(pool.slot_state(0), Some(SlotState::Stopped));
    }

    #[test]
    fn test_zero_workers_is_fatal() {
        let config = EngineConfig {
            n_workers: 0,
            ..Default::default()
        };
        assert!(matches!(
            WorkerPool::new(Arc::new(config)),
            Err(EngineError::FatalConfig(_))
        ));
    }
}
