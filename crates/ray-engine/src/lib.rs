//! Concurrent per-ray dual-polarization computation engine.
//!
//! Rays from a radar volume are dispatched to a fixed pool of worker
//! threads. Each worker owns a [`RayPipeline`] with its own scratch arrays
//! and algorithm instances, and runs every ray through six stages:
//!
//! ```text
//! Volume ──► RayDispatcher ──try_submit──► WorkerPool
//!                 │                          │
//!                 │                   ray-worker-{i}
//!                 │                          │
//!                 │               A ingest, SNR, beam height, temperature
//!                 │               B KDP, attenuation, RLAN interference
//!                 │               C particle classification
//!                 │               D precipitation rates
//!                 │               E calibration samples
//!                 │               F output assembly
//!                 │                          │
//!                 ◄──────harvest_completed───┘
//!                 │
//!                 ▼
//!          OutputAssembler
//! ```
//!
//! The temperature profile is loaded once per volume by the dispatcher and
//! shared read-only with every job of that volume. Calibration samples
//! travel back with each harvest and are reduced to volume ZDR and Z bias
//! estimates by the [`OutputAssembler`].
//!
//! # Example
//!
//! ```ignore
//! use ray_engine::{EngineConfig, RayDispatcher};
//!
//! let config = EngineConfig::from_yaml_file("engine.yaml")?;
//! let mut dispatcher = RayDispatcher::new(config)?;
//! let assembler = dispatcher.run(&volume)?;
//! for output in assembler.into_sorted() {
//!     // hand to interpolation
//! }
//! ```

pub mod assembler;
pub mod calibration;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod fields;
pub mod output;
pub mod pipeline;
pub mod pool;
pub mod profile;
pub mod scratch;

pub use assembler::{OutputAssembler, RayFailure};
pub use calibration::{
    BiasStats, CalibrationSamples, CalibrationSummary, PercentileValue, SelfConRun, SelfConZBias,
    VolumeCalibration,
};
pub use config::{DiagnosticsConfig, EngineConfig, FieldNames, ProfileConfig, ProfileSourceKind};
pub use dispatcher::RayDispatcher;
pub use error::{EngineError, Result};
pub use fields::{default_output_fields, CopyFieldSpec, OutputFieldId, OutputFieldSpec};
pub use output::{assemble_output, is_censored};
pub use pipeline::{noise_dbz, RayPipeline, SiteGeometry, SNR_FOR_MISSING_DBZ};
pub use pool::{Harvest, JobHandle, RayJob, SlotState, SubmitError, WorkerPool};
pub use profile::{
    beam_height_km, ProfileBroadcast, ProfilePoint, ProfileSource, SoundingDirSource,
    StaticProfileSource, TemperatureProfile,
};
pub use scratch::ScratchBuffers;
