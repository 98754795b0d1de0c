//! Per-worker scratch arrays.
//!
//! Each [`RayPipeline`](crate::RayPipeline) owns one `ScratchBuffers`. The
//! arrays keep their capacity between rays and only grow, so after the
//! largest ray of a run has been seen no further allocation happens.

use dualpol::{KdpOutputs, PidOutputs, PrecipOutputs, RlanOutputs, ZdrBiasOutputs};
use radar_common::MISSING;

/// Reusable working arrays for one ray at a time.
#[derive(Debug, Default)]
pub struct ScratchBuffers {
    n_gates: usize,
    capacity: usize,

    pub snr: Vec<f64>,
    pub dbz: Vec<f64>,
    pub zdr: Vec<f64>,
    pub zdp: Vec<f64>,
    pub ldr: Vec<f64>,
    pub rhohv: Vec<f64>,
    pub phidp: Vec<f64>,
    /// Ray-supplied KDP when the input carries one
    pub kdp_input: Vec<f64>,
    pub temp_c: Vec<f64>,
    pub beam_height_km: Vec<f64>,
    pub vel: Vec<f64>,
    pub ncp: Vec<f64>,
    pub zdrm: Vec<f64>,
    pub rhohv_nnc: Vec<f64>,

    pub kdp: KdpOutputs,
    pub pid: PidOutputs,
    pub precip: PrecipOutputs,
    pub rlan: RlanOutputs,
    pub zdr_bias: ZdrBiasOutputs,
}

impl ScratchBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Size every ingestion array to `n_gates`, filled with [`MISSING`].
    ///
    /// Algorithm output arrays are sized by the algorithms themselves,
    /// except the interference and ZDR bias arrays, which are cleared here
    /// since their analysers only run when enabled.
    pub fn ensure_gates(&mut self, n_gates: usize) {
        self.n_gates = n_gates;
        for v in [
            &mut self.snr,
            &mut self.dbz,
            &mut self.zdr,
            &mut self.zdp,
            &mut self.ldr,
            &mut self.rhohv,
            &mut self.phidp,
            &mut self.kdp_input,
            &mut self.temp_c,
            &mut self.beam_height_km,
            &mut self.vel,
            &mut self.ncp,
            &mut self.zdrm,
            &mut self.rhohv_nnc,
        ] {
            v.clear();
            v.resize(n_gates, MISSING);
        }
        self.rlan.reset(n_gates);
        self.zdr_bias.reset(n_gates);
        self.capacity = self.capacity.max(n_gates);
    }

    /// Gate count of the current ray.
    pub fn n_gates(&self) -> usize {
        self.n_gates
    }

    /// Largest gate count seen so far.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
