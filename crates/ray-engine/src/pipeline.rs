//! The per-ray pipeline run by each worker.
//!
//! Stages run strictly in order on one ray at a time:
//!
//! - A: ingest moments, derive SNR, ZDP, beam height and temperature
//! - B: KDP and attenuation correction, then interference location
//! - C: particle classification
//! - D: precipitation rates
//! - E: calibration samples (ZDR bias gates, self-consistency runs)
//! - F: output assembly
//!
//! Interference location and calibration sampling only run when enabled.
//! A failing stage aborts the rest and the ray produces no output.

use std::sync::Arc;

use dualpol::{
    FuzzyPid, KdpEstimator, KdpFilter, KdpInputs, ParticleClassifier, PidInputs, PrecipInputs,
    PrecipRates, RateEstimator, RlanInputs, RlanLocator, SelfConInputs, SelfConsistency,
    ZdrBiasInputs, ZdrBiasLocator, ZdrRegion,
};
use radar_common::{OutputRay, Ray, RayField, Volume, MISSING};
use tracing::debug;

use crate::calibration::{CalibrationSamples, SelfConRun};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::output::{assemble_output, direct_kdp};
use crate::profile::{beam_height_km, TemperatureProfile};
use crate::scratch::ScratchBuffers;

/// SNR assigned to gates with no reflectivity.
pub const SNR_FOR_MISSING_DBZ: f64 = -20.0;

/// Site properties shared by every ray of a volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SiteGeometry {
    pub radar_altitude_km: f64,
    pub wavelength_m: f64,
}

impl SiteGeometry {
    pub fn from_volume(volume: &Volume) -> Self {
        Self {
            radar_altitude_km: volume.radar_altitude_km,
            wavelength_m: volume.wavelength_m,
        }
    }
}

/// Noise power at `range_km` given the noise at 100 km.
pub fn noise_dbz(noise_dbz_at_100km: f64, range_km: f64) -> f64 {
    noise_dbz_at_100km + 20.0 * (range_km.log10() - 100f64.log10())
}

/// One ray's inputs, as handed to [`RayPipeline::set_input`].
#[derive(Debug, Clone)]
struct PipelineInput {
    ray: Arc<Ray>,
    profile: Arc<TemperatureProfile>,
    site: SiteGeometry,
}

/// Moments selected for classification and rates: DBZ, ZDR, KDP.
fn select<'a>(
    config: &EngineConfig,
    s: &'a ScratchBuffers,
) -> (&'a [f64], &'a [f64], &'a [f64]) {
    let (dbz, zdr) = if config.use_attenuation_corrected {
        (&s.kdp.dbz_corrected[..], &s.kdp.zdr_corrected[..])
    } else {
        (&s.dbz[..], &s.zdr[..])
    };
    let kdp = if config.use_self_consistency_kdp {
        &s.kdp.kdp_self_consistent[..]
    } else {
        direct_kdp(config, s)
    };
    (dbz, zdr, kdp)
}

fn require_field<'a>(ray: &'a Ray, name: &str) -> Result<&'a RayField> {
    ray.field(name)
        .ok_or_else(|| EngineError::missing_field(name, ray.elevation_deg, ray.azimuth_deg))
}

/// Interference and calibration analysers enabled by the configuration.
struct Analysers {
    rlan: Option<RlanLocator>,
    zdr_bias: Option<ZdrBiasLocator>,
    self_con: Option<SelfConsistency>,
}

impl Analysers {
    fn from_config(config: &EngineConfig) -> Result<Self> {
        let rlan = config
            .locate_rlan_interference
            .then(|| RlanLocator::new(config.rlan.clone()))
            .transpose()
            .map_err(|e| EngineError::fatal_config(format!("rlan: {e}")))?;
        let zdr_bias = config
            .estimates_zdr_bias()
            .then(|| ZdrBiasLocator::new(config.zdr_bias.clone()))
            .transpose()
            .map_err(|e| EngineError::fatal_config(format!("zdr_bias: {e}")))?;
        let self_con = config
            .estimate_z_bias_using_self_consistency
            .then(|| SelfConsistency::new(config.self_consistency.clone()))
            .transpose()
            .map_err(|e| EngineError::fatal_config(format!("self_consistency: {e}")))?;
        Ok(Self {
            rlan,
            zdr_bias,
            self_con,
        })
    }
}

/// Per-worker pipeline with its own algorithm instances and scratch arrays.
pub struct RayPipeline {
    config: Arc<EngineConfig>,
    kdp: Box<dyn KdpEstimator>,
    classifier: Box<dyn ParticleClassifier>,
    rates: Box<dyn RateEstimator>,
    analysers: Analysers,
    scratch: ScratchBuffers,
    calibration: CalibrationSamples,
    input: Option<PipelineInput>,
    output: Option<OutputRay>,
}

impl RayPipeline {
    /// Build a pipeline with the reference algorithm implementations.
    pub fn new(config: Arc<EngineConfig>) -> Result<Self> {
        let kdp = KdpFilter::new(config.kdp.clone())
            .map_err(|e| EngineError::fatal_config(format!("kdp: {e}")))?;
        let classifier = FuzzyPid::new(config.pid.clone())
            .map_err(|e| EngineError::fatal_config(format!("pid: {e}")))?;
        let rates = PrecipRates::new(config.precip.clone())
            .map_err(|e| EngineError::fatal_config(format!("precip: {e}")))?;
        Self::with_algorithms(config, Box::new(kdp), Box::new(classifier), Box::new(rates))
    }

    /// Build a pipeline around caller-supplied algorithm modules.
    ///
    /// The interference and calibration analysers are always the reference
    /// ones, built from `config` when enabled.
    pub fn with_algorithms(
        config: Arc<EngineConfig>,
        kdp: Box<dyn KdpEstimator>,
        classifier: Box<dyn ParticleClassifier>,
        rates: Box<dyn RateEstimator>,
    ) -> Result<Self> {
        let analysers = Analysers::from_config(&config)?;
        Ok(Self {
            config,
            kdp,
            classifier,
            rates,
            analysers,
            scratch: ScratchBuffers::new(),
            calibration: CalibrationSamples::default(),
            input: None,
            output: None,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn scratch(&self) -> &ScratchBuffers {
        &self.scratch
    }

    pub fn set_input(
        &mut self,
        ray: Arc<Ray>,
        profile: Arc<TemperatureProfile>,
        site: SiteGeometry,
    ) {
        self.input = Some(PipelineInput { ray, profile, site });
        self.output = None;
    }

    /// Run all stages on the current input.
    pub fn run(&mut self) -> Result<()> {
        self.output = None;
        self.calibration.clear();
        let input = self
            .input
            .clone()
            .ok_or_else(|| EngineError::InvalidRay("no input ray set".to_string()))?;

        self.ingest(&input)?;
        self.compute_kdp(&input)?;
        self.locate_interference(&input)?;
        self.classify()?;
        self.estimate_rates()?;
        self.collect_calibration(&input)?;
        let output = assemble_output(
            &self.config,
            &input.ray,
            &self.scratch,
            self.classifier.categories(),
        );

        debug!(
            time = %input.ray.time,
            azimuth = input.ray.azimuth_deg,
            elevation = input.ray.elevation_deg,
            gates = input.ray.n_gates,
            fields = output.fields.len(),
            rlan_gates = self.calibration.rlan_gates,
            "Ray processed"
        );
        self.output = Some(output);
        Ok(())
    }

    /// Take the output of the last successful run.
    pub fn take_output(&mut self) -> Option<OutputRay> {
        self.output.take()
    }

    /// Take the calibration samples of the last successful run.
    pub fn take_calibration(&mut self) -> CalibrationSamples {
        std::mem::take(&mut self.calibration)
    }

    /// Set the input, run, and return the output.
    pub fn process(
        &mut self,
        ray: Arc<Ray>,
        profile: Arc<TemperatureProfile>,
        site: SiteGeometry,
    ) -> Result<OutputRay> {
        self.set_input(ray, profile, site);
        self.run()?;
        self.take_output()
            .ok_or_else(|| EngineError::InvalidRay("pipeline produced no output".to_string()))
    }

    /// Stage A.
    fn ingest(&mut self, input: &PipelineInput) -> Result<()> {
        let ray = input.ray.as_ref();
        ray.validate()?;

        let config = &self.config;
        let names = &config.field_names;
        let s = &mut self.scratch;
        s.ensure_gates(ray.n_gates);

        require_field(ray, &names.dbz)?.load_into(&mut s.dbz);
        require_field(ray, &names.zdr)?.load_into(&mut s.zdr);
        require_field(ray, &names.phidp)?.load_into(&mut s.phidp);
        require_field(ray, &names.rhohv)?.load_into(&mut s.rhohv);
        if config.snr_available {
            require_field(ray, &names.snr)?.load_into(&mut s.snr);
        }
        if config.kdp_available {
            require_field(ray, &names.kdp)?.load_into(&mut s.kdp_input);
        }
        if config.ldr_available {
            if let Some(ldr) = ray.field(&names.ldr) {
                ldr.load_into(&mut s.ldr);
            }
        }
        if config.locate_rlan_interference || config.estimates_zdr_bias() {
            require_field(ray, &names.vel)?.load_into(&mut s.vel);
        }
        if config.estimates_zdr_bias() {
            require_field(ray, &names.zdrm)?.load_into(&mut s.zdrm);
            require_field(ray, &names.rhohv_nnc)?.load_into(&mut s.rhohv_nnc);
        }
        if config.ncp_available {
            if let Some(ncp) = ray.field(&names.ncp) {
                ncp.load_into(&mut s.ncp);
            }
        }

        let geometry = ray.geometry();
        let ratio = config.earth_radius_ratio();
        for i in 0..ray.n_gates {
            s.beam_height_km[i] = beam_height_km(
                geometry.range_km(i),
                ray.elevation_deg,
                input.site.radar_altitude_km,
                ratio,
            );
        }

        let ray_temp = if config.temp_available {
            ray.field(&names.temp)
        } else {
            None
        };
        if let Some(temp) = ray_temp {
            temp.load_into(&mut s.temp_c);
        }
        for i in 0..ray.n_gates {
            if s.temp_c[i] == MISSING {
                s.temp_c[i] = input.profile.temp_at(s.beam_height_km[i]);
            }
        }

        if !config.snr_available {
            let start_km = if ray.start_range_km == 0.0 {
                ray.gate_spacing_km / 10.0
            } else {
                ray.start_range_km
            };
            for i in 0..ray.n_gates {
                let dbz = s.dbz[i];
                s.snr[i] = if dbz == MISSING {
                    SNR_FOR_MISSING_DBZ
                } else {
                    let range_km = start_km + i as f64 * ray.gate_spacing_km;
                    dbz - noise_dbz(config.noise_dbz_at_100km, range_km)
                };
            }
        }

        for i in 0..ray.n_gates {
            let (dbz, zdr) = (s.dbz[i], s.zdr[i]);
            s.zdp[i] = if dbz == MISSING || zdr == MISSING {
                MISSING
            } else {
                let zh = 10f64.powf(dbz / 10.0);
                let zv = zh / 10f64.powf(zdr / 10.0);
                if zh > zv {
                    10.0 * (zh - zv).log10()
                } else {
                    MISSING
                }
            };
        }
        Ok(())
    }

    /// Stage B.
    fn compute_kdp(&mut self, input: &PipelineInput) -> Result<()> {
        let s = &mut self.scratch;
        let inputs = KdpInputs {
            geometry: input.ray.geometry(),
            wavelength_m: input.site.wavelength_m,
            snr: &s.snr,
            dbz: &s.dbz,
            zdr: &s.zdr,
            rhohv: &s.rhohv,
            phidp: &s.phidp,
        };
        self.kdp.compute(&inputs, &mut s.kdp)?;
        Ok(())
    }

    /// Stage B, second half.
    fn locate_interference(&mut self, input: &PipelineInput) -> Result<()> {
        let Some(locator) = self.analysers.rlan.as_mut() else {
            return Ok(());
        };
        let s = &mut self.scratch;
        let inputs = RlanInputs {
            geometry: input.ray.geometry(),
            nyquist_mps: input.ray.nyquist_mps,
            snr: &s.snr,
            zdr: &s.zdr,
            vel: &s.vel,
            ncp: self.config.ncp_available.then_some(s.ncp.as_slice()),
        };
        locator.locate(&inputs, &mut s.rlan)?;
        self.calibration.rlan_gates = s.rlan.flagged();
        Ok(())
    }

    /// Stage C.
    fn classify(&mut self) -> Result<()> {
        let mut out = std::mem::take(&mut self.scratch.pid);
        let result = {
            let (dbz, zdr, kdp) = select(&self.config, &self.scratch);
            let s = &self.scratch;
            let inputs = PidInputs {
                n_gates: s.n_gates(),
                snr: &s.snr,
                dbz,
                zdr,
                kdp,
                ldr: &s.ldr,
                rhohv: &s.rhohv,
                phidp: &s.phidp,
                temp_c: &s.temp_c,
            };
            self.classifier.classify(&inputs, &mut out)
        };
        self.scratch.pid = out;
        result.map_err(EngineError::from)
    }

    /// Stage D.
    fn estimate_rates(&mut self) -> Result<()> {
        let mut out = std::mem::take(&mut self.scratch.precip);
        let result = {
            let (dbz, zdr, kdp) = select(&self.config, &self.scratch);
            let s = &self.scratch;
            let inputs = PrecipInputs {
                n_gates: s.n_gates(),
                snr: &s.snr,
                dbz,
                zdr,
                kdp,
                pid: &s.pid.pid,
            };
            self.rates.estimate(&inputs, &mut out)
        };
        self.scratch.precip = out;
        result.map_err(EngineError::from)
    }

    /// Stage E.
    fn collect_calibration(&mut self, input: &PipelineInput) -> Result<()> {
        let config = &self.config;
        let geometry = input.ray.geometry();
        let s = &mut self.scratch;
        let kdp = if config.kdp_available {
            &s.kdp_input
        } else {
            &s.kdp.kdp
        };

        if let Some(locator) = self.analysers.zdr_bias.as_mut() {
            let inputs = ZdrBiasInputs {
                geometry,
                snr: &s.snr,
                dbz: &s.dbz,
                zdr: &s.zdr,
                zdrm: &s.zdrm,
                rhohv_nnc: &s.rhohv_nnc,
                vel: &s.vel,
                kdp,
                phidp_accum: &s.kdp.phidp_accum,
                temp_c: &s.temp_c,
                pid: &s.pid.pid,
            };
            for (enabled, region) in [
                (config.estimate_zdr_bias_in_ice, ZdrRegion::Ice),
                (config.estimate_zdr_bias_in_bragg, ZdrRegion::Bragg),
            ] {
                if enabled {
                    locator.locate(region, &inputs, &mut s.zdr_bias)?;
                    self.calibration.collect_zdr(region, &s.zdr_bias);
                }
            }
        }

        if let Some(check) = self.analysers.self_con.as_mut() {
            let inputs = SelfConInputs {
                geometry,
                snr: &s.snr,
                dbz: &s.dbz,
                zdr: &s.zdr,
                rhohv: &s.rhohv,
                kdp,
                phidp: &s.phidp,
                phidp_filtered: &s.kdp.phidp_filtered,
                phidp_accum: &s.kdp.phidp_accum,
                temp_c: &s.temp_c,
                pid: &s.pid.pid,
            };
            let mut results = Vec::new();
            check.analyze(&inputs, &mut results)?;
            let time = input.ray.time;
            self.calibration
                .self_consistency
                .extend(results.into_iter().map(|result| SelfConRun { time, result }));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noise_at_reference_range() {
        assert!((noise_dbz(-10.0, 100.0) - -10.0).abs() < 1e-12);
        assert!((noise_dbz(-10.0, 10.0) - -30.0).abs() < 1e-12);
    }

    #[test]
    fn test_run_without_input_fails() {
        let mut pipeline = RayPipeline::new(Arc::new(EngineConfig::default())).unwrap();
        assert!(pipeline.run().is_err());
        assert!(pipeline.take_output().is_none());
    }

    #[test]
    fn test_disabled_analysers_not_built() {
        let config = EngineConfig {
            estimate_zdr_bias_in_bragg: true,
            ..Default::default()
        };
        let pipeline = RayPipeline::new(Arc::new(config)).unwrap();
        assert!(pipeline.analysers.rlan.is_none());
        assert!(pipeline.analysers.zdr_bias.is_some());
        assert!(pipeline.analysers.self_con.is_none());
    }

    #[test]
    fn test_bad_params_are_fatal() {
        let mut config = EngineConfig::default();
        config.pid.classes.clear();
        let err = RayPipeline::new(Arc::new(config)).err().unwrap();
        assert!(matches!(err, EngineError::FatalConfig(_)));

        let config = EngineConfig {
            locate_rlan_interference: true,
            rlan: dualpol::RlanParams {
                n_gates_kernel: 1,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = RayPipeline::new(Arc::new(config)).err().unwrap();
        assert!(matches!(err, EngineError::FatalConfig(_)));
    }
}
