//! Output assembly: turns a ray's scratch arrays into an [`OutputRay`].

use dualpol::{ParticleCategory, RateVariant};
use radar_common::{OutputField, OutputRay, Ray, MISSING, MISSING_F32};
use tracing::debug;

use crate::config::EngineConfig;
use crate::fields::{OutputFieldId, OutputFieldSpec};
use crate::scratch::ScratchBuffers;

#[inline]
fn to_f32(v: f64) -> f32 {
    if v == MISSING || !v.is_finite() {
        MISSING_F32
    } else {
        v as f32
    }
}

fn convert(data: &[f64]) -> Vec<f32> {
    data.iter().map(|v| to_f32(*v)).collect()
}

/// `raw + correction`, missing where either is missing.
fn corrected(raw: &[f64], correction: &[f64]) -> Vec<f32> {
    raw.iter()
        .zip(correction)
        .map(|(r, c)| {
            if *r == MISSING || *c == MISSING {
                MISSING_F32
            } else {
                to_f32(r + c)
            }
        })
        .collect()
}

/// Category ids as floats; ids `<= 0` are missing.
fn categories_to_f32(ids: &[i32]) -> Vec<f32> {
    ids.iter()
        .map(|id| if *id <= 0 { MISSING_F32 } else { *id as f32 })
        .collect()
}

/// Rates below `min_valid` are missing; the rest pass through unchanged.
fn thresholded(rates: &[f64], min_valid: f64) -> Vec<f32> {
    rates
        .iter()
        .map(|r| if *r < min_valid { MISSING_F32 } else { to_f32(*r) })
        .collect()
}

/// The direct KDP handed to classification: the ray's own KDP when the
/// input carries it, otherwise the estimator's.
pub(crate) fn direct_kdp<'a>(config: &EngineConfig, scratch: &'a ScratchBuffers) -> &'a [f64] {
    if config.kdp_available {
        &scratch.kdp_input
    } else {
        &scratch.kdp.kdp
    }
}

/// 1 where interference was found, 0 elsewhere; missing when not located.
fn rlan_flag(config: &EngineConfig, s: &ScratchBuffers) -> Vec<f32> {
    if !config.locate_rlan_interference {
        return vec![MISSING_F32; s.n_gates()];
    }
    s.rlan.flag.iter().map(|f| if *f { 1.0 } else { 0.0 }).collect()
}

fn field_data(config: &EngineConfig, id: OutputFieldId, s: &ScratchBuffers) -> Vec<f32> {
    use OutputFieldId::*;
    let rate = |variant| thresholded(s.precip.get(variant), config.precip.min_valid_rate);
    match id {
        Snr => convert(&s.snr),
        Dbz => convert(&s.dbz),
        Zdr => convert(&s.zdr),
        Zdp => convert(&s.zdp),
        Ldr => convert(&s.ldr),
        Rhohv => convert(&s.rhohv),
        Phidp => convert(&s.phidp),
        Kdp => convert(direct_kdp(config, s)),
        KdpSelfConsistent => convert(&s.kdp.kdp_self_consistent),
        DbzAttenCorrection => convert(&s.kdp.dbz_correction),
        ZdrAttenCorrection => convert(&s.kdp.zdr_correction),
        DbzAttenCorrected => corrected(&s.dbz, &s.kdp.dbz_correction),
        ZdrAttenCorrected => corrected(&s.zdr, &s.kdp.zdr_correction),
        Pid => categories_to_f32(&s.pid.pid),
        PidInterest => convert(&s.pid.interest),
        Temp => convert(&s.temp_c),
        BeamHeight => convert(&s.beam_height_km),
        RateZh => rate(RateVariant::Zh),
        RateZhSnow => rate(RateVariant::ZhSnow),
        RateZZdr => rate(RateVariant::ZZdr),
        RateKdp => rate(RateVariant::Kdp),
        RateKdpZdr => rate(RateVariant::KdpZdr),
        RateHybrid => rate(RateVariant::Hybrid),
        RatePid => rate(RateVariant::Pid),
        RateHidro => rate(RateVariant::Hidro),
        RateBringi => rate(RateVariant::Bringi),
        RlanFlag => rlan_flag(config, s),
        ZdrInIce => convert(&s.zdr_bias.zdr_in_ice),
        ZdrmInIce => convert(&s.zdr_bias.zdrm_in_ice),
        ZdrInBragg => convert(&s.zdr_bias.zdr_in_bragg),
        ZdrmInBragg => convert(&s.zdr_bias.zdrm_in_bragg),
    }
}

fn computed_field(config: &EngineConfig, spec: &OutputFieldSpec, s: &ScratchBuffers) -> OutputField {
    OutputField {
        id: Some(spec.id.as_str().to_string()),
        name: spec.name.clone(),
        long_name: spec.long_name.clone(),
        standard_name: spec.standard_name.clone(),
        units: spec.units.clone(),
        missing: MISSING_F32,
        data: field_data(config, spec.id, s),
    }
}

/// Whether a gate with category `id` is censored in copied fields.
pub fn is_censored(config: &EngineConfig, id: i32) -> bool {
    config.non_weather_classes.contains(&id)
        || id < config.valid_class_min
        || id > config.valid_class_max
}

fn copied_fields(config: &EngineConfig, ray: &Ray, s: &ScratchBuffers, out: &mut OutputRay) {
    for spec in &config.copy_fields {
        let Some(input) = ray.field(&spec.input_name) else {
            debug!(field = %spec.input_name, "Copy field not on ray, skipping");
            continue;
        };
        let mut field = OutputField::from_input(input, spec.output_name.clone());
        if spec.censor_non_weather {
            for (gate, id) in s.pid.pid.iter().enumerate() {
                if is_censored(config, *id) {
                    if let Some(v) = field.data.get_mut(gate) {
                        *v = field.missing;
                    }
                }
            }
        }
        out.add_field(field);
    }
}

fn debug_fields(config: &EngineConfig, s: &ScratchBuffers, out: &mut OutputRay) {
    let mut add = |name: &str, units: &str, data: Vec<f32>| {
        out.add_field(OutputField::new(format!("DEBUG_{name}"), units, data));
    };
    add("SNR", "dB", convert(&s.snr));
    add("DBZ", "dBZ", convert(&s.dbz));
    add("ZDR", "dB", convert(&s.zdr));
    add("ZDP", "dB", convert(&s.zdp));
    add("LDR", "dB", convert(&s.ldr));
    add("RHOHV", "", convert(&s.rhohv));
    add("PHIDP", "deg", convert(&s.phidp));
    add("TEMP", "C", convert(&s.temp_c));
    add("BEAM_HEIGHT", "km", convert(&s.beam_height_km));
    add("KDP", "deg/km", convert(&s.kdp.kdp));
    add("KDP_SC", "deg/km", convert(&s.kdp.kdp_self_consistent));
    add("PHIDP_FILT", "deg", convert(&s.kdp.phidp_filtered));
    add("PHIDP_ACCUM", "deg", convert(&s.kdp.phidp_accum));
    add("DBZ_CORRECTION", "dB", convert(&s.kdp.dbz_correction));
    add("ZDR_CORRECTION", "dB", convert(&s.kdp.zdr_correction));
    add("DBZ_CORRECTED", "dBZ", convert(&s.kdp.dbz_corrected));
    add("ZDR_CORRECTED", "dB", convert(&s.kdp.zdr_corrected));
    add("PID", "", categories_to_f32(&s.pid.pid));
    add("PID_INTEREST", "", convert(&s.pid.interest));
    add("SDZDR", "dB", convert(&s.pid.sdzdr));
    add("SDPHIDP", "deg", convert(&s.pid.sdphidp));
    for variant in RateVariant::ALL {
        let name = format!("RATE_{}", variant.name().to_uppercase());
        add(name.as_str(), "mm/h", convert(s.precip.get(variant)));
    }
    if config.locate_rlan_interference {
        let r = &s.rlan;
        add("PHASE_RLAN", "deg", convert(&r.phase));
        add("PHASE_CHANGE_RLAN", "deg", convert(&r.phase_change_error));
        add("SNR_MODE_RLAN", "dB", convert(&r.snr_mode));
        add("SNR_DMODE_RLAN", "dB", convert(&r.snr_dmode));
        add("ZDR_MODE_RLAN", "dB", convert(&r.zdr_mode));
        add("ZDR_DMODE_RLAN", "dB", convert(&r.zdr_dmode));
        add("NCP_MEAN_RLAN", "", convert(&r.ncp_mean));
        add("INTEREST_RLAN", "", convert(&r.interest));
    }
    if config.estimates_zdr_bias() {
        add("ZDR_IN_ICE", "dB", convert(&s.zdr_bias.zdr_in_ice));
        add("ZDR_IN_BRAGG", "dB", convert(&s.zdr_bias.zdr_in_bragg));
    }
}

fn interest_fields(categories: &[ParticleCategory], s: &ScratchBuffers, out: &mut OutputRay) {
    for (k, category) in categories.iter().enumerate() {
        let data = match s.pid.class_interest.get(k) {
            Some(v) => convert(v),
            None => vec![MISSING_F32; s.n_gates()],
        };
        out.add_field(OutputField::new(format!("{}_interest", category.label), "", data));
    }
}

/// Build the output ray for `ray` from completed scratch arrays.
pub fn assemble_output(
    config: &EngineConfig,
    ray: &Ray,
    scratch: &ScratchBuffers,
    categories: &[ParticleCategory],
) -> OutputRay {
    let mut out = OutputRay::from_source(ray);

    for spec in &config.output_fields {
        out.add_field(computed_field(config, spec, scratch));
    }
    if config.copy_input_fields {
        copied_fields(config, ray, scratch, &mut out);
    }
    if config.diagnostics.debug_fields {
        debug_fields(config, scratch, &mut out);
    }
    if config.diagnostics.particle_interest_fields {
        interest_fields(categories, scratch, &mut out);
    }
    if let Some(max_range) = config.max_range_km {
        out.truncate_gates(ray.geometry().gates_within(max_range));
    }
    out
}
