//! Runs the reference KDP, classifier and rate modules back to back on a
//! synthetic rain cell, the way one ray flows through the engine.

use dualpol::{
    category, FuzzyPid, KdpEstimator, KdpFilter, KdpInputs, KdpOutputs, KdpParams,
    ParticleClassifier, PidInputs, PidOutputs, PidParams, PrecipInputs, PrecipOutputs,
    PrecipParams, PrecipRates, RateEstimator, RateVariant,
};
use radar_common::{RayGeometry, MISSING};
use test_utils::{rain_moments, GATE_SPACING_KM, START_RANGE_KM};

const N_GATES: usize = 120;
/// Gate of the reflectivity peak produced by `rain_moments`.
const PEAK: usize = N_GATES / 3;

fn to_f64(v: &[f32]) -> Vec<f64> {
    v.iter().map(|x| *x as f64).collect()
}

struct Chain {
    snr: Vec<f64>,
    dbz: Vec<f64>,
    zdr: Vec<f64>,
    phidp: Vec<f64>,
    rhohv: Vec<f64>,
    kdp: KdpOutputs,
    pid: PidOutputs,
    rates: PrecipOutputs,
}

fn run_chain() -> Chain {
    let m = rain_moments(N_GATES, 0.0);
    let mut chain = Chain {
        snr: vec![30.0; N_GATES],
        dbz: to_f64(&m.dbz),
        zdr: to_f64(&m.zdr),
        phidp: to_f64(&m.phidp),
        rhohv: to_f64(&m.rhohv),
        kdp: KdpOutputs::default(),
        pid: PidOutputs::default(),
        rates: PrecipOutputs::default(),
    };
    let geometry = RayGeometry {
        n_gates: N_GATES,
        start_range_km: START_RANGE_KM,
        gate_spacing_km: GATE_SPACING_KM,
        azimuth_deg: 0.0,
        elevation_deg: 0.5,
    };

    let mut kdp = KdpFilter::new(KdpParams::default()).expect("kdp");
    kdp.compute(
        &KdpInputs {
            geometry,
            wavelength_m: 0.1071,
            snr: &chain.snr,
            dbz: &chain.dbz,
            zdr: &chain.zdr,
            rhohv: &chain.rhohv,
            phidp: &chain.phidp,
        },
        &mut chain.kdp,
    )
    .expect("kdp compute");

    let ldr = vec![MISSING; N_GATES];
    let temp = vec![20.0; N_GATES];
    let mut pid = FuzzyPid::new(PidParams::default()).expect("pid");
    pid.classify(
        &PidInputs {
            n_gates: N_GATES,
            snr: &chain.snr,
            dbz: &chain.dbz,
            zdr: &chain.zdr,
            kdp: &chain.kdp.kdp,
            ldr: &ldr,
            rhohv: &chain.rhohv,
            phidp: &chain.phidp,
            temp_c: &temp,
        },
        &mut chain.pid,
    )
    .expect("classify");

    let mut rates = PrecipRates::new(PrecipParams::default()).expect("rates");
    rates
        .estimate(
            &PrecipInputs {
                n_gates: N_GATES,
                snr: &chain.snr,
                dbz: &chain.dbz,
                zdr: &chain.zdr,
                kdp: &chain.kdp.kdp,
                pid: &chain.pid.pid,
            },
            &mut chain.rates,
        )
        .expect("estimate");

    chain
}

#[test]
fn test_outputs_cover_every_gate() {
    let chain = run_chain();
    assert_eq!(chain.kdp.kdp.len(), N_GATES);
    assert_eq!(chain.kdp.dbz_corrected.len(), N_GATES);
    assert_eq!(chain.pid.pid.len(), N_GATES);
    for variant in RateVariant::ALL {
        assert_eq!(chain.rates.get(variant).len(), N_GATES, "{}", variant.name());
    }
}

#[test]
fn test_kdp_positive_in_core_only() {
    let chain = run_chain();
    assert!(chain.kdp.kdp[PEAK] > 0.2, "kdp at peak {}", chain.kdp.kdp[PEAK]);
    let far = chain.kdp.kdp[N_GATES - 15];
    assert!(far == MISSING || far.abs() < 0.05, "kdp far out {far}");
}

#[test]
fn test_attenuation_correction_accumulates() {
    let chain = run_chain();
    let near = chain.kdp.dbz_correction[5];
    let far = chain.kdp.dbz_correction[N_GATES - 5];
    assert!(far > near);
    assert!(chain.kdp.dbz_corrected[N_GATES - 5] >= chain.dbz[N_GATES - 5]);
}

#[test]
fn test_core_classified_as_rain() {
    let chain = run_chain();
    let id = chain.pid.pid[PEAK];
    assert!(category::is_rain(id), "peak classified as {id}");
    assert!(chain.pid.interest[PEAK] > 0.5);
}

#[test]
fn test_core_has_heavier_rate_than_edge() {
    let chain = run_chain();
    let zh = chain.rates.get(RateVariant::Zh);
    assert!(zh[PEAK] > 1.0);
    assert!(zh[PEAK] <= PrecipParams::default().max_valid_rate);
    assert!(zh[N_GATES - 5] < zh[PEAK]);
}
