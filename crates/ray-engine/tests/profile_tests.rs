//! Integration tests for temperature profile loading and broadcast.

use chrono::Duration;
use ray_engine::{
    EngineConfig, ProfileBroadcast, ProfileConfig, ProfileSource, ProfileSourceKind,
    RayDispatcher, SoundingDirSource, TemperatureProfile,
};
use test_utils::{
    assert_approx_eq, base_time, sounding_config_yaml, sounding_dir, synthetic_volume,
    SUMMER_SOUNDING, WINTER_SOUNDING,
};

#[test]
fn test_sounding_dir_picks_nearest_file() {
    let dir = sounding_dir(&[
        (base_time(), &SUMMER_SOUNDING[..]),
        (base_time() + Duration::hours(6), &WINTER_SOUNDING[..]),
    ])
    .expect("soundings");
    let source = SoundingDirSource::new(dir.path(), 10_800, 0.0);

    let summer = source.fetch(base_time() + Duration::hours(1)).expect("summer");
    assert_approx_eq!(summer.temp_at(1.5), 17.0, 1e-12);
    assert_approx_eq!(summer.freezing_level_km().expect("freezing level"), 4.0, 1e-9);

    let winter = source.fetch(base_time() + Duration::hours(5)).expect("winter");
    assert_approx_eq!(winter.temp_at(1.5), -8.0, 1e-12);

    assert!(source.fetch(base_time() + Duration::days(2)).is_err());
}

#[test]
fn test_sounding_height_correction() {
    let dir = sounding_dir(&[(base_time(), &SUMMER_SOUNDING[..])]).expect("soundings");
    let source = SoundingDirSource::new(dir.path(), 3_600, 0.5);
    let profile = source.fetch(base_time()).expect("profile");
    assert_approx_eq!(profile.temp_at(2.0), 17.0, 1e-12);
}

#[test]
fn test_dispatcher_uses_volume_sounding() {
    let dir = sounding_dir(&[
        (base_time(), &SUMMER_SOUNDING[..]),
        (base_time() + Duration::hours(6), &WINTER_SOUNDING[..]),
    ])
    .expect("soundings");
    let config = EngineConfig::from_yaml(&sounding_config_yaml(dir.path(), 2)).expect("yaml");
    assert_eq!(config.profile.source, ProfileSourceKind::SoundingDir);

    let mut dispatcher = RayDispatcher::new(config).expect("dispatcher");

    let mut volume = synthetic_volume(3, 60);
    dispatcher.run(&volume).expect("summer run");
    assert_approx_eq!(dispatcher.profiles().current().temp_at(1.5), 17.0, 1e-12);

    volume.start_time = base_time() + Duration::hours(6);
    dispatcher.run(&volume).expect("winter run");
    assert_approx_eq!(dispatcher.profiles().current().temp_at(1.5), -8.0, 1e-12);
    assert_eq!(dispatcher.profiles().fallbacks(), 0);

    volume.start_time = base_time() + Duration::days(3);
    let assembler = dispatcher.run(&volume).expect("fallback run");
    assert_eq!(assembler.harvested(), 3);
    assert_eq!(dispatcher.profiles().fallbacks(), 1);
    assert_eq!(
        *dispatcher.profiles().current(),
        TemperatureProfile::standard_atmosphere()
    );
}

#[test]
fn test_failed_checks_fall_back_to_default() {
    let dir = sounding_dir(&[(base_time(), &WINTER_SOUNDING[..])]).expect("soundings");
    let checks = ProfileConfig {
        source: ProfileSourceKind::SoundingDir,
        dir: Some(dir.path().to_path_buf()),
        check_height_range: true,
        min_height_km: 0.0,
        max_height_km: 12.0,
        ..Default::default()
    };
    let broadcast = ProfileBroadcast::from_config(&checks).expect("broadcast");
    let profile = broadcast.load_for_volume(base_time());
    assert_eq!(broadcast.fallbacks(), 1);
    assert_eq!(*profile, TemperatureProfile::standard_atmosphere());
}

#[test]
fn test_configured_default_profile() {
    let yaml = r#"
profile:
  default_profile:
    - { height_km: 0.0, temp_c: 30.0 }
    - { height_km: 5.0, temp_c: 0.0 }
"#;
    let config = EngineConfig::from_yaml(yaml).expect("yaml");
    let broadcast = ProfileBroadcast::from_config(&config.profile).expect("broadcast");
    let profile = broadcast.load_for_volume(base_time());
    assert_eq!(broadcast.fallbacks(), 0);
    assert_approx_eq!(profile.temp_at(2.5), 15.0, 1e-12);
    assert_approx_eq!(profile.freezing_level_km().expect("freezing level"), 5.0, 1e-12);
}
