//! Integration tests for source volumes, fades and user volume settings

use std::sync::Arc;

use opl_multisource::opl::OPL_MASK_LEVEL;
use opl_multisource::{
    AdlibMultisource, DriverConfig, FadeAbortType, RecorderHandle, RecordingBackend, SourceType,
    UserVolumeSettings,
};

/// Carrier level register of OPL channel 0
const CARRIER_LEVEL_CH0: u16 = 0x43;
/// Carrier level register of OPL channel 1
const CARRIER_LEVEL_CH1: u16 = 0x44;

/// Open a driver and start a loud middle C on channel 0 of each given source
fn play(config: DriverConfig, sources: &[u8]) -> (Arc<AdlibMultisource<RecordingBackend>>, RecorderHandle) {
    let (backend, handle) = RecordingBackend::new();
    let driver = Arc::new(AdlibMultisource::new(backend, config));
    driver.open().expect("Recording backend should open");
    driver.send(-1, 0x00_7F_07_B0);
    for &source in sources {
        driver.send(source as i8, 0x00_7F_3C_90);
    }
    (driver, handle)
}

fn carrier_level(handle: &RecorderHandle, reg: u16) -> u8 {
    handle.register(reg) & OPL_MASK_LEVEL
}

#[test]
fn test_fade_out_silences_source() {
    let (driver, handle) = play(DriverConfig::default(), &[0]);
    let initial = carrier_level(&handle, CARRIER_LEVEL_CH0);
    assert!(initial < OPL_MASK_LEVEL, "Note should be audible");

    driver.start_fade(0, 100, 0);
    assert!(driver.is_fading(0u8));

    handle.fire_timer();
    assert_eq!(driver.source_volume(0).map(|level| level.volume), Some(245));
    assert!(carrier_level(&handle, CARRIER_LEVEL_CH0) >= initial);

    for _ in 0..24 {
        handle.fire_timer();
    }
    assert!(!driver.is_fading(0u8));
    assert_eq!(carrier_level(&handle, CARRIER_LEVEL_CH0), OPL_MASK_LEVEL);
}

#[test]
fn test_fades_run_independently() {
    let (driver, handle) = play(DriverConfig::default(), &[1, 2]);

    driver.start_fade(1, 40, 0);
    driver.start_fade(2, 200, 0);
    for _ in 0..10 {
        handle.fire_timer();
    }

    assert!(!driver.is_fading(1u8));
    assert!(driver.is_fading(2u8));
    assert!(driver.is_fading(opl_multisource::SourceTarget::All));
    assert_eq!(carrier_level(&handle, CARRIER_LEVEL_CH0), OPL_MASK_LEVEL);
    assert!(carrier_level(&handle, CARRIER_LEVEL_CH1) < OPL_MASK_LEVEL);
}

#[test]
fn test_abort_fade_restores_start_volume() {
    let (driver, handle) = play(DriverConfig::default(), &[0]);
    let initial = carrier_level(&handle, CARRIER_LEVEL_CH0);

    driver.start_fade(0, 1000, 0);
    for _ in 0..20 {
        handle.fire_timer();
    }
    driver.abort_fade(0u8, FadeAbortType::StartVolume);

    assert!(!driver.is_fading(0u8));
    assert_eq!(driver.source_volume(0).map(|level| level.volume), Some(255));
    assert_eq!(carrier_level(&handle, CARRIER_LEVEL_CH0), initial);
}

#[test]
fn test_mute_silences_all_sources() {
    let config = DriverConfig {
        user_volume_scaling: true,
        ..DriverConfig::default()
    };
    let (driver, handle) = play(config, &[0, 1]);
    driver.set_source_type(1u8, SourceType::Sfx);
    let music = carrier_level(&handle, CARRIER_LEVEL_CH0);

    driver.sync_sound_settings(UserVolumeSettings {
        mute: true,
        ..UserVolumeSettings::default()
    });
    assert_eq!(carrier_level(&handle, CARRIER_LEVEL_CH0), OPL_MASK_LEVEL);
    assert_eq!(carrier_level(&handle, CARRIER_LEVEL_CH1), OPL_MASK_LEVEL);

    driver.sync_sound_settings(UserVolumeSettings::default());
    assert_eq!(carrier_level(&handle, CARRIER_LEVEL_CH0), music);
}

#[test]
fn test_user_volume_only_scales_matching_type() {
    let config = DriverConfig {
        user_volume_scaling: true,
        ..DriverConfig::default()
    };
    let (driver, handle) = play(config, &[0, 1]);
    driver.set_source_type(0u8, SourceType::Music);
    driver.set_source_type(1u8, SourceType::Sfx);
    let sfx = carrier_level(&handle, CARRIER_LEVEL_CH1);

    driver.sync_sound_settings(UserVolumeSettings {
        music_volume: 0,
        ..UserVolumeSettings::default()
    });

    assert_eq!(carrier_level(&handle, CARRIER_LEVEL_CH0), OPL_MASK_LEVEL);
    assert_eq!(carrier_level(&handle, CARRIER_LEVEL_CH1), sfx);
}
