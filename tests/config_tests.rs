// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for configuration module

use scanner::Config;
use scanner::backends::{CaptureBackendType, DetectionType};
use scanner::session::{SessionOptions, VideoGravity};
use std::path::PathBuf;
use std::time::Duration;

fn temp_config_path() -> PathBuf {
    std::env::temp_dir()
        .join(format!("scanner-config-{}", uuid::Uuid::new_v4()))
        .join("config.json")
}

#[test]
fn test_config_default() {
    let config = Config::default();

    assert_eq!(config.backend, CaptureBackendType::V4l2);
    assert_eq!(config.detection_types, vec![DetectionType::Qr]);
    assert_eq!(config.video_gravity, VideoGravity::ResizeAspectFill);
    assert!((config.interest_fraction - 0.7).abs() < f32::EPSILON);
    assert!((config.bottom_inset - 49.0).abs() < f32::EPSILON);
    assert_eq!(config.max_dimension, 640);
    assert!(config.preferred_device.is_none());
}

#[test]
fn test_config_roundtrip_through_file() {
    let path = temp_config_path();
    let config = Config {
        preferred_device: Some("/dev/video2".into()),
        detection_types: vec![DetectionType::Qr, DetectionType::MicroQr],
        video_gravity: VideoGravity::ResizeAspect,
        ..Config::default()
    };

    config.save_to(&path).unwrap();
    let loaded = Config::load_from(&path).unwrap();
    assert_eq!(loaded, config);

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn test_missing_fields_take_defaults() {
    let path = temp_config_path();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, r#"{ "video_gravity": "resize" }"#).unwrap();

    let loaded = Config::load_from(&path).unwrap();
    assert_eq!(loaded.video_gravity, VideoGravity::Resize);
    assert_eq!(loaded.detection_types, vec![DetectionType::Qr]);
    assert_eq!(loaded.max_dimension, 640);

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn test_out_of_range_values_are_sanitized() {
    let path = temp_config_path();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(
        &path,
        r#"{ "interest_fraction": 3.5, "bottom_inset": -10.0, "max_dimension": 1 }"#,
    )
    .unwrap();

    let loaded = Config::load_from(&path).unwrap();
    assert!((loaded.interest_fraction - 0.7).abs() < f32::EPSILON);
    assert!((loaded.bottom_inset - 49.0).abs() < f32::EPSILON);
    assert_eq!(loaded.max_dimension, 64);

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn test_corrupt_file_is_an_error() {
    let path = temp_config_path();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "not json").unwrap();

    assert!(Config::load_from(&path).is_err());

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn test_session_options_follow_config() {
    let config = Config {
        detection_types: vec![DetectionType::Aztec],
        video_gravity: VideoGravity::Resize,
        torch_poll_interval_ms: 0,
        ..Config::default()
    };

    let options = SessionOptions::from_config(&config);
    assert_eq!(options.detection_types, vec![DetectionType::Aztec]);
    assert_eq!(options.video_gravity, VideoGravity::Resize);
    // Zero would spin the monitor thread
    assert_eq!(options.torch_poll_interval, Duration::from_millis(1));
}
