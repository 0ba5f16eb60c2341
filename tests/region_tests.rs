// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for viewfinder to sensor region mapping

use scanner::backends::SensorRotation;
use scanner::geometry::{NormalizedRect, Rect, Size};
use scanner::session::{DeviceOrientation, DisplayOrientation, RegionMapper, VideoGravity, interest_rect};

fn assert_close(actual: NormalizedRect, expected: NormalizedRect) {
    let diffs = [
        actual.x - expected.x,
        actual.y - expected.y,
        actual.width - expected.width,
        actual.height - expected.height,
    ];
    assert!(
        diffs.iter().all(|d| d.abs() < 1e-4),
        "expected {:?}, got {:?}",
        expected,
        actual
    );
}

#[test]
fn test_full_viewport_without_sensor_size_is_full_frame() {
    let mapper = RegionMapper::new(None, SensorRotation::None);
    let container = Rect::new(0.0, 0.0, 390.0, 844.0);
    let rect = mapper.compute_detection_rect(
        container,
        container,
        DisplayOrientation::Portrait,
        VideoGravity::ResizeAspectFill,
    );
    assert_close(rect, NormalizedRect::FULL);
}

#[test]
fn test_full_viewport_with_matching_aspect_is_full_frame() {
    // Landscape sensor mounted a quarter turn off shows upright in portrait
    let mapper = RegionMapper::new(Some(Size::new(640.0, 480.0)), SensorRotation::Rotate90);
    let container = Rect::new(0.0, 0.0, 480.0, 640.0);
    let rect = mapper.compute_detection_rect(
        container,
        container,
        DisplayOrientation::Portrait,
        VideoGravity::ResizeAspectFill,
    );
    assert_close(rect, NormalizedRect::FULL);
}

#[test]
fn test_wide_viewport_is_cropped_and_axis_swapped() {
    // 2:1 sensor rotated into a 1:1 container: aspect fill crops top and bottom
    let mapper = RegionMapper::new(Some(Size::new(200.0, 100.0)), SensorRotation::Rotate90);
    let container = Rect::new(0.0, 0.0, 100.0, 100.0);
    let viewport = Rect::new(0.0, 25.0, 100.0, 50.0);

    let rect = mapper.compute_detection_rect(
        viewport,
        container,
        DisplayOrientation::Portrait,
        VideoGravity::ResizeAspectFill,
    );
    assert_close(rect, NormalizedRect::new(0.375, 0.0, 0.25, 1.0));
}

#[test]
fn test_upside_down_mirrors_both_axes() {
    let mapper = RegionMapper::new(None, SensorRotation::None);
    let container = Rect::new(0.0, 0.0, 100.0, 100.0);
    let viewport = Rect::new(10.0, 20.0, 30.0, 40.0);

    let rect = mapper.compute_detection_rect(
        viewport,
        container,
        DisplayOrientation::UpsideDown,
        VideoGravity::Resize,
    );
    assert_close(rect, NormalizedRect::new(0.6, 0.4, 0.3, 0.4));
}

#[test]
fn test_viewport_in_letterbox_is_clamped() {
    let mapper = RegionMapper::new(Some(Size::new(200.0, 100.0)), SensorRotation::None);
    let container = Rect::new(0.0, 0.0, 100.0, 100.0);

    // Video occupies y 25..75; the viewport spills into both bars
    let rect = mapper.compute_detection_rect(
        Rect::new(0.0, 0.0, 100.0, 100.0),
        container,
        DisplayOrientation::Portrait,
        VideoGravity::ResizeAspect,
    );
    assert_close(rect, NormalizedRect::FULL);
}

#[test]
fn test_empty_layout_falls_back_to_full_frame() {
    let mapper = RegionMapper::new(Some(Size::new(640.0, 480.0)), SensorRotation::None);
    let empty = Rect::default();
    let viewport = Rect::new(10.0, 10.0, 50.0, 50.0);

    let rect = mapper.compute_detection_rect(
        viewport,
        empty,
        DisplayOrientation::Portrait,
        VideoGravity::ResizeAspectFill,
    );
    assert_close(rect, NormalizedRect::FULL);

    let rect = mapper.compute_detection_rect(
        empty,
        Rect::new(0.0, 0.0, 100.0, 100.0),
        DisplayOrientation::Portrait,
        VideoGravity::ResizeAspectFill,
    );
    assert_close(rect, NormalizedRect::FULL);
}

#[test]
fn test_device_orientation_swaps_landscape() {
    assert_eq!(
        DeviceOrientation::LandscapeLeft.display_orientation(),
        DisplayOrientation::LandscapeRight
    );
    assert_eq!(
        DeviceOrientation::LandscapeRight.display_orientation(),
        DisplayOrientation::LandscapeLeft
    );
    assert_eq!(
        DeviceOrientation::PortraitUpsideDown.display_orientation(),
        DisplayOrientation::UpsideDown
    );
    for flat in [
        DeviceOrientation::FaceUp,
        DeviceOrientation::FaceDown,
        DeviceOrientation::Unknown,
    ] {
        assert_eq!(flat.display_orientation(), DisplayOrientation::Portrait);
    }
}

#[test]
fn test_default_interest_rect_maps_inside_frame() {
    let container = Rect::new(0.0, 0.0, 390.0, 844.0);
    let viewport = interest_rect(container, 0.7, 49.0);
    assert!((viewport.width - 273.0).abs() < 1e-3);
    assert_eq!(viewport.width, viewport.height);

    let mapper = RegionMapper::new(Some(Size::new(1920.0, 1080.0)), SensorRotation::Rotate90);
    let rect = mapper.compute_detection_rect(
        viewport,
        container,
        DisplayOrientation::Portrait,
        VideoGravity::ResizeAspectFill,
    );
    assert!(rect.x >= 0.0 && rect.y >= 0.0);
    assert!(rect.x + rect.width <= 1.0 + 1e-4);
    assert!(rect.y + rect.height <= 1.0 + 1e-4);
    assert!(rect.width > 0.0 && rect.height > 0.0);
}
