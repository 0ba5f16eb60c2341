// SPDX-License-Identifier: GPL-3.0-only

//! Mapping a viewfinder rectangle into detection space
//!
//! The preview shows the sensor image rotated into display orientation and
//! scaled into its container according to the video gravity. A rectangle the
//! UI draws on top of that preview therefore has to be
//!
//! 1. located relative to the displayed video (which may overflow the
//!    container under aspect fill, or be letterboxed under aspect fit),
//! 2. normalized against the displayed video size, and
//! 3. rotated back into the sensor's native orientation.
//!
//! Everything here is a pure function of its inputs.

use crate::backends::SensorRotation;
use crate::geometry::{NormalizedRect, Rect, Size};
use serde::{Deserialize, Serialize};

/// How the preview scales video into its container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoGravity {
    /// Preserve aspect ratio, fill the container, crop the overflow
    #[default]
    ResizeAspectFill,
    /// Preserve aspect ratio, fit inside the container (letterbox)
    ResizeAspect,
    /// Stretch to the container
    Resize,
}

impl std::str::FromStr for VideoGravity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "fill" | "resize_aspect_fill" => Ok(VideoGravity::ResizeAspectFill),
            "fit" | "resize_aspect" => Ok(VideoGravity::ResizeAspect),
            "stretch" | "resize" => Ok(VideoGravity::Resize),
            _ => Err(format!("unknown video gravity '{}'", s)),
        }
    }
}

/// Orientation of the displayed preview
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayOrientation {
    #[default]
    Portrait,
    LandscapeLeft,
    UpsideDown,
    LandscapeRight,
}

impl DisplayOrientation {
    /// Clockwise quarter turns from display space back to the upright image
    pub fn quarter_turns(self) -> u32 {
        match self {
            DisplayOrientation::Portrait => 0,
            DisplayOrientation::LandscapeLeft => 1,
            DisplayOrientation::UpsideDown => 2,
            DisplayOrientation::LandscapeRight => 3,
        }
    }
}

/// Physical orientation reported by the device's motion sensors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceOrientation {
    #[default]
    Unknown,
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    LandscapeRight,
    FaceUp,
    FaceDown,
}

impl DeviceOrientation {
    /// Display orientation the preview should use
    ///
    /// Turning the device left turns the picture right, so the landscape
    /// cases swap. Orientations without a cardinal direction fall back to
    /// portrait.
    pub fn display_orientation(self) -> DisplayOrientation {
        match self {
            DeviceOrientation::LandscapeLeft => DisplayOrientation::LandscapeRight,
            DeviceOrientation::LandscapeRight => DisplayOrientation::LandscapeLeft,
            DeviceOrientation::PortraitUpsideDown => DisplayOrientation::UpsideDown,
            DeviceOrientation::Portrait
            | DeviceOrientation::FaceUp
            | DeviceOrientation::FaceDown
            | DeviceOrientation::Unknown => DisplayOrientation::Portrait,
        }
    }
}

/// Converts viewfinder rectangles into normalized sensor coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RegionMapper {
    /// Native sensor frame size; `None` means the video exactly fills the
    /// container
    sensor_size: Option<Size>,
    /// Mounting rotation of the sensor
    sensor_rotation: SensorRotation,
}

impl RegionMapper {
    pub fn new(sensor_size: Option<Size>, sensor_rotation: SensorRotation) -> Self {
        Self {
            sensor_size: sensor_size.filter(|s| !s.is_empty()),
            sensor_rotation,
        }
    }

    pub fn sensor_size(&self) -> Option<Size> {
        self.sensor_size
    }

    /// Total clockwise quarter turns between display and sensor space
    fn quarter_turns(&self, orientation: DisplayOrientation) -> u32 {
        (orientation.quarter_turns() + self.sensor_rotation.quarter_turns()) % 4
    }

    /// Where the video lands inside `container`, in the container's
    /// coordinate space
    pub fn displayed_video_rect(
        &self,
        container: Rect,
        orientation: DisplayOrientation,
        gravity: VideoGravity,
    ) -> Rect {
        let Some(sensor) = self.sensor_size else {
            return container;
        };
        let video = if self.quarter_turns(orientation) % 2 == 1 {
            sensor.transposed()
        } else {
            sensor
        };
        if container.is_empty() {
            return container;
        }

        let scale_x = container.width / video.width;
        let scale_y = container.height / video.height;
        let scale = match gravity {
            VideoGravity::Resize => return container,
            VideoGravity::ResizeAspect => scale_x.min(scale_y),
            VideoGravity::ResizeAspectFill => scale_x.max(scale_y),
        };

        let width = video.width * scale;
        let height = video.height * scale;
        Rect::new(
            container.x + (container.width - width) / 2.0,
            container.y + (container.height - height) / 2.0,
            width,
            height,
        )
    }

    /// Normalized sensor-space rectangle covering `viewport`
    ///
    /// Parts of the viewport outside the displayed video are dropped. An
    /// empty viewport or container yields the full frame, so a layout pass
    /// before the view has a size never blinds the detector.
    pub fn compute_detection_rect(
        &self,
        viewport: Rect,
        container: Rect,
        orientation: DisplayOrientation,
        gravity: VideoGravity,
    ) -> NormalizedRect {
        if viewport.is_empty() || container.is_empty() {
            return NormalizedRect::FULL;
        }

        let video = self.displayed_video_rect(container, orientation, gravity);
        let display = NormalizedRect::new(
            (viewport.x - video.x) / video.width,
            (viewport.y - video.y) / video.height,
            viewport.width / video.width,
            viewport.height / video.height,
        )
        .clamped();

        rotate_to_sensor(display, self.quarter_turns(orientation)).clamped()
    }
}

/// Rotate a normalized rect from display space into sensor space
fn rotate_to_sensor(r: NormalizedRect, quarter_turns: u32) -> NormalizedRect {
    match quarter_turns % 4 {
        1 => NormalizedRect::new(r.y, 1.0 - r.x - r.width, r.height, r.width),
        2 => NormalizedRect::new(1.0 - r.x - r.width, 1.0 - r.y - r.height, r.width, r.height),
        3 => NormalizedRect::new(1.0 - r.y - r.height, r.x, r.height, r.width),
        _ => r,
    }
}

/// Default viewfinder rectangle inside `content`
///
/// A centered square whose side is `fraction` of the content width, kept
/// inside the area above the bottom controls.
pub fn interest_rect(content: Rect, fraction: f32, bottom_inset: f32) -> Rect {
    let available_height = (content.height - bottom_inset).max(0.0);
    let side = (content.width * fraction.clamp(0.0, 1.0)).min(available_height);
    Rect::new(
        content.x + (content.width - side) / 2.0,
        content.y + (available_height - side) / 2.0,
        side,
        side,
    )
}
