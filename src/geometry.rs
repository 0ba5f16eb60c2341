// SPDX-License-Identifier: GPL-3.0-only

//! Geometry primitives shared by the session and the capture backends
//!
//! UI-space rectangles ([`Rect`]) are in the host's layout units. Detection
//! space rectangles ([`NormalizedRect`]) are normalized (0.0 to 1.0) relative
//! to the sensor frame, so they stay valid regardless of capture resolution.

use serde::{Deserialize, Serialize};

/// Width and height in layout units or pixels
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// Width divided by height, `None` for degenerate sizes
    pub fn aspect_ratio(&self) -> Option<f32> {
        if self.width > 0.0 && self.height > 0.0 {
            Some(self.width / self.height)
        } else {
            None
        }
    }

    /// Same size with the axes swapped
    pub fn transposed(&self) -> Self {
        Self::new(self.height, self.width)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// Axis-aligned rectangle in UI space
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_size(size: Size) -> Self {
        Self::new(0.0, 0.0, size.width, size.height)
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn max_x(&self) -> f32 {
        self.x + self.width
    }

    pub fn max_y(&self) -> f32 {
        self.y + self.height
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn is_empty(&self) -> bool {
        self.size().is_empty()
    }
}

/// A rectangle in normalized detection space
///
/// Coordinates are normalized (0.0 to 1.0) relative to the frame dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRect {
    /// Left edge (0.0 = left of frame, 1.0 = right of frame)
    pub x: f32,
    /// Top edge (0.0 = top of frame, 1.0 = bottom of frame)
    pub y: f32,
    /// Width as fraction of frame width
    pub width: f32,
    /// Height as fraction of frame height
    pub height: f32,
}

impl Default for NormalizedRect {
    fn default() -> Self {
        Self::FULL
    }
}

impl NormalizedRect {
    /// The whole frame
    pub const FULL: NormalizedRect = NormalizedRect {
        x: 0.0,
        y: 0.0,
        width: 1.0,
        height: 1.0,
    };

    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Create a normalized rect from pixel coordinates
    pub fn from_pixels(
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        frame_width: u32,
        frame_height: u32,
    ) -> Self {
        if frame_width == 0 || frame_height == 0 {
            return Self::new(0.0, 0.0, 0.0, 0.0);
        }
        Self {
            x: x as f32 / frame_width as f32,
            y: y as f32 / frame_height as f32,
            width: width as f32 / frame_width as f32,
            height: height as f32 / frame_height as f32,
        }
        .clamped()
    }

    /// Intersect with the unit square
    pub fn clamped(&self) -> Self {
        let x0 = self.x.clamp(0.0, 1.0);
        let y0 = self.y.clamp(0.0, 1.0);
        let x1 = (self.x + self.width).clamp(0.0, 1.0);
        let y1 = (self.y + self.height).clamp(0.0, 1.0);
        Self::new(x0, y0, (x1 - x0).max(0.0), (y1 - y0).max(0.0))
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    pub fn is_full(&self) -> bool {
        *self == Self::FULL
    }

    /// Pixel bounds `(x, y, width, height)` of this rect inside a frame
    ///
    /// Never returns a zero-sized region for a non-empty frame.
    pub fn to_pixels(&self, frame_width: u32, frame_height: u32) -> (u32, u32, u32, u32) {
        let r = self.clamped();
        let x = ((r.x * frame_width as f32).floor() as u32).min(frame_width.saturating_sub(1));
        let y = ((r.y * frame_height as f32).floor() as u32).min(frame_height.saturating_sub(1));
        let max_x = ((r.x + r.width) * frame_width as f32).ceil() as u32;
        let max_y = ((r.y + r.height) * frame_height as f32).ceil() as u32;
        let width = max_x.min(frame_width).saturating_sub(x).max(1);
        let height = max_y.min(frame_height).saturating_sub(y).max(1);
        (x, y, width, height)
    }

    /// Map a rect expressed relative to this one back into full-frame space
    pub fn map_from_local(&self, local: &NormalizedRect) -> NormalizedRect {
        NormalizedRect::new(
            self.x + local.x * self.width,
            self.y + local.y * self.height,
            local.width * self.width,
            local.height * self.height,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_pixels() {
        let r = NormalizedRect::from_pixels(160, 120, 320, 240, 640, 480);
        assert_eq!(r, NormalizedRect::new(0.25, 0.25, 0.5, 0.5));
    }

    #[test]
    fn test_clamped_drops_outside() {
        let r = NormalizedRect::new(-0.5, 0.5, 1.0, 1.0).clamped();
        assert_eq!(r, NormalizedRect::new(0.0, 0.5, 0.5, 0.5));
    }

    #[test]
    fn test_to_pixels_never_empty() {
        let r = NormalizedRect::new(0.999, 0.999, 0.0, 0.0);
        let (x, y, w, h) = r.to_pixels(100, 100);
        assert!(x < 100 && y < 100);
        assert_eq!((w, h), (1, 1));
    }

    #[test]
    fn test_map_from_local() {
        let roi = NormalizedRect::new(0.5, 0.5, 0.5, 0.5);
        let local = NormalizedRect::new(0.0, 0.0, 0.5, 1.0);
        assert_eq!(
            roi.map_from_local(&local),
            NormalizedRect::new(0.5, 0.5, 0.25, 0.5)
        );
    }
}
