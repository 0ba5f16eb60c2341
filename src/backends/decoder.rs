// SPDX-License-Identifier: GPL-3.0-only

//! Symbol detection for backends without a hardware metadata stream
//!
//! The session itself never decodes payloads. Backends that only deliver raw
//! frames use this decoder (built on `rqrr`) as their external detection stage:
//! the luma plane is cropped to the region of interest, downscaled for
//! real-time processing, and each decoded QR code is reported with its bounds
//! normalized to the full frame.

use super::types::{DetectionRecord, DetectionType};
use crate::constants::decoder::{MAX_DIMENSION, MIN_DIMENSION};
use crate::geometry::NormalizedRect;
use tracing::{debug, trace};

/// Borrowed 8-bit luma plane
#[derive(Debug, Clone, Copy)]
pub struct LumaFrame<'a> {
    pub width: u32,
    pub height: u32,
    /// Bytes per row, at least `width`
    pub stride: usize,
    pub data: &'a [u8],
}

impl<'a> LumaFrame<'a> {
    pub fn new(width: u32, height: u32, stride: usize, data: &'a [u8]) -> Self {
        Self {
            width,
            height,
            stride,
            data,
        }
    }

    pub fn from_image(image: &'a image::GrayImage) -> Self {
        Self::new(
            image.width(),
            image.height(),
            image.width() as usize,
            image.as_raw(),
        )
    }

    fn pixel(&self, x: usize, y: usize) -> f32 {
        self.data.get(y * self.stride + x).copied().unwrap_or(0) as f32
    }
}

/// QR symbol decoder
///
/// Optimized for real-time processing with frame downscaling.
#[derive(Debug, Clone)]
pub struct SymbolDecoder {
    /// Maximum dimension for processing (regions are downscaled to this)
    max_dimension: u32,
}

impl Default for SymbolDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolDecoder {
    pub fn new() -> Self {
        Self {
            max_dimension: MAX_DIMENSION,
        }
    }

    pub fn with_max_dimension(max_dimension: u32) -> Self {
        Self {
            max_dimension: max_dimension.max(MIN_DIMENSION),
        }
    }

    /// Symbologies this decoder can find
    pub fn supported_types() -> Vec<DetectionType> {
        vec![DetectionType::Qr]
    }

    /// Detect and decode symbols inside `region` of `frame`
    pub fn decode(
        &self,
        frame: &LumaFrame<'_>,
        region: &NormalizedRect,
        types: &[DetectionType],
    ) -> Vec<DetectionRecord> {
        if !types.contains(&DetectionType::Qr) || frame.width == 0 || frame.height == 0 {
            return Vec::new();
        }
        let region = region.clamped();
        if region.is_empty() {
            return Vec::new();
        }

        let start = std::time::Instant::now();
        let (crop_x, crop_y, crop_w, crop_h) = region.to_pixels(frame.width, frame.height);

        let scale = (crop_w as f32 / self.max_dimension as f32)
            .max(crop_h as f32 / self.max_dimension as f32)
            .max(1.0);
        let proc_w = ((crop_w as f32 / scale) as usize).max(1);
        let proc_h = ((crop_h as f32 / scale) as usize).max(1);

        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(proc_w, proc_h, |x, y| {
            sample_bilinear(
                frame,
                crop_x as f32 + x as f32 * scale,
                crop_y as f32 + y as f32 * scale,
            )
        });
        let grids = prepared.detect_grids();

        trace!(
            proc_w,
            proc_h,
            scale,
            grids = grids.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "Symbol scan complete"
        );

        let mut records = Vec::with_capacity(grids.len());
        for grid in grids {
            let content = match grid.decode() {
                Ok((_meta, content)) => content,
                Err(e) => {
                    debug!(error = ?e, "Failed to decode QR code");
                    continue;
                }
            };

            let corners = grid.bounds.map(|p| (p.x as f32, p.y as f32));
            let bounds = corners_to_frame_rect(
                &corners,
                scale,
                (crop_x, crop_y),
                (frame.width, frame.height),
            );

            debug!(
                content = %content,
                x = bounds.x,
                y = bounds.y,
                width = bounds.width,
                height = bounds.height,
                "Detected QR code"
            );
            records.push(DetectionRecord::new(
                DetectionType::Qr,
                Some(content),
                bounds,
            ));
        }

        records
    }
}

/// Bilinear sample of the luma plane at a fractional position
fn sample_bilinear(frame: &LumaFrame<'_>, src_x: f32, src_y: f32) -> u8 {
    let max_x = frame.width.saturating_sub(1) as usize;
    let max_y = frame.height.saturating_sub(1) as usize;

    let x0 = (src_x as usize).min(max_x);
    let y0 = (src_y as usize).min(max_y);
    let x1 = (x0 + 1).min(max_x);
    let y1 = (y0 + 1).min(max_y);
    let x_frac = (src_x - x0 as f32).clamp(0.0, 1.0);
    let y_frac = (src_y - y0 as f32).clamp(0.0, 1.0);

    let value = frame.pixel(x0, y0) * (1.0 - x_frac) * (1.0 - y_frac)
        + frame.pixel(x1, y0) * x_frac * (1.0 - y_frac)
        + frame.pixel(x0, y1) * (1.0 - x_frac) * y_frac
        + frame.pixel(x1, y1) * x_frac * y_frac;
    value.round().clamp(0.0, 255.0) as u8
}

/// Bounding box of symbol corners found in the processed crop, in
/// normalized full-frame coordinates
fn corners_to_frame_rect(
    corners: &[(f32, f32); 4],
    scale: f32,
    crop_origin: (u32, u32),
    frame_size: (u32, u32),
) -> NormalizedRect {
    let (min_x, max_x, min_y, max_y) = corners.iter().fold(
        (f32::MAX, f32::MIN, f32::MAX, f32::MIN),
        |(min_x, max_x, min_y, max_y), &(x, y)| {
            (min_x.min(x), max_x.max(x), min_y.min(y), max_y.max(y))
        },
    );

    let x = crop_origin.0 as f32 + min_x.max(0.0) * scale;
    let y = crop_origin.1 as f32 + min_y.max(0.0) * scale;
    let width = (max_x - min_x).max(0.0) * scale;
    let height = (max_y - min_y).max(0.0) * scale;

    NormalizedRect::new(
        x / frame_size.0 as f32,
        y / frame_size.1 as f32,
        width / frame_size.0 as f32,
        height / frame_size.1 as f32,
    )
    .clamped()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_frame_has_no_symbols() {
        let data = vec![255u8; 64 * 48];
        let frame = LumaFrame::new(64, 48, 64, &data);
        let records = SymbolDecoder::new().decode(&frame, &NormalizedRect::FULL, &[DetectionType::Qr]);
        assert!(records.is_empty());
    }

    #[test]
    fn test_unrequested_types_skip_scan() {
        let data = vec![0u8; 16];
        let frame = LumaFrame::new(4, 4, 4, &data);
        let records = SymbolDecoder::new().decode(&frame, &NormalizedRect::FULL, &[DetectionType::Ean13]);
        assert!(records.is_empty());
    }

    #[test]
    fn test_sample_bilinear_respects_stride() {
        // 2x2 luma with two bytes of row padding
        let data = vec![0, 100, 9, 9, 200, 50, 9, 9];
        let frame = LumaFrame::new(2, 2, 4, &data);
        assert_eq!(sample_bilinear(&frame, 0.0, 0.0), 0);
        assert_eq!(sample_bilinear(&frame, 1.0, 1.0), 50);
        assert_eq!(sample_bilinear(&frame, 0.5, 0.0), 50);
    }

    #[test]
    fn test_corners_map_back_to_frame() {
        // Crop starts at (100, 50) and was downscaled by 2
        let corners = [(10.0, 10.0), (60.0, 10.0), (60.0, 60.0), (10.0, 60.0)];
        let rect = corners_to_frame_rect(&corners, 2.0, (100, 50), (400, 400));
        let expected = [0.3, 0.175, 0.25, 0.25];
        let actual = [rect.x, rect.y, rect.width, rect.height];
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-5, "{:?} != {:?}", actual, expected);
        }
    }

    #[test]
    fn test_max_dimension_floor() {
        let decoder = SymbolDecoder::with_max_dimension(1);
        assert_eq!(decoder.max_dimension, MIN_DIMENSION);
    }
}
