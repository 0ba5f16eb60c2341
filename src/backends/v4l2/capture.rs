// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 streaming input and luma extraction

use crate::backends::decoder::{LumaFrame, SymbolDecoder};
use crate::backends::pipeline::CaptureContext;
use crate::backends::types::{
    BackendError, BackendResult, CameraDevice, CameraFormat, DetectionBatch, DetectionType,
};
use crate::backends::CaptureInput;
use crate::constants::{V4L2_BUFFER_COUNT, V4L2_DEQUEUE_TIMEOUT};
use std::borrow::Cow;
use std::io::ErrorKind;
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

/// Consecutive dequeue failures tolerated before the stream is declared dead
const MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// Layout of one captured buffer
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameLayout {
    pub fourcc: [u8; 4],
    pub width: u32,
    pub height: u32,
    /// Bytes per line of the first plane
    pub stride: usize,
}

impl FrameLayout {
    /// Layout of a negotiated format; a zero stride falls back to the width
    pub(crate) fn from_format(
        fourcc: [u8; 4],
        width: u32,
        height: u32,
        stride: u32,
    ) -> BackendResult<Self> {
        if width == 0 || height == 0 {
            return Err(BackendError::FormatNotSupported(format!(
                "{} {}x{}",
                String::from_utf8_lossy(&fourcc),
                width,
                height
            )));
        }
        Ok(Self {
            fourcc,
            width,
            height,
            stride: if stride > 0 { stride as usize } else { width as usize },
        })
    }
}

/// An opened V4L2 capture device
pub struct V4l2Input {
    device: CameraDevice,
    dev: Device,
    decoder: SymbolDecoder,
}

impl V4l2Input {
    /// Open the device and make sure no other process is streaming from it
    pub fn open(mut device: CameraDevice, max_dimension: Option<u32>) -> BackendResult<Self> {
        let dev = Device::with_path(&device.path).map_err(BackendError::from)?;

        // Buffer allocation fails with EBUSY while another process streams
        match MmapStream::with_buffers(&dev, Type::VideoCapture, 1) {
            Ok(probe) => drop(probe),
            Err(e) => {
                warn!(path = %device.path, error = %e, "Device exclusivity probe failed");
                return Err(BackendError::from(e));
            }
        }

        if let Ok(fmt) = dev.format() {
            device.format = Some(CameraFormat {
                width: fmt.width,
                height: fmt.height,
                framerate: device.format.as_ref().and_then(|f| f.framerate),
                pixel_format: fmt.fourcc.to_string(),
            });
        }

        info!(path = %device.path, format = ?device.format, "Opened V4L2 input");
        let decoder = match max_dimension {
            Some(max) => SymbolDecoder::with_max_dimension(max),
            None => SymbolDecoder::new(),
        };
        Ok(Self {
            device,
            dev,
            decoder,
        })
    }

    fn layout(&self) -> BackendResult<FrameLayout> {
        let fmt = self.dev.format().map_err(BackendError::from)?;
        FrameLayout::from_format(fmt.fourcc.repr, fmt.width, fmt.height, fmt.stride)
    }
}

impl CaptureInput for V4l2Input {
    fn device(&self) -> &CameraDevice {
        &self.device
    }

    fn available_detection_types(&self) -> Vec<DetectionType> {
        SymbolDecoder::supported_types()
    }

    fn run(&mut self, context: &CaptureContext) -> BackendResult<()> {
        let layout = self.layout()?;
        let mut stream = MmapStream::with_buffers(&self.dev, Type::VideoCapture, V4L2_BUFFER_COUNT)
            .map_err(BackendError::from)?;
        stream.set_timeout(V4L2_DEQUEUE_TIMEOUT);

        info!(
            path = %self.device.path,
            width = layout.width,
            height = layout.height,
            fourcc = %String::from_utf8_lossy(&layout.fourcc),
            "V4L2 capture stream started"
        );

        let mut sequence: u64 = 0;
        let mut consecutive_errors = 0;

        while context.is_running() {
            let buf = match stream.next() {
                Ok((buf, _meta)) => {
                    consecutive_errors = 0;
                    buf
                }
                Err(e) if e.kind() == ErrorKind::TimedOut => continue,
                Err(e) => {
                    consecutive_errors += 1;
                    warn!(error = %e, consecutive_errors, "Failed to dequeue frame");
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        return Err(BackendError::StreamFailed(e.to_string()));
                    }
                    std::thread::sleep(std::time::Duration::from_millis(10));
                    continue;
                }
            };
            sequence += 1;

            let types = context.detection_types();
            if types.is_empty() {
                continue;
            }

            let (plane, width, height, stride) = match luma_plane(&layout, buf) {
                Ok(plane) => plane,
                Err(BackendError::FormatNotSupported(fourcc)) => {
                    return Err(BackendError::FormatNotSupported(fourcc));
                }
                Err(e) => {
                    debug!(error = %e, "Skipping undecodable frame");
                    continue;
                }
            };

            let frame = LumaFrame::new(width, height, stride, &plane);
            let records = self
                .decoder
                .decode(&frame, &context.region_of_interest(), &types);
            context.deliver(DetectionBatch::new(sequence, records));
        }

        info!(path = %self.device.path, "V4L2 capture loop ended");
        Ok(())
    }
}

/// Extract the 8-bit luma plane from a captured buffer
///
/// Returns the plane with its width, height and stride. Planar and grey
/// formats are borrowed as-is; packed and compressed formats are converted.
pub(crate) fn luma_plane<'a>(
    layout: &FrameLayout,
    data: &'a [u8],
) -> BackendResult<(Cow<'a, [u8]>, u32, u32, usize)> {
    match &layout.fourcc {
        // Y plane comes first in all of these
        b"GREY" | b"NV12" | b"NV21" | b"YU12" | b"YV12" => {
            let needed = layout.stride * layout.height as usize;
            if data.len() < needed {
                return Err(BackendError::Other(format!(
                    "short buffer: {} < {}",
                    data.len(),
                    needed
                )));
            }
            Ok((
                Cow::Borrowed(data),
                layout.width,
                layout.height,
                layout.stride,
            ))
        }
        b"YUYV" | b"UYVY" => {
            let offset = usize::from(&layout.fourcc == b"UYVY");
            let width = layout.width as usize;
            let mut luma = Vec::with_capacity(width * layout.height as usize);
            for row in data.chunks(layout.stride).take(layout.height as usize) {
                luma.extend(row.iter().skip(offset).step_by(2).take(width));
            }
            if luma.len() < width * layout.height as usize {
                return Err(BackendError::Other("short packed buffer".into()));
            }
            Ok((Cow::Owned(luma), layout.width, layout.height, width))
        }
        b"MJPG" | b"JPEG" => {
            let image = image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
                .map_err(|e| BackendError::Other(format!("JPEG decode failed: {}", e)))?
                .to_luma8();
            let (width, height) = image.dimensions();
            Ok((Cow::Owned(image.into_raw()), width, height, width as usize))
        }
        other => Err(BackendError::FormatNotSupported(
            String::from_utf8_lossy(other).into_owned(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(fourcc: &[u8; 4], width: u32, height: u32, stride: usize) -> FrameLayout {
        FrameLayout {
            fourcc: *fourcc,
            width,
            height,
            stride,
        }
    }

    #[test]
    fn test_yuyv_takes_every_other_byte() {
        // Y0 U Y1 V per pixel pair, 2x2
        let data = [10, 128, 20, 128, 30, 128, 40, 128];
        let (plane, w, h, stride) = luma_plane(&layout(b"YUYV", 2, 2, 4), &data).unwrap();
        assert_eq!((w, h, stride), (2, 2, 2));
        assert_eq!(plane.as_ref(), &[10, 20, 30, 40]);
    }

    #[test]
    fn test_uyvy_offsets_luma() {
        let data = [128, 10, 128, 20];
        let (plane, ..) = luma_plane(&layout(b"UYVY", 2, 1, 4), &data).unwrap();
        assert_eq!(plane.as_ref(), &[10, 20]);
    }

    #[test]
    fn test_grey_is_borrowed_with_stride() {
        let data = [1, 2, 0, 0, 3, 4, 0, 0];
        let (plane, _, _, stride) = luma_plane(&layout(b"GREY", 2, 2, 4), &data).unwrap();
        assert!(matches!(plane, Cow::Borrowed(_)));
        assert_eq!(stride, 4);
    }

    #[test]
    fn test_short_buffer_is_rejected() {
        let data = [0u8; 3];
        assert!(luma_plane(&layout(b"GREY", 2, 2, 2), &data).is_err());
    }

    #[test]
    fn test_zero_sized_format_is_rejected() {
        let result = FrameLayout::from_format(*b"YUYV", 0, 480, 0);
        assert!(matches!(result, Err(BackendError::FormatNotSupported(_))));
        let result = FrameLayout::from_format(*b"GREY", 640, 0, 640);
        assert!(matches!(result, Err(BackendError::FormatNotSupported(_))));
    }

    #[test]
    fn test_missing_stride_falls_back_to_width() {
        let layout = FrameLayout::from_format(*b"GREY", 640, 480, 0).unwrap();
        assert_eq!(layout.stride, 640);
    }

    #[test]
    fn test_unknown_format_is_unsupported() {
        let result = luma_plane(&layout(b"RGGB", 2, 2, 2), &[0; 4]);
        assert!(matches!(result, Err(BackendError::FormatNotSupported(f)) if f == "RGGB"));
    }
}
