// SPDX-License-Identifier: GPL-3.0-only

//! Virtual camera backed by image files
//!
//! Replays a fixed list of images as a camera at a steady frame rate. Useful
//! for scanning codes from screenshots and for running the full session on
//! machines without a camera.

pub mod file_source;

use super::decoder::{LumaFrame, SymbolDecoder};
use super::pipeline::CaptureContext;
use super::types::{
    BackendError, BackendResult, CameraDevice, CameraFormat, CaptureBackendType, DetectionBatch,
    DetectionType, Framerate,
};
use super::{CaptureBackend, CaptureInput};
use crate::constants::VIRTUAL_FRAME_INTERVAL;
use image::GrayImage;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Path of the single device this backend exposes
pub const VIRTUAL_DEVICE_PATH: &str = "virtual:0";

/// Backend exposing one camera that cycles through image files
#[derive(Debug, Clone)]
pub struct VirtualBackend {
    files: Vec<PathBuf>,
    frame_interval: Duration,
    max_dimension: Option<u32>,
}

impl VirtualBackend {
    /// Files and directories of images to replay
    pub fn new(paths: &[PathBuf]) -> Self {
        Self {
            files: file_source::collect_image_files(paths),
            frame_interval: VIRTUAL_FRAME_INTERVAL,
            max_dimension: None,
        }
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_max_dimension(mut self, max_dimension: Option<u32>) -> Self {
        self.max_dimension = max_dimension;
        self
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

impl CaptureBackend for VirtualBackend {
    fn backend_type(&self) -> CaptureBackendType {
        CaptureBackendType::Virtual
    }

    fn enumerate_devices(&self) -> Vec<CameraDevice> {
        if self.files.is_empty() {
            return Vec::new();
        }

        let mut device = CameraDevice::new("Virtual camera", VIRTUAL_DEVICE_PATH);
        // Format is the first image's, when it can be read without decoding
        device.format = image::image_dimensions(&self.files[0])
            .ok()
            .map(|(width, height)| CameraFormat {
                width,
                height,
                framerate: Some(Framerate::new(
                    1000,
                    self.frame_interval.as_millis().max(1) as u32,
                )),
                pixel_format: "GREY".into(),
            });
        vec![device]
    }

    fn open_input(&self, device: &CameraDevice) -> BackendResult<Box<dyn CaptureInput>> {
        if device.path != VIRTUAL_DEVICE_PATH || self.files.is_empty() {
            return Err(BackendError::DeviceNotFound(device.path.clone()));
        }

        let frames = self
            .files
            .iter()
            .map(|path| file_source::load_luma_image(path))
            .collect::<BackendResult<Vec<GrayImage>>>()?;

        info!(frames = frames.len(), "Opened virtual camera");
        let decoder = match self.max_dimension {
            Some(max) => SymbolDecoder::with_max_dimension(max),
            None => SymbolDecoder::new(),
        };
        Ok(Box::new(VirtualInput {
            device: device.clone(),
            frames,
            interval: self.frame_interval,
            decoder,
        }))
    }
}

/// Streaming side of the virtual camera
pub struct VirtualInput {
    device: CameraDevice,
    frames: Vec<GrayImage>,
    interval: Duration,
    decoder: SymbolDecoder,
}

impl CaptureInput for VirtualInput {
    fn device(&self) -> &CameraDevice {
        &self.device
    }

    fn available_detection_types(&self) -> Vec<DetectionType> {
        SymbolDecoder::supported_types()
    }

    fn run(&mut self, context: &CaptureContext) -> BackendResult<()> {
        let mut sequence: u64 = 0;

        for image in self.frames.iter().cycle() {
            if !context.is_running() {
                break;
            }
            sequence += 1;

            let types = context.detection_types();
            if !types.is_empty() {
                let frame = LumaFrame::from_image(image);
                let records = self
                    .decoder
                    .decode(&frame, &context.region_of_interest(), &types);
                if !records.is_empty() {
                    debug!(sequence, count = records.len(), "Virtual frame detections");
                }
                context.deliver(DetectionBatch::new(sequence, records));
            }

            if !context.stop_signal().sleep(self.interval) {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_files_means_no_device() {
        let backend = VirtualBackend::new(&[]);
        assert!(backend.enumerate_devices().is_empty());
        assert!(
            backend
                .open_input(&CameraDevice::new("x", VIRTUAL_DEVICE_PATH))
                .is_err()
        );
    }

    #[test]
    fn test_device_format_from_first_image() {
        let path = std::env::temp_dir().join(format!("scanner-{}.png", uuid::Uuid::new_v4()));
        GrayImage::new(32, 24).save(&path).unwrap();

        let backend = VirtualBackend::new(std::slice::from_ref(&path));
        let devices = backend.enumerate_devices();
        assert_eq!(devices.len(), 1);
        let format = devices[0].format.as_ref().unwrap();
        assert_eq!((format.width, format.height), (32, 24));

        let input = backend.open_input(&devices[0]).unwrap();
        assert_eq!(input.available_detection_types(), vec![DetectionType::Qr]);

        let _ = std::fs::remove_file(path);
    }
}
