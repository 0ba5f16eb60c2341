// SPDX-License-Identifier: GPL-3.0-only

//! Video4Linux2 capture backend
//!
//! Devices are enumerated through `v4l`, keeping only nodes with the
//! `VIDEO_CAPTURE` capability (metadata and output nodes share the
//! `/dev/video*` namespace). Detection runs on the CPU through
//! [`SymbolDecoder`](super::decoder::SymbolDecoder).

mod capture;

pub use capture::V4l2Input;

use super::torch::{SysfsTorch, TorchDevice};
use super::types::{
    BackendResult, CameraDevice, CameraFormat, CaptureBackendType, DeviceInfo, Framerate,
    SensorRotation,
};
use super::{CaptureBackend, CaptureInput, MediaKind};
use std::fs::File;
use std::os::unix::io::AsRawFd;
use tracing::{debug, info, warn};
use v4l::capability::Flags;
use v4l::prelude::*;
use v4l::video::Capture;

const V4L2_CTRL_CLASS_CAMERA: u32 = 0x009a_0000;
const V4L2_CID_CAMERA_SENSOR_ROTATION: u32 = (V4L2_CTRL_CLASS_CAMERA | 0x900) + 34;

/// Get control value (v4l2_control: 8 bytes)
const VIDIOC_G_CTRL: libc::c_ulong = 0xC008561B;

#[repr(C)]
struct V4l2Control {
    id: u32,
    value: i32,
}

/// V4L2 backend
#[derive(Debug, Clone, Default)]
pub struct V4l2Backend {
    /// Device path tried before enumeration order
    preferred_device: Option<String>,
    /// Longest side of the region handed to the decoder
    max_dimension: Option<u32>,
}

impl V4l2Backend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_preferred_device(mut self, path: Option<String>) -> Self {
        self.preferred_device = path;
        self
    }

    pub fn with_max_dimension(mut self, max_dimension: Option<u32>) -> Self {
        self.max_dimension = max_dimension;
        self
    }
}

impl CaptureBackend for V4l2Backend {
    fn backend_type(&self) -> CaptureBackendType {
        CaptureBackendType::V4l2
    }

    fn enumerate_devices(&self) -> Vec<CameraDevice> {
        let mut nodes = v4l::context::enum_devices();
        nodes.sort_by_key(|node| node.index());

        let devices: Vec<CameraDevice> = nodes
            .iter()
            .filter_map(|node| probe_device(&node.path().to_string_lossy()))
            .collect();

        info!(count = devices.len(), "Enumerated V4L2 capture devices");
        devices
    }

    fn default_device(&self, kind: MediaKind) -> Option<CameraDevice> {
        let MediaKind::Video = kind;
        let devices = self.enumerate_devices();

        if let Some(preferred) = &self.preferred_device {
            if let Some(device) = devices.iter().find(|d| &d.path == preferred) {
                return Some(device.clone());
            }
            warn!(path = %preferred, "Preferred device not found, using first device");
        }
        devices.into_iter().next()
    }

    fn open_input(&self, device: &CameraDevice) -> BackendResult<Box<dyn CaptureInput>> {
        let input = V4l2Input::open(device.clone(), self.max_dimension)?;
        Ok(Box::new(input))
    }

    fn torch(&self, device: &CameraDevice) -> Option<Box<dyn TorchDevice>> {
        let torch = SysfsTorch::discover().into_iter().next()?;
        debug!(device = %device.name, torch = %torch.name(), "Using sysfs torch");
        Some(Box::new(torch))
    }
}

/// Describe a node if it is a video capture device
fn probe_device(path: &str) -> Option<CameraDevice> {
    let dev = match Device::with_path(path) {
        Ok(dev) => dev,
        Err(e) => {
            debug!(path, error = %e, "Cannot open video node");
            return None;
        }
    };
    let caps = dev.query_caps().ok()?;
    if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
        debug!(path, card = %caps.card, "Skipping non-capture node");
        return None;
    }

    let format = dev.format().ok().map(|fmt| {
        let framerate = dev.params().ok().and_then(|params| {
            // Interval is seconds per frame
            let interval = params.interval;
            (interval.numerator > 0).then(|| Framerate::new(interval.denominator, interval.numerator))
        });
        CameraFormat {
            width: fmt.width,
            height: fmt.height,
            framerate,
            pixel_format: fmt.fourcc.to_string(),
        }
    });

    let real_path = std::fs::canonicalize(path)
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| path.to_string());

    let rotation = sensor_rotation(path);
    debug!(
        path,
        card = %caps.card,
        driver = %caps.driver,
        %rotation,
        format = ?format,
        "Found video capture device"
    );

    Some(CameraDevice {
        name: caps.card.clone(),
        path: path.to_string(),
        device_info: Some(DeviceInfo {
            card: caps.card,
            driver: caps.driver,
            path: path.to_string(),
            real_path,
        }),
        rotation,
        format,
    })
}

/// Mounting rotation reported by the sensor driver, if any
fn sensor_rotation(path: &str) -> SensorRotation {
    let Ok(file) = File::open(path) else {
        return SensorRotation::None;
    };
    let mut ctrl = V4l2Control {
        id: V4L2_CID_CAMERA_SENSOR_ROTATION,
        value: 0,
    };
    let result = unsafe { libc::ioctl(file.as_raw_fd(), VIDIOC_G_CTRL as _, &mut ctrl as *mut V4l2Control) };
    if result < 0 {
        return SensorRotation::None;
    }
    SensorRotation::from_degrees(ctrl.value)
}
