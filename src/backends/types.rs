// SPDX-License-Identifier: GPL-3.0-only
// Shared types for capture backend abstraction

//! Shared types for capture backends

use crate::geometry::{NormalizedRect, Size};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Instant;

/// Capture backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CaptureBackendType {
    /// Video4Linux2 capture devices
    #[default]
    V4l2,
    /// Still images from disk, replayed as a camera
    Virtual,
}

impl std::fmt::Display for CaptureBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureBackendType::V4l2 => write!(f, "V4L2"),
            CaptureBackendType::Virtual => write!(f, "virtual"),
        }
    }
}

/// Media kind a device must provide
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
}

/// Device information from V4L2 capability
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    /// Name of the device (V4L2 card)
    pub card: String,
    /// Driver name (V4L2 driver)
    pub driver: String,
    /// Device path (e.g., /dev/video0)
    pub path: String,
    /// Real device path (resolved symlinks)
    pub real_path: String,
}

/// Sensor rotation in degrees (clockwise)
///
/// Camera sensors may be physically mounted at various angles relative to the
/// device. This is common on phones where sensors are rotated 90° or 270°
/// relative to the natural display orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SensorRotation {
    /// No rotation (sensor is oriented correctly)
    #[default]
    None,
    /// 90 degrees clockwise
    Rotate90,
    /// 180 degrees (upside down)
    Rotate180,
    /// 270 degrees clockwise (90 degrees counter-clockwise)
    Rotate270,
}

impl SensorRotation {
    /// Create rotation from an integer degree value (normalised to 0-360).
    pub fn from_degrees(degrees: i32) -> Self {
        match degrees.rem_euclid(360) {
            90 => SensorRotation::Rotate90,
            180 => SensorRotation::Rotate180,
            270 => SensorRotation::Rotate270,
            _ => SensorRotation::None,
        }
    }

    /// Get the rotation in degrees
    pub fn degrees(&self) -> u32 {
        self.quarter_turns() * 90
    }

    /// Number of clockwise quarter turns
    pub fn quarter_turns(&self) -> u32 {
        match self {
            SensorRotation::None => 0,
            SensorRotation::Rotate90 => 1,
            SensorRotation::Rotate180 => 2,
            SensorRotation::Rotate270 => 3,
        }
    }
}

impl std::fmt::Display for SensorRotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// Framerate as a fraction (numerator/denominator)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Framerate {
    pub num: u32,
    pub denom: u32,
}

impl Framerate {
    pub fn new(num: u32, denom: u32) -> Self {
        Self {
            num,
            denom: if denom == 0 { 1 } else { denom },
        }
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.denom as f64
    }
}

impl std::fmt::Display for Framerate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show decimal for non-integer framerates (NTSC)
        if self.denom != 1 {
            write!(f, "{:.2}", self.as_f64())
        } else {
            write!(f, "{}", self.num)
        }
    }
}

/// Negotiated capture format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraFormat {
    pub width: u32,
    pub height: u32,
    pub framerate: Option<Framerate>,
    /// FourCC code (e.g., "MJPG", "YUYV", "GREY")
    pub pixel_format: String,
}

impl CameraFormat {
    /// Sensor frame size used for region mapping
    pub fn size(&self) -> Size {
        Size::new(self.width as f32, self.height as f32)
    }
}

impl std::fmt::Display for CameraFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.framerate {
            Some(fps) => write!(
                f,
                "{}x{} @ {}fps {}",
                self.width, self.height, fps, self.pixel_format
            ),
            None => write!(f, "{}x{} {}", self.width, self.height, self.pixel_format),
        }
    }
}

/// A physical or virtual capture device
#[derive(Debug, Clone)]
pub struct CameraDevice {
    pub name: String,
    /// Backend-specific path (`/dev/video0`, `virtual:0`)
    pub path: String,
    pub device_info: Option<DeviceInfo>,
    /// Sensor rotation relative to the natural display orientation
    pub rotation: SensorRotation,
    /// Format the device will stream with, when known before streaming
    pub format: Option<CameraFormat>,
}

impl CameraDevice {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            device_info: None,
            rotation: SensorRotation::None,
            format: None,
        }
    }

    /// Sensor frame size, if the format is known
    pub fn sensor_size(&self) -> Option<Size> {
        self.format.as_ref().map(CameraFormat::size)
    }
}

/// Machine-readable symbologies the detection stage can be asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionType {
    Qr,
    MicroQr,
    Aztec,
    DataMatrix,
    Pdf417,
    Code128,
    Code39,
    Ean8,
    Ean13,
    UpcE,
}

impl DetectionType {
    pub const ALL: [DetectionType; 10] = [
        DetectionType::Qr,
        DetectionType::MicroQr,
        DetectionType::Aztec,
        DetectionType::DataMatrix,
        DetectionType::Pdf417,
        DetectionType::Code128,
        DetectionType::Code39,
        DetectionType::Ean8,
        DetectionType::Ean13,
        DetectionType::UpcE,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionType::Qr => "qr",
            DetectionType::MicroQr => "micro_qr",
            DetectionType::Aztec => "aztec",
            DetectionType::DataMatrix => "data_matrix",
            DetectionType::Pdf417 => "pdf417",
            DetectionType::Code128 => "code128",
            DetectionType::Code39 => "code39",
            DetectionType::Ean8 => "ean8",
            DetectionType::Ean13 => "ean13",
            DetectionType::UpcE => "upc_e",
        }
    }
}

impl std::fmt::Display for DetectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        DetectionType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| format!("unknown detection type '{}'", s))
    }
}

/// One detected symbol
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionRecord {
    pub symbology: DetectionType,
    /// Decoded payload when the detection stage also decodes
    pub payload: Option<String>,
    /// Bounding box in normalized full-frame coordinates
    pub bounds: NormalizedRect,
}

impl DetectionRecord {
    pub fn new(symbology: DetectionType, payload: Option<String>, bounds: NormalizedRect) -> Self {
        Self {
            symbology,
            payload,
            bounds,
        }
    }
}

/// Everything one capture cycle detected, in detection order
#[derive(Debug, Clone)]
pub struct DetectionBatch {
    /// Monotonic capture cycle number from the producing input
    pub sequence: u64,
    pub captured_at: Instant,
    pub records: Vec<DetectionRecord>,
}

impl DetectionBatch {
    pub fn new(sequence: u64, records: Vec<DetectionRecord>) -> Self {
        Self {
            sequence,
            captured_at: Instant::now(),
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DetectionRecord> {
        self.records.iter()
    }
}

/// Result type alias for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Error types for backend operations
#[derive(Debug, Clone)]
pub enum BackendError {
    /// Backend is not available on this system
    NotAvailable(String),
    /// Capture device not found
    DeviceNotFound(String),
    /// Device is in use by another process
    DeviceBusy(String),
    /// Device node exists but may not be opened
    PermissionDenied(String),
    /// Format not supported
    FormatNotSupported(String),
    /// Streaming stopped unexpectedly (device unplugged, driver error)
    StreamFailed(String),
    /// General I/O error
    IoError(String),
    /// Other errors
    Other(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::NotAvailable(msg) => write!(f, "Backend not available: {}", msg),
            BackendError::DeviceNotFound(msg) => write!(f, "Device not found: {}", msg),
            BackendError::DeviceBusy(msg) => write!(f, "Device busy: {}", msg),
            BackendError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            BackendError::FormatNotSupported(msg) => write!(f, "Format not supported: {}", msg),
            BackendError::StreamFailed(msg) => write!(f, "Stream failed: {}", msg),
            BackendError::IoError(msg) => write!(f, "I/O error: {}", msg),
            BackendError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        match err.raw_os_error() {
            Some(libc::EBUSY) => BackendError::DeviceBusy(err.to_string()),
            Some(libc::EACCES) | Some(libc::EPERM) => BackendError::PermissionDenied(err.to_string()),
            Some(libc::ENOENT) | Some(libc::ENODEV) | Some(libc::ENXIO) => {
                BackendError::DeviceNotFound(err.to_string())
            }
            _ => BackendError::IoError(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_type_parse() {
        assert_eq!("QR".parse::<DetectionType>(), Ok(DetectionType::Qr));
        assert_eq!("data-matrix".parse::<DetectionType>(), Ok(DetectionType::DataMatrix));
        assert!("hologram".parse::<DetectionType>().is_err());
    }

    #[test]
    fn test_sensor_rotation_from_degrees() {
        assert_eq!(SensorRotation::from_degrees(-90), SensorRotation::Rotate270);
        assert_eq!(SensorRotation::from_degrees(450), SensorRotation::Rotate90);
        assert_eq!(SensorRotation::from_degrees(45), SensorRotation::None);
    }

    #[test]
    fn test_io_error_mapping() {
        let busy = std::io::Error::from_raw_os_error(libc::EBUSY);
        assert!(matches!(BackendError::from(busy), BackendError::DeviceBusy(_)));
        let denied = std::io::Error::from_raw_os_error(libc::EACCES);
        assert!(matches!(BackendError::from(denied), BackendError::PermissionDenied(_)));
    }
}
