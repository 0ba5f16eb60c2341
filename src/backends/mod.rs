// SPDX-License-Identifier: GPL-3.0-only

//! Capture backend abstraction
//!
//! The session never talks to hardware directly. It asks a [`CaptureBackend`]
//! for the default video device, opens a [`CaptureInput`] on it, and wires the
//! input to a detection output inside a [`pipeline::CapturePipeline`].
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               Session controller             │
//! └──────────────────────┬───────────────────────┘
//!                        │
//! ┌──────────────────────┴───────────────────────┐
//! │                Capture pipeline              │
//! │  ┌──────────────┐        ┌────────────────┐  │
//! │  │ CaptureInput │ ─────▶ │ MetadataOutput │  │
//! │  │ (V4L2/file)  │        │  (BatchSink)   │  │
//! │  └──────────────┘        └────────────────┘  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`v4l2`]: Video4Linux2 capture devices
//! - [`virtual_camera`]: still images replayed as a camera
//! - [`decoder`]: detection stage for backends that only produce frames
//! - [`torch`]: flash LED access

pub mod decoder;
pub mod frame_loop;
pub mod pipeline;
pub mod torch;
pub mod types;
pub mod v4l2;
pub mod virtual_camera;

pub use pipeline::{BatchSink, CaptureContext, CapturePipeline, MetadataOutput, PipelineTransaction};
pub use torch::{TorchDevice, TorchMode};
pub use types::*;

/// A source of capture devices
pub trait CaptureBackend: Send + Sync {
    fn backend_type(&self) -> CaptureBackendType;

    /// Enumerate devices that provide video
    fn enumerate_devices(&self) -> Vec<CameraDevice>;

    /// The device a scanner should use when the caller has no preference
    fn default_device(&self, kind: MediaKind) -> Option<CameraDevice> {
        match kind {
            MediaKind::Video => self.enumerate_devices().into_iter().next(),
        }
    }

    /// Open a device for streaming
    ///
    /// Fails with [`BackendError::DeviceBusy`] when another process holds the
    /// device exclusively.
    fn open_input(&self, device: &CameraDevice) -> BackendResult<Box<dyn CaptureInput>>;

    /// Torch attached to `device`, if the hardware has one
    fn torch(&self, device: &CameraDevice) -> Option<Box<dyn TorchDevice>> {
        let _ = device;
        None
    }
}

/// An opened device, driven by the pipeline's metadata-delivery thread
pub trait CaptureInput: Send {
    fn device(&self) -> &CameraDevice;

    /// Symbologies this input's detection stage can report
    fn available_detection_types(&self) -> Vec<DetectionType>;

    /// Stream frames and deliver detections until the context reports a stop
    ///
    /// Returning `Ok` means the stop request was honored. An `Err` while the
    /// context is still running is a runtime failure of the stream.
    fn run(&mut self, context: &CaptureContext) -> BackendResult<()>;
}
