// SPDX-License-Identifier: GPL-3.0-only

//! Scanning session: lifecycle, region mapping, torch and detection hand-off

mod binding;
mod controller;
mod dispatcher;
mod region;
mod state;
mod torch;

pub use binding::{CaptureDeviceBinding, PipelineEvent, PipelineEventHandler};
pub use controller::{ScannerDelegate, SessionController, SessionOptions};
pub use dispatcher::{BatchConsumer, BatchOutcome, DetectionDispatcher};
pub use region::{DeviceOrientation, DisplayOrientation, RegionMapper, VideoGravity, interest_rect};
pub use state::{FailureReason, SessionState};
pub use torch::{ObserverId, TorchController, TorchObserver, TorchState};
