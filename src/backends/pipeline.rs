// SPDX-License-Identifier: GPL-3.0-only

//! Capture pipeline: one input stage, one detection output stage
//!
//! A pipeline only exists once both stages were added in a single
//! [`PipelineTransaction`], so a half-built pipeline (input without output or
//! the reverse) is never observable. Starting the pipeline spawns the
//! metadata-delivery thread, which runs the input's capture loop and hands
//! every non-empty batch to the output's [`BatchSink`].

use super::frame_loop::{CaptureLoopController, StopSignal};
use super::types::{BackendError, BackendResult, CameraDevice, DetectionBatch, DetectionType};
use super::CaptureInput;
use crate::constants::threads;
use crate::geometry::NormalizedRect;
use crate::queue::panic_message;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, error, info, warn};

/// Receiver of detection batches on the metadata-delivery thread
///
/// Implementations must not block: they run at the device frame rate.
pub trait BatchSink: Send + Sync {
    fn on_batch(&self, batch: DetectionBatch);
}

/// Callback for failures of a running pipeline
pub type PipelineErrorHandler = Arc<dyn Fn(BackendError) + Send + Sync>;

#[derive(Debug, Clone)]
struct ScanSettings {
    region: NormalizedRect,
    requested: Vec<DetectionType>,
    active: Vec<DetectionType>,
    enabled: bool,
}

/// Detection output stage
///
/// Holds what the capture loop should scan for and where it delivers.
/// Settings are last-write-wins and read by the capture loop once per frame.
#[derive(Clone)]
pub struct MetadataOutput {
    settings: Arc<RwLock<ScanSettings>>,
    available: Arc<RwLock<Vec<DetectionType>>>,
    sink: Arc<dyn BatchSink>,
}

impl MetadataOutput {
    pub fn new(sink: Arc<dyn BatchSink>) -> Self {
        Self {
            settings: Arc::new(RwLock::new(ScanSettings {
                region: NormalizedRect::FULL,
                requested: Vec::new(),
                active: Vec::new(),
                enabled: true,
            })),
            available: Arc::new(RwLock::new(Vec::new())),
            sink,
        }
    }

    fn attach(&self, available: Vec<DetectionType>) {
        *self.available.write().unwrap_or_else(PoisonError::into_inner) = available;
        let requested = self.read().requested.clone();
        self.set_detection_types(&requested);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ScanSettings> {
        self.settings.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ScanSettings> {
        self.settings.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_region_of_interest(&self, region: NormalizedRect) {
        self.write().region = region.clamped();
    }

    pub fn region_of_interest(&self) -> NormalizedRect {
        self.read().region
    }

    /// Request detection types, keeping only those the input can detect
    ///
    /// Returns the types that are now active. Before an input is attached
    /// the request is remembered and applied on attach.
    pub fn set_detection_types(&self, types: &[DetectionType]) -> Vec<DetectionType> {
        let available = self
            .available
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let active: Vec<DetectionType> = types
            .iter()
            .copied()
            .filter(|t| available.contains(t))
            .collect();

        if !available.is_empty() && active.len() < types.len() {
            let unsupported: Vec<String> = types
                .iter()
                .filter(|t| !available.contains(t))
                .map(ToString::to_string)
                .collect();
            warn!(?unsupported, "Detection types not supported by input");
        }

        let mut settings = self.write();
        settings.requested = types.to_vec();
        settings.active = active.clone();
        active
    }

    /// Pause or resume detection without touching the capture stream
    pub fn set_enabled(&self, enabled: bool) {
        self.write().enabled = enabled;
    }

    /// Types the capture loop should currently look for
    pub fn active_detection_types(&self) -> Vec<DetectionType> {
        let settings = self.read();
        if settings.enabled {
            settings.active.clone()
        } else {
            Vec::new()
        }
    }

    pub fn available_detection_types(&self) -> Vec<DetectionType> {
        self.available
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// What a capture input sees while it runs on the metadata-delivery thread
pub struct CaptureContext {
    stop: StopSignal,
    output: MetadataOutput,
}

impl CaptureContext {
    pub fn new(stop: StopSignal, output: MetadataOutput) -> Self {
        Self { stop, output }
    }

    pub fn is_running(&self) -> bool {
        !self.stop.is_stopped()
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    pub fn region_of_interest(&self) -> NormalizedRect {
        self.output.region_of_interest()
    }

    /// Empty while detection is disabled; inputs may skip scanning then
    pub fn detection_types(&self) -> Vec<DetectionType> {
        self.output.active_detection_types()
    }

    /// Hand a batch to the output; empty batches and batches produced after
    /// a stop request are not delivered
    pub fn deliver(&self, batch: DetectionBatch) {
        if batch.is_empty() || !self.is_running() {
            return;
        }
        self.output.sink.on_batch(batch);
    }
}

/// Builds a pipeline from exactly one input and one output
#[derive(Default)]
pub struct PipelineTransaction {
    input: Option<Box<dyn CaptureInput>>,
    output: Option<MetadataOutput>,
}

impl PipelineTransaction {
    pub fn begin() -> Self {
        Self::default()
    }

    pub fn add_input(&mut self, input: Box<dyn CaptureInput>) -> BackendResult<()> {
        if self.input.is_some() {
            return Err(BackendError::Other("pipeline already has an input".into()));
        }
        self.input = Some(input);
        Ok(())
    }

    pub fn add_output(&mut self, output: MetadataOutput) -> BackendResult<()> {
        if self.output.is_some() {
            return Err(BackendError::Other("pipeline already has an output".into()));
        }
        self.output = Some(output);
        Ok(())
    }

    /// Commit both stages; nothing becomes active unless both are present
    pub fn commit(self, on_error: PipelineErrorHandler) -> BackendResult<CapturePipeline> {
        let (Some(input), Some(output)) = (self.input, self.output) else {
            return Err(BackendError::Other(
                "pipeline needs both an input and an output".into(),
            ));
        };

        output.attach(input.available_detection_types());
        let device = input.device().clone();
        info!(device = %device.name, "Capture pipeline committed");

        Ok(CapturePipeline {
            device,
            input: Arc::new(Mutex::new(input)),
            output,
            delivery: None,
            on_error,
        })
    }
}

/// A committed pipeline that can be started and stopped repeatedly
pub struct CapturePipeline {
    device: CameraDevice,
    input: Arc<Mutex<Box<dyn CaptureInput>>>,
    output: MetadataOutput,
    delivery: Option<CaptureLoopController>,
    on_error: PipelineErrorHandler,
}

impl CapturePipeline {
    pub fn device(&self) -> &CameraDevice {
        &self.device
    }

    pub fn output(&self) -> &MetadataOutput {
        &self.output
    }

    pub fn is_running(&self) -> bool {
        self.delivery.as_ref().is_some_and(|d| d.is_running())
    }

    /// Start streaming; a no-op if already running
    ///
    /// Blocks only for as long as it takes to spawn the delivery thread.
    /// Failures of the input after that are reported to the error handler.
    pub fn start(&mut self) -> BackendResult<()> {
        if self.is_running() {
            debug!(device = %self.device.name, "Pipeline already running");
            return Ok(());
        }
        // Reap a loop that ended on its own (input error)
        self.delivery = None;

        let input = Arc::clone(&self.input);
        let output = self.output.clone();
        let on_error = Arc::clone(&self.on_error);
        let device_name = self.device.name.clone();

        let delivery = CaptureLoopController::spawn(threads::METADATA, move |stop| {
            let context = CaptureContext::new(stop, output);
            let mut input = input.lock().unwrap_or_else(PoisonError::into_inner);

            let result = panic::catch_unwind(AssertUnwindSafe(|| input.run(&context)))
                .unwrap_or_else(|panic| {
                    Err(BackendError::StreamFailed(format!(
                        "capture input panicked: {}",
                        panic_message(panic.as_ref())
                    )))
                });

            // Mark the loop finished before reporting, so a restart
            // triggered by the report never sees it as running
            let stop_requested = !context.is_running();
            context.stop_signal().request_stop();

            match result {
                Ok(()) => debug!(device = %device_name, "Capture loop finished"),
                Err(e) if stop_requested => {
                    debug!(device = %device_name, error = %e, "Capture loop error after stop request");
                }
                Err(e) => {
                    error!(device = %device_name, error = %e, "Capture loop failed");
                    on_error(e);
                }
            }
        })
        .map_err(|e| BackendError::Other(format!("failed to spawn delivery thread: {}", e)))?;

        self.delivery = Some(delivery);
        info!(device = %self.device.name, "Pipeline started");
        Ok(())
    }

    /// Stop streaming and wait for the delivery thread; a no-op if stopped
    pub fn stop(&mut self) {
        if let Some(mut delivery) = self.delivery.take() {
            delivery.stop();
            info!(device = %self.device.name, "Pipeline stopped");
        }
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
