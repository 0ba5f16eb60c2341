// SPDX-License-Identifier: GPL-3.0-only

//! Capture device binding: one device, one input, one detection output

use crate::backends::pipeline::PipelineErrorHandler;
use crate::backends::{
    BackendError, BackendResult, BatchSink, CameraDevice, CaptureBackend, CaptureInput,
    CapturePipeline, DetectionType, MediaKind, MetadataOutput, PipelineTransaction,
};
use crate::errors::ConfigurationError;
use crate::geometry::NormalizedRect;
use crate::queue::SerialQueue;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Completion of a start or stop request, or an asynchronous failure
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Started,
    Stopped,
    Failed(BackendError),
}

/// Receives [`PipelineEvent`]s on the session queue or the delivery thread
pub type PipelineEventHandler = Arc<dyn Fn(PipelineEvent) + Send + Sync>;

/// Input and output go in together or not at all
fn commit_pipeline(
    input: Box<dyn CaptureInput>,
    output: MetadataOutput,
    on_error: PipelineErrorHandler,
) -> BackendResult<CapturePipeline> {
    let mut transaction = PipelineTransaction::begin();
    transaction.add_input(input)?;
    transaction.add_output(output)?;
    transaction.commit(on_error)
}

/// Owns the configured pipeline and drives it from the session queue
pub struct CaptureDeviceBinding {
    device: CameraDevice,
    pipeline: Arc<Mutex<CapturePipeline>>,
    output: MetadataOutput,
    session_queue: SerialQueue,
    events: PipelineEventHandler,
}

impl CaptureDeviceBinding {
    /// Find the default video device, open it and commit the pipeline
    ///
    /// Blocking; run it off the main queue.
    pub fn configure(
        backend: &dyn CaptureBackend,
        sink: Arc<dyn BatchSink>,
        detection_types: &[DetectionType],
        session_queue: SerialQueue,
        events: PipelineEventHandler,
    ) -> Result<Self, ConfigurationError> {
        let device = backend
            .default_device(MediaKind::Video)
            .ok_or(ConfigurationError::NoDeviceAvailable)?;
        info!(device = %device.name, path = %device.path, backend = %backend.backend_type(), "Configuring capture device");

        let input = backend.open_input(&device).map_err(|e| {
            warn!(device = %device.name, error = %e, "Cannot open capture device");
            match e {
                BackendError::DeviceNotFound(_) => ConfigurationError::NoDeviceAvailable,
                other => ConfigurationError::CannotOpenDevice(other.to_string()),
            }
        })?;

        let output = MetadataOutput::new(sink);
        output.set_detection_types(detection_types);

        let error_events = Arc::clone(&events);
        let pipeline = commit_pipeline(input, output.clone(), Arc::new(move |error| {
            error_events(PipelineEvent::Failed(error))
        }))
        .map_err(|e| ConfigurationError::CannotOpenDevice(e.to_string()))?;

        Ok(Self {
            device: pipeline.device().clone(),
            pipeline: Arc::new(Mutex::new(pipeline)),
            output,
            session_queue,
            events,
        })
    }

    pub fn device(&self) -> &CameraDevice {
        &self.device
    }

    /// Enqueue a start; completion arrives as [`PipelineEvent::Started`]
    pub fn start(&self) {
        let pipeline = Arc::clone(&self.pipeline);
        let events = Arc::clone(&self.events);
        let queued = self.session_queue.dispatch(move || {
            let result = pipeline
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .start();
            match result {
                Ok(()) => events(PipelineEvent::Started),
                Err(e) => events(PipelineEvent::Failed(e)),
            }
        });
        if !queued {
            warn!("Session queue closed, start dropped");
        }
    }

    /// Enqueue a stop; completion arrives as [`PipelineEvent::Stopped`]
    pub fn stop(&self) {
        let pipeline = Arc::clone(&self.pipeline);
        let events = Arc::clone(&self.events);
        let queued = self.session_queue.dispatch(move || {
            pipeline
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .stop();
            events(PipelineEvent::Stopped);
        });
        if !queued {
            warn!("Session queue closed, stop dropped");
        }
    }

    /// Legal at any time, including before the first start
    pub fn set_region_of_interest(&self, region: NormalizedRect) {
        self.output.set_region_of_interest(region);
    }

    pub fn region_of_interest(&self) -> NormalizedRect {
        self.output.region_of_interest()
    }

    /// Returns the requested types the input supports
    pub fn set_detection_types(&self, types: &[DetectionType]) -> Vec<DetectionType> {
        self.output.set_detection_types(types)
    }

    pub fn set_detection_enabled(&self, enabled: bool) {
        self.output.set_enabled(enabled);
    }

    pub fn available_detection_types(&self) -> Vec<DetectionType> {
        self.output.available_detection_types()
    }

    /// Release the device once previously enqueued requests have run
    ///
    /// Never blocks the caller. No events are published for the final stop.
    pub fn release(self) {
        let pipeline = self.pipeline;
        let device = self.device.name;
        let queued = self.session_queue.dispatch(move || {
            pipeline
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .stop();
            debug!(device = %device, "Capture binding released");
        });
        if !queued {
            debug!("Session queue closed, releasing binding in place");
        }
    }
}
