// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands acting as a scanner host
//!
//! This module provides command-line functionality for:
//! - Listing available capture devices
//! - Scanning from a camera
//! - Scanning image files through the virtual camera
//!
//! Detections are printed to stdout as JSON lines; logs go to stderr.

use chrono::Local;
use scanner::Config;
use scanner::backends::v4l2::V4l2Backend;
use scanner::backends::virtual_camera::VirtualBackend;
use scanner::backends::{BackendError, CaptureBackend, DetectionBatch, DetectionType};
use scanner::errors::{ConfigurationError, PermissionError};
use scanner::geometry::Rect;
use scanner::permission::{AuthorizationState, FixedGate, PermissionGate, default_gate};
use scanner::session::{
    DisplayOrientation, ScannerDelegate, SessionController, SessionOptions, SessionState,
    VideoGravity, interest_rect,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How a scan command runs
pub struct ScanOptions {
    pub once: bool,
    pub timeout: Option<Duration>,
    pub detection_types: Vec<DetectionType>,
    pub full_frame: bool,
    pub gravity: VideoGravity,
    pub torch: bool,
}

enum HostEvent {
    State(SessionState),
    Detected(usize),
    Authorization(PermissionError),
    Configuration(ConfigurationError),
    Runtime(BackendError),
    Interrupted,
}

/// Prints every detection as one JSON object per line
struct JsonLinesDelegate {
    events: Sender<HostEvent>,
}

impl ScannerDelegate for JsonLinesDelegate {
    fn on_authorization_failure(&self, error: PermissionError) {
        let _ = self.events.send(HostEvent::Authorization(error));
    }

    fn on_configuration_failure(&self, error: ConfigurationError) {
        let _ = self.events.send(HostEvent::Configuration(error));
    }

    fn on_detection(&self, batch: &DetectionBatch) {
        let timestamp = Local::now().to_rfc3339();
        for record in batch.iter() {
            let line = json!({
                "timestamp": timestamp,
                "sequence": batch.sequence,
                "type": record.symbology,
                "payload": record.payload,
                "bounds": record.bounds,
            });
            println!("{}", line);
        }
        let _ = self.events.send(HostEvent::Detected(batch.len()));
    }

    fn on_state_changed(&self, state: &SessionState) {
        let _ = self.events.send(HostEvent::State(state.clone()));
    }

    fn on_runtime_error(&self, error: &BackendError) {
        let _ = self.events.send(HostEvent::Runtime(error.clone()));
    }
}

/// List all available capture devices
pub fn list_devices(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let backend = V4l2Backend::new().with_preferred_device(config.preferred_device.clone());
    let devices = backend.enumerate_devices();

    if devices.is_empty() {
        println!("No capture devices found.");
        return Ok(());
    }

    println!("Available capture devices:");
    println!();
    for (index, device) in devices.iter().enumerate() {
        println!("  [{}] {}", index, device.name);
        println!("      Path: {}", device.path);
        if let Some(format) = &device.format {
            println!("      Format: {}", format);
        }
        if device.rotation.degrees() != 0 {
            println!("      Sensor rotation: {}°", device.rotation.degrees());
        }
        println!();
    }

    let permission = default_gate().query_authorization();
    if permission != AuthorizationState::Authorized {
        println!("Camera access: {}", permission);
    }

    Ok(())
}

/// Scan from a V4L2 camera until interrupted
pub fn scan_camera(
    config: &Config,
    options: ScanOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let backend = V4l2Backend::new()
        .with_preferred_device(config.preferred_device.clone())
        .with_max_dimension(Some(config.max_dimension));
    run_session(Arc::new(backend), default_gate(), config, options)
}

/// Scan image files, replayed as a camera
pub fn scan_files(
    config: &Config,
    paths: &[PathBuf],
    options: ScanOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let backend = VirtualBackend::new(paths)
        .with_frame_interval(config.frame_interval())
        .with_max_dimension(Some(config.max_dimension));
    if backend.files().is_empty() {
        return Err("No image files found".into());
    }
    eprintln!("Scanning {} image file(s)", backend.files().len());

    // Files need no camera access
    let gate = Arc::new(FixedGate(AuthorizationState::Authorized));
    run_session(Arc::new(backend), gate, config, options)
}

fn run_session(
    backend: Arc<dyn CaptureBackend>,
    permission: Arc<dyn PermissionGate>,
    config: &Config,
    options: ScanOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let (sender, receiver) = mpsc::channel();

    let interrupt = sender.clone();
    ctrlc::set_handler(move || {
        let _ = interrupt.send(HostEvent::Interrupted);
    })?;

    let session_options = SessionOptions {
        detection_types: options.detection_types.clone(),
        video_gravity: options.gravity,
        torch_poll_interval: config.torch_poll_interval(),
        // A single scan only needs the first batch
        hold_after_detection: options.once,
    };
    let session = SessionController::new(
        backend,
        permission,
        Arc::new(JsonLinesDelegate { events: sender }),
        session_options,
    )?;
    session.activate();

    let result = wait_for_detections(&session, &receiver, config, &options);

    if options.torch {
        session.torch().set_enabled(false);
    }
    session.teardown();
    session.flush();
    result
}

fn wait_for_detections(
    session: &SessionController,
    receiver: &mpsc::Receiver<HostEvent>,
    config: &Config,
    options: &ScanOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let deadline = options.timeout.map(|timeout| Instant::now() + timeout);
    let mut layout_applied = false;

    loop {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            eprintln!("Timed out");
            return Ok(());
        }

        let event = match receiver.recv_timeout(POLL_INTERVAL) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return Ok(()),
        };

        match event {
            HostEvent::State(state) => {
                tracing::info!(%state, "Session state");
                if state.is_configured() && !layout_applied {
                    layout_applied = true;
                    apply_layout(session, config, options);
                }
            }
            HostEvent::Detected(count) => {
                if options.once && count > 0 {
                    return Ok(());
                }
            }
            HostEvent::Authorization(error) => {
                if error.settings_recoverable() {
                    eprintln!("Grant camera access in your system settings and try again.");
                }
                return Err(error.into());
            }
            HostEvent::Configuration(error) => return Err(error.into()),
            HostEvent::Runtime(error) => return Err(error.into()),
            HostEvent::Interrupted => {
                eprintln!("Interrupted");
                return Ok(());
            }
        }
    }
}

/// Lay the preview out as if it showed the whole sensor frame and put the
/// interest square in the middle
fn apply_layout(session: &SessionController, config: &Config, options: &ScanOptions) {
    let Some(size) = session.device().and_then(|device| device.sensor_size()) else {
        return;
    };

    if options.torch {
        if session.torch().has_torch() {
            session.torch().set_enabled(true);
        } else {
            eprintln!("No torch available");
        }
    }
    if options.full_frame {
        return;
    }

    let container = Rect::from_size(size);
    let viewport = interest_rect(container, config.interest_fraction, config.bottom_inset);
    session.update_display(container, DisplayOrientation::Portrait);
    session.set_region_of_interest(viewport);
    session.flush();
    tracing::info!(region = ?session.region_of_interest(), "Scanning region");
}
