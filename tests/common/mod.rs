// SPDX-License-Identifier: GPL-3.0-only

//! Scripted backends, gates and delegates shared by the integration tests

#![allow(dead_code)]

use scanner::backends::{
    BackendError, BackendResult, CameraDevice, CameraFormat, CaptureBackend, CaptureBackendType,
    CaptureContext, CaptureInput, DetectionBatch, DetectionRecord, DetectionType, SensorRotation,
    TorchDevice, TorchMode,
};
use scanner::errors::{ConfigurationError, PermissionError};
use scanner::permission::{AuthorizationCallback, AuthorizationState, PermissionGate};
use scanner::session::{ScannerDelegate, SessionState};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub const WAIT: Duration = Duration::from_secs(5);

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

pub fn test_device(width: u32, height: u32, rotation: SensorRotation) -> CameraDevice {
    let mut device = CameraDevice::new("Mock camera", "mock:0");
    device.rotation = rotation;
    device.format = Some(CameraFormat {
        width,
        height,
        framerate: None,
        pixel_format: "GREY".into(),
    });
    device
}

/// Shared counters of what the backend was asked to do
#[derive(Default)]
pub struct BackendProbe {
    pub device_lookups: AtomicUsize,
    pub opens: AtomicUsize,
    pub runs: AtomicUsize,
    pub running: AtomicBool,
}

/// Backend with at most one device whose input emits a one-record batch
/// every `frame_interval`
pub struct MockBackend {
    pub device: Option<CameraDevice>,
    pub open_error: Option<BackendError>,
    pub frame_interval: Duration,
    /// Frames before the input fails as if unplugged
    pub fail_after: Option<u64>,
    pub torch_lit: Option<Arc<AtomicBool>>,
    pub probe: Arc<BackendProbe>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            device: Some(test_device(640, 480, SensorRotation::None)),
            open_error: None,
            frame_interval: Duration::from_millis(2),
            fail_after: None,
            torch_lit: None,
            probe: Arc::new(BackendProbe::default()),
        }
    }

    pub fn without_device() -> Self {
        Self {
            device: None,
            ..Self::new()
        }
    }
}

impl CaptureBackend for MockBackend {
    fn backend_type(&self) -> CaptureBackendType {
        CaptureBackendType::Virtual
    }

    fn enumerate_devices(&self) -> Vec<CameraDevice> {
        self.probe.device_lookups.fetch_add(1, Ordering::SeqCst);
        self.device.iter().cloned().collect()
    }

    fn open_input(&self, device: &CameraDevice) -> BackendResult<Box<dyn CaptureInput>> {
        self.probe.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.open_error {
            return Err(error.clone());
        }
        Ok(Box::new(MockInput {
            device: device.clone(),
            frame_interval: self.frame_interval,
            fail_after: self.fail_after,
            probe: Arc::clone(&self.probe),
        }))
    }

    fn torch(&self, _device: &CameraDevice) -> Option<Box<dyn TorchDevice>> {
        let lit = self.torch_lit.as_ref()?;
        Some(Box::new(MockTorch {
            lit: Arc::clone(lit),
        }))
    }
}

pub struct MockInput {
    device: CameraDevice,
    frame_interval: Duration,
    fail_after: Option<u64>,
    probe: Arc<BackendProbe>,
}

impl CaptureInput for MockInput {
    fn device(&self) -> &CameraDevice {
        &self.device
    }

    fn available_detection_types(&self) -> Vec<DetectionType> {
        vec![DetectionType::Qr]
    }

    fn run(&mut self, context: &CaptureContext) -> BackendResult<()> {
        self.probe.runs.fetch_add(1, Ordering::SeqCst);
        self.probe.running.store(true, Ordering::SeqCst);

        let mut sequence = 0;
        let result = loop {
            if !context.is_running() {
                break Ok(());
            }
            if self.fail_after == Some(sequence) {
                break Err(BackendError::StreamFailed("device unplugged".into()));
            }
            let records = context
                .detection_types()
                .into_iter()
                .map(|t| {
                    let payload = Some(format!("frame-{}", sequence));
                    DetectionRecord::new(t, payload, context.region_of_interest())
                })
                .collect();
            context.deliver(DetectionBatch::new(sequence, records));
            sequence += 1;
            context.stop_signal().sleep(self.frame_interval);
        };

        self.probe.running.store(false, Ordering::SeqCst);
        result
    }
}

pub struct MockTorch {
    lit: Arc<AtomicBool>,
}

impl TorchDevice for MockTorch {
    fn name(&self) -> &str {
        "mock-torch"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn is_active(&self) -> bool {
        self.lit.load(Ordering::SeqCst)
    }

    fn set_mode(&mut self, mode: TorchMode) -> BackendResult<()> {
        self.lit.store(mode == TorchMode::On, Ordering::SeqCst);
        Ok(())
    }
}

/// Gate with a scripted state and request answer
pub struct ScriptedGate {
    state: Mutex<AuthorizationState>,
    answer: AuthorizationState,
    pub requests: AtomicUsize,
}

impl ScriptedGate {
    pub fn new(state: AuthorizationState) -> Arc<Self> {
        Self::answering(state, state)
    }

    /// Starts in `state`; a request switches to `answer`
    pub fn answering(state: AuthorizationState, answer: AuthorizationState) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
            answer,
            requests: AtomicUsize::new(0),
        })
    }

    pub fn set_state(&self, state: AuthorizationState) {
        *self.state.lock().unwrap() = state;
    }
}

impl PermissionGate for ScriptedGate {
    fn query_authorization(&self) -> AuthorizationState {
        *self.state.lock().unwrap()
    }

    fn request_authorization(&self, completion: AuthorizationCallback) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.set_state(self.answer);
        let answer = self.answer;
        thread::spawn(move || completion(answer));
    }
}

/// Undetermined gate that keeps the request open until answered by the test
pub struct HeldGate {
    state: Mutex<AuthorizationState>,
    pending: Mutex<Option<AuthorizationCallback>>,
}

impl HeldGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(AuthorizationState::Undetermined),
            pending: Mutex::new(None),
        })
    }

    pub fn has_request(&self) -> bool {
        self.pending.lock().unwrap().is_some()
    }

    /// Complete the open request on the calling thread
    pub fn answer(&self, state: AuthorizationState) {
        *self.state.lock().unwrap() = state;
        let completion = self.pending.lock().unwrap().take();
        if let Some(completion) = completion {
            completion(state);
        }
    }
}

impl PermissionGate for HeldGate {
    fn query_authorization(&self) -> AuthorizationState {
        *self.state.lock().unwrap()
    }

    fn request_authorization(&self, completion: AuthorizationCallback) {
        *self.pending.lock().unwrap() = Some(completion);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DelegateEvent {
    Authorization(PermissionError),
    Configuration(ConfigurationError),
    State(SessionState),
    Runtime(String),
}

/// Records every callback; detections can be made slow
#[derive(Default)]
pub struct RecordingDelegate {
    pub events: Mutex<Vec<DelegateEvent>>,
    pub batches: Mutex<Vec<u64>>,
    pub detection_delay: Duration,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub detection_threads: Mutex<Vec<String>>,
}

impl RecordingDelegate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn slow(detection_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            detection_delay,
            ..Self::default()
        })
    }

    pub fn events(&self) -> Vec<DelegateEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn authorization_failures(&self) -> Vec<PermissionError> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                DelegateEvent::Authorization(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    pub fn configuration_failures(&self) -> Vec<ConfigurationError> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                DelegateEvent::Configuration(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    pub fn states(&self) -> Vec<SessionState> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                DelegateEvent::State(state) => Some(state),
                _ => None,
            })
            .collect()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    /// Detection callbacks currently running
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

impl ScannerDelegate for RecordingDelegate {
    fn on_authorization_failure(&self, error: PermissionError) {
        self.events
            .lock()
            .unwrap()
            .push(DelegateEvent::Authorization(error));
    }

    fn on_configuration_failure(&self, error: ConfigurationError) {
        self.events
            .lock()
            .unwrap()
            .push(DelegateEvent::Configuration(error));
    }

    fn on_detection(&self, batch: &DetectionBatch) {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        self.detection_threads
            .lock()
            .unwrap()
            .push(thread::current().name().unwrap_or_default().to_string());

        if !self.detection_delay.is_zero() {
            thread::sleep(self.detection_delay);
        }
        self.batches.lock().unwrap().push(batch.sequence);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn on_state_changed(&self, state: &SessionState) {
        self.events
            .lock()
            .unwrap()
            .push(DelegateEvent::State(state.clone()));
    }

    fn on_runtime_error(&self, error: &BackendError) {
        self.events
            .lock()
            .unwrap()
            .push(DelegateEvent::Runtime(error.to_string()));
    }
}
