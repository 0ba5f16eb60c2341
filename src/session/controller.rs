// SPDX-License-Identifier: GPL-3.0-only

//! Session controller: authorization, configuration and run lifecycle
//!
//! All state transitions and host callbacks happen on the main queue.
//! Configuration and start/stop run on the session queue and report back to
//! the main queue, so none of the public methods block on the camera.
//!
//! ```text
//! host ──▶ SessionController ──(main queue)──▶ state machine ──▶ ScannerDelegate
//!                                   │                  ▲
//!                                   ▼                  │ PipelineEvent
//!                            session queue ──▶ CaptureDeviceBinding
//!                                                      │
//!                      metadata thread ──▶ DetectionDispatcher ──▶ on_detection
//! ```

use super::binding::{CaptureDeviceBinding, PipelineEvent, PipelineEventHandler};
use super::dispatcher::{BatchConsumer, DetectionDispatcher};
use super::region::{DisplayOrientation, RegionMapper, VideoGravity};
use super::state::{FailureReason, SessionState};
use super::torch::TorchController;
use crate::backends::{
    BackendError, BatchSink, CameraDevice, CaptureBackend, DetectionBatch, DetectionType,
};
use crate::config::Config;
use crate::constants::{TORCH_POLL_INTERVAL, threads};
use crate::errors::{ConfigurationError, PermissionError, ScannerResult};
use crate::geometry::{NormalizedRect, Rect};
use crate::permission::{AuthorizationState, PermissionGate};
use crate::queue::SerialQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Host-facing callbacks, always invoked on the main queue
pub trait ScannerDelegate: Send + Sync {
    /// Camera access is unavailable; reported once
    fn on_authorization_failure(&self, error: PermissionError);

    /// The capture device could not be set up; reported once
    fn on_configuration_failure(&self, error: ConfigurationError);

    /// Detections from one frame; never more than one call in flight
    fn on_detection(&self, batch: &DetectionBatch);

    fn on_state_changed(&self, state: &SessionState) {
        let _ = state;
    }

    /// The stream stopped on its own (device unplugged); the session is
    /// back in `Stopped` and [`SessionController::resume`] may retry
    fn on_runtime_error(&self, error: &BackendError) {
        let _ = error;
    }
}

/// Session settings chosen by the host
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub detection_types: Vec<DetectionType>,
    pub video_gravity: VideoGravity,
    pub torch_poll_interval: Duration,
    /// Deliver one batch, then skip batches until
    /// [`SessionController::finish_processing`]
    pub hold_after_detection: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            detection_types: vec![DetectionType::Qr],
            video_gravity: VideoGravity::default(),
            torch_poll_interval: TORCH_POLL_INTERVAL,
            hold_after_detection: false,
        }
    }
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            detection_types: config.detection_types.clone(),
            video_gravity: config.video_gravity,
            torch_poll_interval: config.torch_poll_interval(),
            hold_after_detection: false,
        }
    }
}

/// Pending host callback, collected under the lock and delivered after it
enum Notice {
    State(SessionState),
    Authorization(PermissionError),
    Configuration(ConfigurationError),
    Runtime(BackendError),
}

/// Mutable session state, touched only on the main queue
struct Core {
    state: SessionState,
    binding: Option<CaptureDeviceBinding>,
    /// Whether the host currently wants the stream running
    run_intent: bool,
    authorization_pending: bool,
    container: Rect,
    orientation: DisplayOrientation,
    gravity: VideoGravity,
    viewport: Option<Rect>,
    mapper: RegionMapper,
    region: NormalizedRect,
    detection_types: Vec<DetectionType>,
    detection_enabled: bool,
}

impl Core {
    fn update_region(&mut self) {
        self.region = match self.viewport {
            Some(viewport) => self.mapper.compute_detection_rect(
                viewport,
                self.container,
                self.orientation,
                self.gravity,
            ),
            None => NormalizedRect::FULL,
        };
        if let Some(binding) = &self.binding {
            binding.set_region_of_interest(self.region);
        }
    }

    fn set_state(&mut self, state: SessionState, notices: &mut Vec<Notice>) {
        if self.state != state {
            info!(from = %self.state, to = %state, "Session state changed");
            self.state = state.clone();
            notices.push(Notice::State(state));
        }
    }
}

/// Host callbacks in progress; teardown closes it
#[derive(Default)]
struct CallbackGate {
    state: Mutex<GateState>,
    idle: Condvar,
}

#[derive(Default)]
struct GateState {
    closed: bool,
    active: usize,
}

/// Held for the duration of one host callback
struct CallbackPass<'a> {
    gate: &'a CallbackGate,
}

impl CallbackGate {
    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self) -> Option<CallbackPass<'_>> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        state.active += 1;
        Some(CallbackPass { gate: self })
    }

    /// Refuse new callbacks; with `wait`, also block until running ones return
    fn close(&self, wait: bool) {
        let mut state = self.lock();
        state.closed = true;
        if wait {
            while state.active > 0 {
                state = self
                    .idle
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
    }
}

impl Drop for CallbackPass<'_> {
    fn drop(&mut self) {
        let mut state = self.gate.lock();
        state.active = state.active.saturating_sub(1);
        if state.active == 0 {
            self.gate.idle.notify_all();
        }
    }
}

struct ControllerInner {
    main_queue: SerialQueue,
    session_queue: SerialQueue,
    backend: Arc<dyn CaptureBackend>,
    permission: Arc<dyn PermissionGate>,
    dispatcher: DetectionDispatcher,
    delegate: RwLock<Option<Arc<dyn ScannerDelegate>>>,
    callbacks: CallbackGate,
    core: Mutex<Core>,
    torch: TorchController,
    torn_down: AtomicBool,
    hold_after_detection: bool,
    /// Set by a delivered batch while holding, cleared by the host
    processing: AtomicBool,
}

impl ControllerInner {
    fn core(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn delegate(&self) -> Option<Arc<dyn ScannerDelegate>> {
        self.delegate
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Deliver collected callbacks; the core lock must not be held
    fn notify(&self, notices: Vec<Notice>) {
        if notices.is_empty() {
            return;
        }
        let Some(_pass) = self.callbacks.enter() else {
            return;
        };
        let Some(delegate) = self.delegate() else {
            return;
        };
        for notice in notices {
            match notice {
                Notice::State(state) => delegate.on_state_changed(&state),
                Notice::Authorization(e) => delegate.on_authorization_failure(e),
                Notice::Configuration(e) => delegate.on_configuration_failure(e),
                Notice::Runtime(e) => delegate.on_runtime_error(&e),
            }
        }
    }

    fn deliver_detection(&self, batch: &DetectionBatch) {
        let Some(_pass) = self.callbacks.enter() else {
            debug!(sequence = batch.sequence, "Discarding batch after teardown");
            return;
        };
        if self.hold_after_detection && self.processing.swap(true, Ordering::AcqRel) {
            debug!(sequence = batch.sequence, "Host still processing, skipping batch");
            return;
        }
        if let Some(delegate) = self.delegate() {
            delegate.on_detection(batch);
        }
    }

    fn event_handler(self: &Arc<Self>) -> PipelineEventHandler {
        let weak = Arc::downgrade(self);
        Arc::new(move |event| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let main = inner.main_queue.clone();
            main.dispatch(move || inner.apply_pipeline_event(event));
        })
    }

    fn activate(self: &Arc<Self>) {
        if self.is_torn_down() {
            return;
        }
        {
            let mut core = self.core();
            if core.state != SessionState::Idle || core.authorization_pending {
                debug!(state = %core.state, "Session already activated");
                return;
            }
            core.run_intent = true;
        }

        match self.permission.query_authorization() {
            AuthorizationState::Authorized => self.begin_configuration(),
            AuthorizationState::Undetermined => self.request_authorization(),
            AuthorizationState::Denied => self.fail_permission(PermissionError::Denied),
            AuthorizationState::Restricted => self.fail_permission(PermissionError::Restricted),
        }
    }

    fn request_authorization(self: &Arc<Self>) {
        self.core().authorization_pending = true;
        info!("Requesting camera authorization");

        let weak: Weak<Self> = Arc::downgrade(self);
        self.permission
            .request_authorization(Box::new(move |state| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let main = inner.main_queue.clone();
                main.dispatch(move || inner.apply_authorization(state));
            }));
    }

    fn apply_authorization(self: &Arc<Self>, state: AuthorizationState) {
        let idle = {
            let mut core = self.core();
            core.authorization_pending = false;
            core.state == SessionState::Idle
        };
        if self.is_torn_down() || !idle {
            return;
        }

        info!(%state, "Camera authorization answered");
        match state {
            AuthorizationState::Authorized => self.begin_configuration(),
            AuthorizationState::Denied => self.fail_permission(PermissionError::Denied),
            AuthorizationState::Restricted => self.fail_permission(PermissionError::Restricted),
            AuthorizationState::Undetermined => {
                warn!("Authorization request finished undecided, staying idle");
            }
        }
    }

    fn fail_permission(&self, error: PermissionError) {
        let mut notices = Vec::new();
        let binding = {
            let mut core = self.core();
            if core.state.is_failed() {
                return;
            }
            core.run_intent = false;
            core.set_state(SessionState::Failed(FailureReason::Permission(error)), &mut notices);
            core.binding.take()
        };
        if let Some(binding) = binding {
            binding.release();
            self.torch.detach();
        }
        warn!(%error, "Camera authorization failed");
        notices.push(Notice::Authorization(error));
        self.notify(notices);
    }

    fn begin_configuration(self: &Arc<Self>) {
        let mut notices = Vec::new();
        let detection_types = {
            let mut core = self.core();
            if core.state != SessionState::Idle {
                return;
            }
            core.set_state(SessionState::Configuring, &mut notices);
            core.detection_types.clone()
        };
        self.notify(notices);

        let inner = Arc::clone(self);
        let queued = self.session_queue.dispatch(move || {
            let sink: Arc<dyn BatchSink> = Arc::new(inner.dispatcher.clone());
            let result = CaptureDeviceBinding::configure(
                inner.backend.as_ref(),
                sink,
                &detection_types,
                inner.session_queue.clone(),
                inner.event_handler(),
            );
            let main = inner.main_queue.clone();
            main.dispatch(move || inner.apply_configuration(result));
        });
        if !queued {
            error!("Session queue closed, cannot configure");
        }
    }

    fn apply_configuration(&self, result: Result<CaptureDeviceBinding, ConfigurationError>) {
        if self.is_torn_down() {
            if let Ok(binding) = result {
                binding.release();
            }
            return;
        }

        let mut notices = Vec::new();
        let binding = match result {
            Ok(binding) => binding,
            Err(e) => {
                error!(error = %e, "Capture configuration failed");
                {
                    let mut core = self.core();
                    core.run_intent = false;
                    core.set_state(
                        SessionState::Failed(FailureReason::Configuration(e.clone())),
                        &mut notices,
                    );
                }
                notices.push(Notice::Configuration(e));
                self.notify(notices);
                return;
            }
        };

        let device = binding.device().clone();
        {
            let mut core = self.core();
            core.mapper = RegionMapper::new(device.sensor_size(), device.rotation);
            binding.set_detection_types(&core.detection_types);
            binding.set_detection_enabled(core.detection_enabled);
            if core.run_intent {
                binding.start();
            }
            core.binding = Some(binding);
            core.update_region();
            core.set_state(SessionState::Stopped, &mut notices);
        }
        info!(device = %device.name, "Capture session configured");
        self.torch.attach(self.backend.torch(&device));
        self.notify(notices);
    }

    fn apply_pipeline_event(&self, event: PipelineEvent) {
        if self.is_torn_down() {
            debug!(?event, "Ignoring pipeline event after teardown");
            return;
        }

        let mut notices = Vec::new();
        {
            let mut core = self.core();
            match event {
                PipelineEvent::Started => {
                    if core.run_intent && core.state == SessionState::Stopped {
                        core.set_state(SessionState::Running, &mut notices);
                    } else {
                        debug!(state = %core.state, "Stale start completion");
                    }
                }
                PipelineEvent::Stopped => {
                    if !core.run_intent && core.state == SessionState::Running {
                        core.set_state(SessionState::Stopped, &mut notices);
                    } else {
                        debug!(state = %core.state, "Stale stop completion");
                    }
                }
                PipelineEvent::Failed(e) => {
                    if core.state.is_configured() {
                        warn!(error = %e, "Capture pipeline failed");
                        core.run_intent = false;
                        core.set_state(SessionState::Stopped, &mut notices);
                        notices.push(Notice::Runtime(e));
                    }
                }
            }
        }
        self.notify(notices);
    }

    fn pause(&self) {
        let mut core = self.core();
        let state = core.state.clone();
        match state {
            SessionState::Configuring => core.run_intent = false,
            SessionState::Idle if core.authorization_pending => core.run_intent = false,
            SessionState::Running | SessionState::Stopped if core.run_intent => {
                core.run_intent = false;
                if let Some(binding) = &core.binding {
                    binding.stop();
                }
            }
            _ => debug!(%state, "Nothing to pause"),
        }
    }

    fn resume(self: &Arc<Self>) {
        if self.is_torn_down() {
            return;
        }
        let state = {
            let mut core = self.core();
            let state = core.state.clone();
            match state {
                SessionState::Configuring => {
                    core.run_intent = true;
                    return;
                }
                SessionState::Idle if core.authorization_pending => {
                    core.run_intent = true;
                    return;
                }
                SessionState::Running | SessionState::Stopped if core.run_intent => return,
                _ => state,
            }
        };

        match state {
            SessionState::Idle => self.activate(),
            SessionState::Running | SessionState::Stopped => {
                match self.permission.query_authorization() {
                    AuthorizationState::Authorized => {
                        let mut core = self.core();
                        core.run_intent = true;
                        if let Some(binding) = &core.binding {
                            binding.start();
                        }
                    }
                    AuthorizationState::Denied => self.fail_permission(PermissionError::Denied),
                    AuthorizationState::Restricted => {
                        self.fail_permission(PermissionError::Restricted)
                    }
                    AuthorizationState::Undetermined => {
                        warn!("Authorization no longer determined, not resuming");
                    }
                }
            }
            _ => debug!(%state, "Nothing to resume"),
        }
    }

    fn teardown(&self) {
        let binding = {
            let mut core = self.core();
            core.run_intent = false;
            if !core.state.is_failed() {
                core.state = SessionState::Stopped;
            }
            core.binding.take()
        };
        if let Some(binding) = binding {
            binding.release();
        }
        self.torch.detach();
        self.torch.clear_observers();
        info!("Scanner session torn down");
    }
}

/// Drives one scanning session for a host
///
/// Cheap to clone; all clones control the same session. Methods may be
/// called from any thread and take effect on the main queue, in call order.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<ControllerInner>,
}

impl SessionController {
    /// Create an idle session; nothing touches the camera until
    /// [`activate`](Self::activate)
    pub fn new(
        backend: Arc<dyn CaptureBackend>,
        permission: Arc<dyn PermissionGate>,
        delegate: Arc<dyn ScannerDelegate>,
        options: SessionOptions,
    ) -> ScannerResult<Self> {
        let main_queue = SerialQueue::new(threads::MAIN)?;
        let session_queue = SerialQueue::new(threads::SESSION)?;
        let dispatcher = DetectionDispatcher::new(main_queue.clone());
        let torch = TorchController::new(main_queue.clone(), options.torch_poll_interval);

        let inner = Arc::new(ControllerInner {
            main_queue,
            session_queue,
            backend,
            permission,
            dispatcher,
            delegate: RwLock::new(Some(delegate)),
            callbacks: CallbackGate::default(),
            core: Mutex::new(Core {
                state: SessionState::Idle,
                binding: None,
                run_intent: false,
                authorization_pending: false,
                container: Rect::default(),
                orientation: DisplayOrientation::default(),
                gravity: options.video_gravity,
                viewport: None,
                mapper: RegionMapper::default(),
                region: NormalizedRect::FULL,
                detection_types: options.detection_types,
                detection_enabled: true,
            }),
            torch,
            torn_down: AtomicBool::new(false),
            hold_after_detection: options.hold_after_detection,
            processing: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&inner);
        let consumer: Arc<dyn BatchConsumer> = Arc::new(move |batch: DetectionBatch| {
            if let Some(inner) = weak.upgrade() {
                inner.deliver_detection(&batch);
            }
        });
        inner.dispatcher.set_consumer(Some(consumer));

        debug!(backend = %inner.backend.backend_type(), "Session controller created");
        Ok(Self { inner })
    }

    /// Run `task` on the main queue, inline when already on it
    fn on_main<F>(&self, task: F)
    where
        F: FnOnce(&Arc<ControllerInner>) + Send + 'static,
    {
        if self.inner.main_queue.is_current() {
            task(&self.inner);
            return;
        }
        let inner = Arc::clone(&self.inner);
        if !self.inner.main_queue.dispatch(move || task(&inner)) {
            warn!("Main queue closed, request dropped");
        }
    }

    /// Authorize, configure and start
    ///
    /// Only acts while idle. Prompts for access if undetermined.
    pub fn activate(&self) {
        self.on_main(|inner| inner.activate());
    }

    /// Stop streaming; the device stays configured
    pub fn pause(&self) {
        self.on_main(|inner| inner.pause());
    }

    /// Start streaming again, or activate if never activated
    pub fn resume(&self) {
        self.on_main(|inner| inner.resume());
    }

    /// Release the device and all observers; terminal for this controller
    ///
    /// No host callback starts once this is called. Off the main queue it
    /// blocks until a callback that is already running returns; on the main
    /// queue that callback is the caller.
    pub fn teardown(&self) {
        if self.inner.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner
            .callbacks
            .close(!self.inner.main_queue.is_current());
        self.inner.dispatcher.shutdown();
        *self
            .inner
            .delegate
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.on_main(|inner| inner.teardown());
    }

    /// Viewfinder rectangle in container coordinates; call on every layout
    /// pass
    pub fn set_region_of_interest(&self, viewport: Rect) {
        self.on_main(move |inner| {
            let mut core = inner.core();
            core.viewport = Some(viewport);
            core.update_region();
        });
    }

    /// Preview container bounds and display orientation
    pub fn update_display(&self, container: Rect, orientation: DisplayOrientation) {
        self.on_main(move |inner| {
            let mut core = inner.core();
            core.container = container;
            core.orientation = orientation;
            core.update_region();
        });
    }

    pub fn set_video_gravity(&self, gravity: VideoGravity) {
        self.on_main(move |inner| {
            let mut core = inner.core();
            core.gravity = gravity;
            core.update_region();
        });
    }

    /// Symbologies to report; unsupported ones are ignored with a warning
    pub fn set_supported_detection_types(&self, types: Vec<DetectionType>) {
        self.on_main(move |inner| {
            let mut core = inner.core();
            if let Some(binding) = &core.binding {
                binding.set_detection_types(&types);
            }
            core.detection_types = types;
        });
    }

    /// Suspend detection while keeping the stream running
    pub fn set_detection_enabled(&self, enabled: bool) {
        self.on_main(move |inner| {
            let mut core = inner.core();
            core.detection_enabled = enabled;
            if let Some(binding) = &core.binding {
                binding.set_detection_enabled(enabled);
            }
        });
    }

    /// Accept the next batch after one was held for processing
    pub fn finish_processing(&self) {
        self.inner.processing.store(false, Ordering::Release);
    }

    /// Whether a held batch is waiting for [`finish_processing`](Self::finish_processing)
    pub fn is_processing(&self) -> bool {
        self.inner.processing.load(Ordering::Acquire)
    }

    /// Wait until work requested so far has been applied
    ///
    /// Returns immediately for work that is itself waiting on the camera or
    /// on a user prompt.
    pub fn flush(&self) {
        self.inner.main_queue.flush();
        self.inner.session_queue.flush();
        self.inner.main_queue.flush();
    }

    pub fn state(&self) -> SessionState {
        self.inner.core().state.clone()
    }

    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    /// Current detection rectangle in normalized sensor coordinates
    pub fn region_of_interest(&self) -> NormalizedRect {
        self.inner.core().region
    }

    pub fn device(&self) -> Option<CameraDevice> {
        self.inner
            .core()
            .binding
            .as_ref()
            .map(|binding| binding.device().clone())
    }

    pub fn available_detection_types(&self) -> Vec<DetectionType> {
        self.inner
            .core()
            .binding
            .as_ref()
            .map(CaptureDeviceBinding::available_detection_types)
            .unwrap_or_default()
    }

    pub fn torch(&self) -> &TorchController {
        &self.inner.torch
    }

    pub fn dispatcher(&self) -> &DetectionDispatcher {
        &self.inner.dispatcher
    }
}
