// SPDX-License-Identifier: GPL-3.0-only

//! Torch control and observation
//!
//! Independent of the capture session: toggling never changes the session
//! state and failures are absorbed. The hardware state is polled so changes
//! the user didn't make (thermal shutoff, another app) reach observers too.

use crate::backends::frame_loop::{CaptureLoopController, LoopAction};
use crate::backends::{TorchDevice, TorchMode};
use crate::constants::threads;
use crate::queue::SerialQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Observable torch state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TorchState {
    /// The torch exists and can be switched right now
    pub available: bool,
    /// The torch is lit
    pub active: bool,
}

/// Called on the main queue with every state change
pub type TorchObserver = Arc<dyn Fn(TorchState) + Send + Sync>;

/// Handle for removing an observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

struct TorchInner {
    device: Mutex<Option<Box<dyn TorchDevice>>>,
    state: Mutex<TorchState>,
    observers: Mutex<Vec<(ObserverId, TorchObserver)>>,
    next_id: AtomicU64,
    notify_queue: SerialQueue,
    monitor: Mutex<Option<CaptureLoopController>>,
    poll_interval: Duration,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TorchInner {
    fn read_hardware(&self) -> TorchState {
        match lock(&self.device).as_ref() {
            Some(device) => TorchState {
                available: device.is_available(),
                active: device.is_active(),
            },
            None => TorchState::default(),
        }
    }

    /// Poll the hardware and publish a change, if any
    fn refresh(&self) {
        let current = self.read_hardware();
        let changed = {
            let mut state = lock(&self.state);
            let changed = *state != current;
            *state = current;
            changed
        };
        if changed {
            debug!(available = current.available, active = current.active, "Torch state changed");
            self.publish(current);
        }
    }

    fn publish(&self, state: TorchState) {
        let observers: Vec<TorchObserver> = lock(&self.observers)
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        if observers.is_empty() {
            return;
        }
        self.notify_queue.dispatch(move || {
            for observer in &observers {
                observer(state);
            }
        });
    }

    fn set_mode(&self, mode: TorchMode) {
        {
            let mut device = lock(&self.device);
            let Some(device) = device.as_mut() else {
                debug!(?mode, "No torch hardware, ignoring");
                return;
            };
            if !device.supports(mode) {
                debug!(?mode, torch = %device.name(), "Torch mode unsupported, ignoring");
                return;
            }
            if let Err(e) = device.set_mode(mode) {
                warn!(?mode, error = %e, "Failed to switch torch");
            }
        }
        self.refresh();
    }
}

/// Toggles the torch and mirrors its state to observers
#[derive(Clone)]
pub struct TorchController {
    inner: Arc<TorchInner>,
}

impl TorchController {
    /// A controller without hardware; every operation is a no-op until
    /// [`attach`](Self::attach)
    pub fn new(notify_queue: SerialQueue, poll_interval: Duration) -> Self {
        Self {
            inner: Arc::new(TorchInner {
                device: Mutex::new(None),
                state: Mutex::new(TorchState::default()),
                observers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                notify_queue,
                monitor: Mutex::new(None),
                poll_interval,
            }),
        }
    }

    /// Take over a torch device and start polling it
    pub fn attach(&self, device: Option<Box<dyn TorchDevice>>) {
        self.stop_monitor();
        let has_device = device.is_some();
        if let Some(device) = &device {
            info!(torch = %device.name(), "Torch attached");
        }
        *lock(&self.inner.device) = device;
        self.inner.refresh();

        if has_device {
            let weak: Weak<TorchInner> = Arc::downgrade(&self.inner);
            match CaptureLoopController::every(
                threads::TORCH_MONITOR,
                self.inner.poll_interval,
                move || match weak.upgrade() {
                    Some(inner) => {
                        inner.refresh();
                        LoopAction::Continue
                    }
                    None => LoopAction::Stop,
                },
            ) {
                Ok(monitor) => *lock(&self.inner.monitor) = Some(monitor),
                Err(e) => warn!(error = %e, "Failed to start torch monitor"),
            }
        }
    }

    /// Switch the torch off and release it
    pub fn detach(&self) {
        self.stop_monitor();
        if self.state().active {
            self.inner.set_mode(TorchMode::Off);
        }
        *lock(&self.inner.device) = None;
        self.inner.refresh();
    }

    fn stop_monitor(&self) {
        let monitor = lock(&self.inner.monitor).take();
        if let Some(mut monitor) = monitor {
            monitor.stop();
        }
    }

    pub fn has_torch(&self) -> bool {
        lock(&self.inner.device).is_some()
    }

    /// Last observed state
    pub fn state(&self) -> TorchState {
        *lock(&self.inner.state)
    }

    pub fn toggle(&self) {
        let mode = if self.inner.read_hardware().active {
            TorchMode::Off
        } else {
            TorchMode::On
        };
        self.inner.set_mode(mode);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner
            .set_mode(if enabled { TorchMode::On } else { TorchMode::Off });
    }

    /// Poll the hardware now instead of waiting for the monitor
    pub fn refresh(&self) {
        self.inner.refresh();
    }

    /// Register an observer; it receives the current state right away
    pub fn subscribe(&self, observer: TorchObserver) -> ObserverId {
        let id = ObserverId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.inner.observers).push((id, Arc::clone(&observer)));

        let state = self.state();
        self.inner.notify_queue.dispatch(move || observer(state));
        id
    }

    pub fn unsubscribe(&self, id: ObserverId) {
        lock(&self.inner.observers).retain(|(observer_id, _)| *observer_id != id);
    }

    pub fn clear_observers(&self) {
        lock(&self.inner.observers).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::BackendResult;
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc;

    struct FakeTorch {
        lit: Arc<AtomicBool>,
        available: bool,
    }

    impl TorchDevice for FakeTorch {
        fn name(&self) -> &str {
            "fake"
        }

        fn is_available(&self) -> bool {
            self.available
        }

        fn is_active(&self) -> bool {
            self.lit.load(Ordering::SeqCst)
        }

        fn set_mode(&mut self, mode: TorchMode) -> BackendResult<()> {
            self.lit.store(mode == TorchMode::On, Ordering::SeqCst);
            Ok(())
        }
    }

    fn controller() -> TorchController {
        TorchController::new(
            SerialQueue::new("test-torch").unwrap(),
            Duration::from_millis(5),
        )
    }

    #[test]
    fn test_without_hardware_is_noop() {
        let torch = controller();
        torch.toggle();
        torch.set_enabled(true);
        assert!(!torch.has_torch());
        assert_eq!(torch.state(), TorchState::default());
    }

    #[test]
    fn test_toggle_updates_state() {
        let torch = controller();
        let lit = Arc::new(AtomicBool::new(false));
        torch.attach(Some(Box::new(FakeTorch {
            lit: Arc::clone(&lit),
            available: true,
        })));

        torch.toggle();
        assert!(lit.load(Ordering::SeqCst));
        assert!(torch.state().active);

        torch.toggle();
        assert!(!torch.state().active);
        torch.detach();
    }

    #[test]
    fn test_unavailable_torch_ignores_requests() {
        let torch = controller();
        let lit = Arc::new(AtomicBool::new(false));
        torch.attach(Some(Box::new(FakeTorch {
            lit: Arc::clone(&lit),
            available: false,
        })));

        torch.set_enabled(true);
        assert!(!lit.load(Ordering::SeqCst));
        torch.detach();
    }

    #[test]
    fn test_hardware_change_reaches_observer() {
        let torch = controller();
        let lit = Arc::new(AtomicBool::new(false));
        torch.attach(Some(Box::new(FakeTorch {
            lit: Arc::clone(&lit),
            available: true,
        })));

        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        torch.subscribe(Arc::new(move |state| {
            let _ = tx.lock().unwrap().send(state);
        }));
        assert!(!rx.recv_timeout(Duration::from_secs(5)).unwrap().active);

        // Lit behind the controller's back
        lit.store(true, Ordering::SeqCst);
        let state = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(state.active);
        torch.detach();
    }
}
