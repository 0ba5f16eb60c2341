// SPDX-License-Identifier: GPL-3.0-only
//! Thread lifecycle management for capture and polling loops
//!
//! The metadata-delivery thread of a running pipeline and the torch monitor
//! are both long-lived loops that must stop promptly when asked and must be
//! joined before the resources they borrow are released. This module gives
//! them one shape: a named thread plus a shared stop signal.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Granularity of interruptible sleeps
const STOP_POLL_SLICE: Duration = Duration::from_millis(10);

/// Action returned by a periodic loop body to control loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Continue running the loop
    Continue,
    /// Stop the loop gracefully
    Stop,
}

/// Cooperative stop flag handed to the loop body
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Sleep for `duration` unless a stop is requested first
    ///
    /// Returns `false` if the sleep was cut short by a stop request.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_stopped() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(STOP_POLL_SLICE.min(deadline - now));
        }
    }
}

/// Controller for a loop running in a separate named thread
pub struct CaptureLoopController {
    /// Thread handle for joining
    thread_handle: Option<JoinHandle<()>>,
    /// Signal to stop the loop
    stop_signal: StopSignal,
    /// Name for logging
    name: String,
}

impl CaptureLoopController {
    /// Run `body` once on a new thread
    ///
    /// The body owns its loop and is expected to return soon after the
    /// signal reports a stop request.
    pub fn spawn<F>(name: &str, body: F) -> std::io::Result<Self>
    where
        F: FnOnce(StopSignal) + Send + 'static,
    {
        let stop_signal = StopSignal::new();
        let body_signal = stop_signal.clone();
        let thread_name = name.to_string();

        info!(name = %name, "Starting loop thread");

        let thread_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!(name = %thread_name, "Loop thread started");
                body(body_signal);
                info!(name = %thread_name, "Loop thread exiting");
            })?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            name: name.to_string(),
        })
    }

    /// Call `tick` every `interval` until it returns [`LoopAction::Stop`] or
    /// a stop is requested
    pub fn every<F>(name: &str, interval: Duration, mut tick: F) -> std::io::Result<Self>
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        Self::spawn(name, move |signal| {
            while !signal.is_stopped() {
                if tick() == LoopAction::Stop {
                    break;
                }
                if !signal.sleep(interval) {
                    break;
                }
            }
        })
    }

    /// Check if the loop is still running
    ///
    /// A loop that requested its own stop counts as finished even while
    /// its thread is still unwinding.
    pub fn is_running(&self) -> bool {
        !self.stop_signal.is_stopped()
            && self
                .thread_handle
                .as_ref()
                .map(|h| !h.is_finished())
                .unwrap_or(false)
    }

    /// Signal the loop to stop without waiting
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Requesting loop stop");
        self.stop_signal.request_stop();
    }

    /// Stop the loop and wait for the thread to finish
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    fn join(&mut self) {
        let Some(handle) = self.thread_handle.take() else {
            return;
        };
        // A loop that releases its own controller cannot join itself
        if handle.thread().id() == thread::current().id() {
            debug!(name = %self.name, "Loop released from its own thread, detaching");
            return;
        }
        if handle.join().is_err() {
            warn!(name = %self.name, "Loop thread panicked");
        } else {
            debug!(name = %self.name, "Loop thread finished");
        }
    }
}

impl Drop for CaptureLoopController {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_every_stops_itself() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut controller =
            CaptureLoopController::every("test-every", Duration::from_millis(1), move || {
                if counter_clone.fetch_add(1, Ordering::SeqCst) >= 4 {
                    LoopAction::Stop
                } else {
                    LoopAction::Continue
                }
            })
            .unwrap();

        controller.join();
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_stop_interrupts_sleep() {
        let mut controller = CaptureLoopController::spawn("test-sleep", |signal| {
            signal.sleep(Duration::from_secs(60));
        })
        .unwrap();

        let started = Instant::now();
        controller.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!controller.is_running());
    }

    #[test]
    fn test_drop_stops_loop() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = Arc::clone(&ran);
        let controller = CaptureLoopController::spawn("test-drop", move |signal| {
            while !signal.is_stopped() {
                thread::sleep(Duration::from_millis(1));
            }
            ran_clone.store(true, Ordering::SeqCst);
        })
        .unwrap();

        drop(controller);
        assert!(ran.load(Ordering::SeqCst));
    }
}
