// SPDX-License-Identifier: GPL-3.0-only

//! Serial execution contexts
//!
//! A [`SerialQueue`] is a dedicated thread draining a FIFO of closures. The
//! session uses one as its UI-affinity context (all state transitions and host
//! callbacks) and one as the background context for device start/stop, so
//! hardware negotiation never blocks the thread that owns the state.
//!
//! Tasks run one at a time in submission order. A panicking task is logged and
//! the queue keeps running; the panic never reaches the submitter's thread.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// A unit of work submitted to a queue
pub type Task = Box<dyn FnOnce() + Send + 'static>;

struct QueueInner {
    name: String,
    sender: mpsc::UnboundedSender<Task>,
    thread_id: ThreadId,
}

/// Handle to a serial execution context
///
/// Cloning the handle shares the same thread. The thread exits once every
/// handle is dropped and the pending tasks have drained.
#[derive(Clone)]
pub struct SerialQueue {
    inner: Arc<QueueInner>,
}

impl SerialQueue {
    /// Spawn a new queue thread with the given name
    pub fn new(name: &str) -> std::io::Result<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Task>();
        let thread_name = name.to_string();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!(queue = %thread_name, "Serial queue started");
                while let Some(task) = receiver.blocking_recv() {
                    if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(task)) {
                        error!(
                            queue = %thread_name,
                            panic = panic_message(panic.as_ref()),
                            "Task panicked on serial queue"
                        );
                    }
                }
                debug!(queue = %thread_name, "Serial queue finished");
            })?;

        Ok(Self {
            inner: Arc::new(QueueInner {
                name: name.to_string(),
                sender,
                thread_id: handle.thread().id(),
            }),
        })
    }

    /// Queue name, also used as the thread name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Submit a task without waiting for it
    ///
    /// Returns `false` if the queue thread is gone; the task is dropped.
    pub fn dispatch<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.sender.send(Box::new(task)).is_ok()
    }

    /// Whether the caller is running on this queue's thread
    pub fn is_current(&self) -> bool {
        self.inner.thread_id == thread::current().id()
    }

    /// Block until every task submitted before this call has run
    ///
    /// Returns immediately when called from the queue itself.
    pub fn flush(&self) {
        if self.is_current() {
            return;
        }
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        if self.dispatch(move || {
            let _ = done_tx.send(());
        }) {
            let _ = done_rx.recv();
        }
    }
}

impl std::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialQueue")
            .field("name", &self.inner.name)
            .finish()
    }
}

/// Best-effort text of a panic payload for logging
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
