// SPDX-License-Identifier: GPL-3.0-only

//! Single-flight hand-off of detection batches to the main queue
//!
//! The capture loop produces a batch per frame on the metadata-delivery
//! thread. The consumer runs on the main queue and may be slow (a host that
//! shows a dialog for every code). Batches are never queued: while one is
//! being consumed, newer ones are dropped.

use crate::backends::{BatchSink, DetectionBatch};
use crate::queue::{SerialQueue, panic_message};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, trace, warn};

/// Receiver of detection batches on the main queue
pub trait BatchConsumer: Send + Sync {
    fn consume(&self, batch: DetectionBatch);
}

impl<F> BatchConsumer for F
where
    F: Fn(DetectionBatch) + Send + Sync,
{
    fn consume(&self, batch: DetectionBatch) {
        self(batch)
    }
}

/// What happened to a batch offered to the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Handed to the main queue; the consumer will see it unless the
    /// dispatcher shuts down first
    Dispatched,
    /// A previous batch is still in flight
    Dropped,
    /// The dispatcher is shut down
    Discarded,
}

/// Single-permit gate between the delivery thread and the main queue
#[derive(Debug, Default)]
struct InFlightToken(AtomicBool);

impl InFlightToken {
    fn try_acquire(self: &Arc<Self>) -> Option<TokenPermit> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TokenPermit(Arc::clone(self)))
    }

    fn is_held(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Held for as long as a batch is in flight; released on drop, including
/// while unwinding out of a panicking consumer
struct TokenPermit(Arc<InFlightToken>);

impl Drop for TokenPermit {
    fn drop(&mut self) {
        self.0.0.store(false, Ordering::Release);
    }
}

struct DispatcherInner {
    main_queue: SerialQueue,
    token: Arc<InFlightToken>,
    consumer: RwLock<Option<Arc<dyn BatchConsumer>>>,
    shut_down: AtomicBool,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl DispatcherInner {
    /// Runs on the main queue with the permit held
    fn deliver(&self, batch: DetectionBatch) {
        if self.shut_down.load(Ordering::Acquire) {
            debug!(sequence = batch.sequence, "Discarding batch after shutdown");
            return;
        }
        let consumer = self
            .consumer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(consumer) = consumer else {
            trace!(sequence = batch.sequence, "No consumer, discarding batch");
            return;
        };

        let sequence = batch.sequence;
        match panic::catch_unwind(AssertUnwindSafe(|| consumer.consume(batch))) {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                trace!(sequence, "Batch consumed");
            }
            Err(payload) => {
                warn!(
                    sequence,
                    panic = %panic_message(payload.as_ref()),
                    "Detection consumer panicked"
                );
            }
        }
    }
}

/// Forwards at most one batch at a time from the delivery thread to the
/// main queue
#[derive(Clone)]
pub struct DetectionDispatcher {
    inner: Arc<DispatcherInner>,
}

impl DetectionDispatcher {
    pub fn new(main_queue: SerialQueue) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                main_queue,
                token: Arc::new(InFlightToken::default()),
                consumer: RwLock::new(None),
                shut_down: AtomicBool::new(false),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    pub fn with_consumer(main_queue: SerialQueue, consumer: Arc<dyn BatchConsumer>) -> Self {
        let dispatcher = Self::new(main_queue);
        dispatcher.set_consumer(Some(consumer));
        dispatcher
    }

    pub fn set_consumer(&self, consumer: Option<Arc<dyn BatchConsumer>>) {
        *self
            .inner
            .consumer
            .write()
            .unwrap_or_else(PoisonError::into_inner) = consumer;
    }

    /// Offer a batch; never blocks
    ///
    /// Called on the metadata-delivery thread once per capture cycle.
    pub fn on_batch(&self, batch: DetectionBatch) -> BatchOutcome {
        if self.is_shut_down() {
            return BatchOutcome::Discarded;
        }

        let Some(permit) = self.inner.token.try_acquire() else {
            let dropped = self.inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            trace!(sequence = batch.sequence, dropped, "Batch in flight, dropping");
            return BatchOutcome::Dropped;
        };

        let inner = Arc::clone(&self.inner);
        let queued = self.inner.main_queue.dispatch(move || {
            let _permit = permit;
            inner.deliver(batch);
        });
        if queued {
            BatchOutcome::Dispatched
        } else {
            // The task (and its permit) was dropped with the closed queue
            debug!("Main queue closed, discarding batch");
            BatchOutcome::Discarded
        }
    }

    /// Stop delivering; takes effect for batches not yet handed to the
    /// consumer, even if already queued
    pub fn shutdown(&self) {
        if !self.inner.shut_down.swap(true, Ordering::AcqRel) {
            debug!(
                delivered = self.delivered_count(),
                dropped = self.dropped_count(),
                "Detection dispatcher shut down"
            );
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    /// Whether a batch is queued or being consumed right now
    pub fn is_in_flight(&self) -> bool {
        self.inner.token.is_held()
    }

    pub fn delivered_count(&self) -> u64 {
        self.inner.delivered.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

impl BatchSink for DetectionDispatcher {
    fn on_batch(&self, batch: DetectionBatch) {
        DetectionDispatcher::on_batch(self, batch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permit_is_exclusive_and_released_on_drop() {
        let token = Arc::new(InFlightToken::default());
        let permit = token.try_acquire().unwrap();
        assert!(token.try_acquire().is_none());
        assert!(token.is_held());
        drop(permit);
        assert!(!token.is_held());
        assert!(token.try_acquire().is_some());
    }

    #[test]
    fn test_permit_released_during_unwind() {
        let token = Arc::new(InFlightToken::default());
        let inner = Arc::clone(&token);
        let result = panic::catch_unwind(AssertUnwindSafe(move || {
            let _permit = inner.try_acquire().unwrap();
            panic!("consumer failed");
        }));
        assert!(result.is_err());
        assert!(!token.is_held());
    }

    #[test]
    fn test_shutdown_discards() {
        let queue = SerialQueue::new("test-dispatch").unwrap();
        let dispatcher = DetectionDispatcher::new(queue);
        dispatcher.shutdown();
        assert_eq!(
            dispatcher.on_batch(DetectionBatch::new(1, Vec::new())),
            BatchOutcome::Discarded
        );
        assert!(!dispatcher.is_in_flight());
    }
}
