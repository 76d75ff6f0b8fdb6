//! Structured batch events.
//!
//! The fan-out coordinator reports its progress to a [`BatchObserver`] passed
//! in at construction rather than logging on its own. [`TracingObserver`]
//! turns the events into `tracing` records; [`CompositeObserver`] fans them out
//! to several observers.

use std::sync::Arc;

use kvdriver_core::OperationError;
use tracing::{debug, warn};

/// Receives lifecycle events of fan-out batches.
///
/// Callbacks run on the dispatching task or on whichever transport thread
/// completed an item, possibly concurrently; implementations must be cheap and
/// must not block.
///
/// Used as `Arc<dyn BatchObserver>`.
pub trait BatchObserver: Send + Sync {
    /// A batch of `total` operations was accepted.
    fn on_batch_started(&self, _batch_id: u64, _total: usize, _max_in_flight: usize) {}

    /// The item at input position `index` was submitted to the transport.
    /// `in_flight` counts it.
    fn on_dispatch(&self, _batch_id: u64, _index: usize, _in_flight: usize) {}

    /// The item at input position `index` completed. `cause` is set if it failed.
    fn on_item_complete(&self, _batch_id: u64, _index: usize, _cause: Option<&OperationError>) {}

    /// Every item reported in; the aggregate completed with `collected` entries.
    fn on_batch_complete(&self, _batch_id: u64, _collected: usize) {}

    /// Dispatching stopped early; the aggregate failed.
    fn on_interrupted(&self, _batch_id: u64, _dispatched: usize, _total: usize) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl BatchObserver for NoopObserver {}

/// Emits every batch event as a `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl BatchObserver for TracingObserver {
    fn on_batch_started(&self, batch_id: u64, total: usize, max_in_flight: usize) {
        debug!(batch_id, total, max_in_flight, "batch started");
    }

    fn on_dispatch(&self, batch_id: u64, index: usize, in_flight: usize) {
        debug!(batch_id, index, in_flight, "operation dispatched");
    }

    fn on_item_complete(&self, batch_id: u64, index: usize, cause: Option<&OperationError>) {
        match cause {
            None => debug!(batch_id, index, "operation succeeded"),
            Some(cause) => debug!(batch_id, index, %cause, "operation failed"),
        }
    }

    fn on_batch_complete(&self, batch_id: u64, collected: usize) {
        debug!(batch_id, collected, "batch complete");
    }

    fn on_interrupted(&self, batch_id: u64, dispatched: usize, total: usize) {
        warn!(batch_id, dispatched, total, "batch dispatch interrupted");
    }
}

/// Forwards every event to each registered observer, in registration order.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn BatchObserver>>,
}

impl CompositeObserver {
    #[must_use]
    pub fn new(observers: Vec<Arc<dyn BatchObserver>>) -> Self {
        Self { observers }
    }

    pub fn add(&mut self, observer: Arc<dyn BatchObserver>) {
        self.observers.push(observer);
    }
}

impl BatchObserver for CompositeObserver {
    fn on_batch_started(&self, batch_id: u64, total: usize, max_in_flight: usize) {
        for observer in &self.observers {
            observer.on_batch_started(batch_id, total, max_in_flight);
        }
    }

    fn on_dispatch(&self, batch_id: u64, index: usize, in_flight: usize) {
        for observer in &self.observers {
            observer.on_dispatch(batch_id, index, in_flight);
        }
    }

    fn on_item_complete(&self, batch_id: u64, index: usize, cause: Option<&OperationError>) {
        for observer in &self.observers {
            observer.on_item_complete(batch_id, index, cause);
        }
    }

    fn on_batch_complete(&self, batch_id: u64, collected: usize) {
        for observer in &self.observers {
            observer.on_batch_complete(batch_id, collected);
        }
    }

    fn on_interrupted(&self, batch_id: u64, dispatched: usize, total: usize) {
        for observer in &self.observers {
            observer.on_interrupted(batch_id, dispatched, total);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
