//! Bounded-concurrency fan-out of independent operations.
//!
//! [`FanOutCoordinator::execute`] turns an ordered list of commands into one
//! aggregate [`ResultHandle`]. A single scheduling task submits the commands in
//! input order, never letting more than `max_in_flight` of them be outstanding
//! at once. Each item handle is appended to the aggregate's result as it
//! completes, so the aggregate value is in completion order while its query
//! info keeps the input order.
//!
//! A failing item never fails the aggregate; its handle simply carries the
//! cause. The aggregate fails only when dispatching is interrupted.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use kvdriver_core::{ConfigError, OperationError, OperationKind, ResultHandle};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::command::Command;
use crate::config::FanOutConfig;
use crate::observer::{BatchObserver, TracingObserver};
use crate::transport::{execute, Transport};

/// Handle of one item in a batch.
pub type ItemHandle<K> = ResultHandle<<K as OperationKind>::Output, <K as OperationKind>::Query>;

/// Aggregate handle of a batch: completion-ordered item handles, keyed by the
/// input-ordered query infos.
pub type BatchHandle<K> = ResultHandle<Vec<ItemHandle<K>>, Vec<<K as OperationKind>::Query>>;

// ---------------------------------------------------------------------------
// Batch state
// ---------------------------------------------------------------------------

/// State shared between the scheduling task and the item listeners.
struct Batch<K: OperationKind> {
    id: u64,
    total: usize,
    aggregate: BatchHandle<K>,
    collected: Mutex<Vec<ItemHandle<K>>>,
    remaining: AtomicUsize,
    interrupted: AtomicBool,
    observer: Arc<dyn BatchObserver>,
}

impl<K: OperationKind> Batch<K> {
    /// Listener body for the item at `index`. Consumes the item's permit.
    fn item_done(&self, index: usize, item: &ItemHandle<K>, permit: OwnedSemaphorePermit) {
        self.observer
            .on_item_complete(self.id, index, item.cause().as_ref());

        // After an interruption in-flight items still finish, uncollected.
        if !self.interrupted.load(Ordering::Acquire) {
            self.collected.lock().push(item.clone());
        }
        drop(permit);

        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            let collected = std::mem::take(&mut *self.collected.lock());
            let count = collected.len();
            if self.aggregate.try_set_result(collected).is_ok() {
                self.observer.on_batch_complete(self.id, count);
            }
        }
    }

    fn interrupt(&self, dispatched: usize) {
        self.interrupted.store(true, Ordering::Release);
        let cause = OperationError::DispatchInterrupted {
            dispatched,
            total: self.total,
        };
        if self.aggregate.try_set_failure(cause).is_ok() {
            self.collected.lock().clear();
            self.observer.on_interrupted(self.id, dispatched, self.total);
        }
    }
}

/// Fails the batch if the scheduling task is dropped before it finished
/// dispatching, e.g. when the runtime shuts down.
struct DispatchGuard<K: OperationKind> {
    batch: Arc<Batch<K>>,
    dispatched: usize,
    armed: bool,
}

impl<K: OperationKind> DispatchGuard<K> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<K: OperationKind> Drop for DispatchGuard<K> {
    fn drop(&mut self) {
        if self.armed {
            self.batch.interrupt(self.dispatched);
        }
    }
}

// ---------------------------------------------------------------------------
// FanOutCoordinator
// ---------------------------------------------------------------------------

/// Dispatches batches of commands to a [`Transport`] with bounded concurrency.
///
/// Every batch gets its own permit pool; the limit is per batch, not per
/// coordinator. Scheduling tasks run on the runtime captured at construction,
/// so batches may be executed from threads outside that runtime.
pub struct FanOutCoordinator<T: Transport> {
    transport: Arc<T>,
    config: FanOutConfig,
    runtime: Option<Handle>,
    observer: Arc<dyn BatchObserver>,
    interrupt: CancellationToken,
    next_batch_id: AtomicU64,
}

impl<T: Transport> FanOutCoordinator<T> {
    /// Creates a coordinator reporting batch events through [`TracingObserver`].
    ///
    /// Captures the current tokio runtime, if any; see [`Self::with_runtime`].
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Zero` if `config.max_in_flight` is zero.
    pub fn new(transport: Arc<T>, config: FanOutConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            transport,
            config,
            runtime: Handle::try_current().ok(),
            observer: Arc::new(TracingObserver),
            interrupt: CancellationToken::new(),
            next_batch_id: AtomicU64::new(1),
        })
    }

    /// Replaces the batch observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn BatchObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Runs scheduling tasks on `runtime` instead of the one captured by
    /// [`Self::new`].
    #[must_use]
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn config(&self) -> &FanOutConfig {
        &self.config
    }

    /// Stops dispatching for every running and future batch of this coordinator.
    ///
    /// Batches still dispatching fail with `DispatchInterrupted`; their
    /// already-submitted operations run to completion but are not collected.
    pub fn interrupt(&self) {
        self.interrupt.cancel();
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_cancelled()
    }

    /// Dispatches `commands` with the configured `max_in_flight`.
    ///
    /// Without a captured runtime and outside of one, a non-empty batch fails
    /// with `DispatchInterrupted` before anything is submitted.
    pub fn execute<C>(&self, commands: Vec<C>) -> BatchHandle<C::Kind>
    where
        C: Command + Send + 'static,
    {
        self.dispatch(commands, self.config.max_in_flight)
    }

    /// Dispatches `commands` with an explicit limit for this batch.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Zero` if `max_in_flight` is zero.
    pub fn execute_with_limit<C>(
        &self,
        commands: Vec<C>,
        max_in_flight: usize,
    ) -> Result<BatchHandle<C::Kind>, ConfigError>
    where
        C: Command + Send + 'static,
    {
        FanOutConfig { max_in_flight }.validate()?;
        Ok(self.dispatch(commands, max_in_flight))
    }

    fn dispatch<C>(&self, commands: Vec<C>, max_in_flight: usize) -> BatchHandle<C::Kind>
    where
        C: Command + Send + 'static,
    {
        let id = self.next_batch_id.fetch_add(1, Ordering::Relaxed);
        let total = commands.len();
        let queries: Vec<_> = commands.iter().map(Command::query_info).collect();
        let aggregate = ResultHandle::new(queries);

        self.observer.on_batch_started(id, total, max_in_flight);

        if total == 0 {
            aggregate.set_result(Vec::new());
            self.observer.on_batch_complete(id, 0);
            return aggregate;
        }

        let batch = Arc::new(Batch {
            id,
            total,
            aggregate: aggregate.clone(),
            collected: Mutex::new(Vec::with_capacity(total)),
            remaining: AtomicUsize::new(total),
            interrupted: AtomicBool::new(false),
            observer: Arc::clone(&self.observer),
        });

        // Built outside the task so that a task dropped before its first poll
        // still fails the batch.
        let guard = DispatchGuard {
            batch,
            dispatched: 0,
            armed: true,
        };

        let Some(runtime) = self.runtime.clone().or_else(|| Handle::try_current().ok()) else {
            warn!(batch_id = id, total, "no tokio runtime to dispatch on");
            return aggregate;
        };
        runtime.spawn(run_batch(
            Arc::clone(&self.transport),
            guard,
            commands,
            max_in_flight,
            self.interrupt.clone(),
        ));

        aggregate
    }
}

/// Scheduling task of one batch.
async fn run_batch<T, C>(
    transport: Arc<T>,
    mut guard: DispatchGuard<C::Kind>,
    commands: Vec<C>,
    max_in_flight: usize,
    interrupt: CancellationToken,
) where
    T: Transport,
    C: Command,
{
    let batch = Arc::clone(&guard.batch);
    let permits = Arc::new(Semaphore::new(max_in_flight));

    for (index, command) in commands.into_iter().enumerate() {
        let permit = tokio::select! {
            biased;
            () = interrupt.cancelled() => None,
            permit = Arc::clone(&permits).acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else {
            guard.disarm();
            batch.interrupt(guard.dispatched);
            return;
        };

        let item = match command.into_operation() {
            Ok(operation) => {
                let in_flight = max_in_flight - permits.available_permits();
                batch.observer.on_dispatch(batch.id, index, in_flight);
                execute(transport.as_ref(), operation)
            }
            Err(cause) => {
                let failed = ResultHandle::new(batch.aggregate.query_info()[index].clone());
                failed.set_failure(cause);
                failed
            }
        };
        guard.dispatched += 1;

        let listener_batch = Arc::clone(&batch);
        item.add_listener(move |done| listener_batch.item_done(index, done, permit));
    }

    guard.disarm();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
