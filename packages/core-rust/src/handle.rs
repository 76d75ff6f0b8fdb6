//! Single-assignment result container shared between producers and callers.
//!
//! A [`ResultHandle`] is completed exactly once, by [`set_result`] or
//! [`set_failure`]. Callers may wait for it asynchronously or from a plain
//! thread, poll it without blocking, or register listeners that run once the
//! outcome is known.
//!
//! Listeners never run while the handle's lock is held, so a listener may
//! freely register further listeners, complete other handles, or read this one.
//!
//! [`set_result`]: ResultHandle::set_result
//! [`set_failure`]: ResultHandle::set_failure

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

use crate::error::{DoubleCompletionError, OperationError};

type Listener<T, Q> = Box<dyn FnOnce(&ResultHandle<T, Q>) + Send>;

struct Completion<T, Q> {
    outcome: Option<Result<T, OperationError>>,
    listeners: Vec<Listener<T, Q>>,
}

struct Inner<T, Q> {
    query_info: Q,
    completion: Mutex<Completion<T, Q>>,
    // Wakes threads parked in `wait_blocking*`.
    parked: Condvar,
    // Wakes tasks suspended in `wait*`.
    notify: Notify,
}

/// Observable outcome of one operation (or of one batch of operations).
///
/// `T` is the domain result, `Q` the query info identifying what the result
/// was computed for. Cloning is cheap and every clone observes the same
/// completion.
pub struct ResultHandle<T, Q> {
    inner: Arc<Inner<T, Q>>,
}

impl<T, Q> Clone for ResultHandle<T, Q> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, Q: fmt::Debug> fmt::Debug for ResultHandle<T, Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultHandle")
            .field("query_info", &self.inner.query_info)
            .field("done", &self.is_done())
            .field("success", &self.is_success())
            .finish()
    }
}

impl<T, Q> ResultHandle<T, Q> {
    /// Creates a pending handle for `query_info`.
    #[must_use]
    pub fn new(query_info: Q) -> Self {
        Self {
            inner: Arc::new(Inner {
                query_info,
                completion: Mutex::new(Completion {
                    outcome: None,
                    listeners: Vec::new(),
                }),
                parked: Condvar::new(),
                notify: Notify::new(),
            }),
        }
    }

    /// Identity of what this handle's result is computed for.
    pub fn query_info(&self) -> &Q {
        &self.inner.query_info
    }

    pub fn is_done(&self) -> bool {
        self.inner.completion.lock().outcome.is_some()
    }

    /// `true` once completed with a result; `false` while pending or on failure.
    pub fn is_success(&self) -> bool {
        matches!(self.inner.completion.lock().outcome, Some(Ok(_)))
    }

    /// Failure cause, if the handle completed with one.
    pub fn cause(&self) -> Option<OperationError> {
        match &self.inner.completion.lock().outcome {
            Some(Err(cause)) => Some(cause.clone()),
            _ => None,
        }
    }

    /// In-flight work cannot be cancelled; always returns `false`.
    pub fn cancel(&self) -> bool {
        false
    }

    pub fn is_cancelled(&self) -> bool {
        false
    }

    /// Returns `true` if `self` and `other` observe the same completion.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Registers `listener` to run exactly once after completion.
    ///
    /// If the handle is already complete the listener runs immediately on the
    /// calling thread; otherwise it runs on whichever thread completes the
    /// handle.
    pub fn add_listener<F>(&self, listener: F)
    where
        F: FnOnce(&ResultHandle<T, Q>) + Send + 'static,
    {
        {
            let mut completion = self.inner.completion.lock();
            if completion.outcome.is_none() {
                completion.listeners.push(Box::new(listener));
                return;
            }
        }
        listener(self);
    }

    /// Completes the handle with a result.
    ///
    /// # Panics
    ///
    /// Panics if the handle was already completed.
    #[track_caller]
    pub fn set_result(&self, value: T) {
        if let Err(err) = self.complete(Ok(value)) {
            panic!("{err}");
        }
    }

    /// Completes the handle with a failure.
    ///
    /// # Panics
    ///
    /// Panics if the handle was already completed.
    #[track_caller]
    pub fn set_failure(&self, cause: OperationError) {
        if let Err(err) = self.complete(Err(cause)) {
            panic!("{err}");
        }
    }

    /// Completes with either side of `outcome`.
    ///
    /// # Panics
    ///
    /// Panics if the handle was already completed.
    #[track_caller]
    pub fn set_outcome(&self, outcome: Result<T, OperationError>) {
        if let Err(err) = self.complete(outcome) {
            panic!("{err}");
        }
    }

    /// # Errors
    ///
    /// Returns `DoubleCompletionError` if the handle was already completed;
    /// the stored outcome is left untouched.
    pub fn try_set_result(&self, value: T) -> Result<(), DoubleCompletionError> {
        self.complete(Ok(value))
    }

    /// # Errors
    ///
    /// Returns `DoubleCompletionError` if the handle was already completed;
    /// the stored outcome is left untouched.
    pub fn try_set_failure(&self, cause: OperationError) -> Result<(), DoubleCompletionError> {
        self.complete(Err(cause))
    }

    fn complete(&self, outcome: Result<T, OperationError>) -> Result<(), DoubleCompletionError> {
        let listeners = {
            let mut completion = self.inner.completion.lock();
            if completion.outcome.is_some() {
                return Err(DoubleCompletionError);
            }
            completion.outcome = Some(outcome);
            std::mem::take(&mut completion.listeners)
        };

        self.inner.parked.notify_all();
        self.inner.notify.notify_waiters();

        for listener in listeners {
            listener(self);
        }
        Ok(())
    }
}

impl<T: Clone, Q> ResultHandle<T, Q> {
    /// Returns the outcome if complete, `None` otherwise. Never blocks.
    pub fn poll(&self) -> Option<Result<T, OperationError>> {
        self.inner.completion.lock().outcome.clone()
    }

    /// Suspends the calling task until the handle completes.
    ///
    /// # Errors
    ///
    /// Returns the failure cause if the handle completed with one.
    pub async fn wait(&self) -> Result<T, OperationError> {
        loop {
            // Registered before the check so a completion in between is not missed.
            let notified = self.inner.notify.notified();
            if let Some(outcome) = self.poll() {
                return outcome;
            }
            notified.await;
        }
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`.
    ///
    /// Returns `None` if the handle did not complete in time.
    pub async fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, OperationError>> {
        tokio::time::timeout(timeout, self.wait()).await.ok()
    }

    /// Parks the calling thread until the handle completes.
    ///
    /// Must not be called from within an async task.
    ///
    /// # Errors
    ///
    /// Returns the failure cause if the handle completed with one.
    pub fn wait_blocking(&self) -> Result<T, OperationError> {
        let mut completion = self.inner.completion.lock();
        loop {
            if let Some(outcome) = &completion.outcome {
                return outcome.clone();
            }
            self.inner.parked.wait(&mut completion);
        }
    }

    /// Like [`wait_blocking`](Self::wait_blocking), giving up after `timeout`.
    ///
    /// Returns `None` if the handle did not complete in time.
    pub fn wait_blocking_timeout(&self, timeout: Duration) -> Option<Result<T, OperationError>> {
        let mut completion = self.inner.completion.lock();
        self.inner
            .parked
            .wait_while_for(&mut completion, |c| c.outcome.is_none(), timeout);
        completion.outcome.clone()
    }
}

impl<T, Q> ResultHandle<T, Q>
where
    T: Clone + Send + 'static,
    Q: Clone + Send + Sync + 'static,
{
    /// Derives a handle completed from this one once it completes.
    ///
    /// A failure passes through unchanged; a result is transformed by `f`,
    /// which may itself fail. The derived handle shares this handle's query info.
    pub fn map<U, F>(&self, f: F) -> ResultHandle<U, Q>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Result<U, OperationError> + Send + 'static,
    {
        let mapped = ResultHandle::new(self.query_info().clone());
        let target = mapped.clone();
        self.add_listener(move |source| {
            if let Some(outcome) = source.poll() {
                target.set_outcome(outcome.and_then(f));
            }
        });
        mapped
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;

    use super::*;

    fn handle() -> ResultHandle<u32, &'static str> {
        ResultHandle::new("key")
    }

    #[test]
    fn poll_reports_not_ready_then_result() {
        let h = handle();
        assert!(h.poll().is_none());
        assert!(!h.is_done());
        assert!(!h.is_success());

        h.set_result(7);
        assert_eq!(h.poll(), Some(Ok(7)));
        assert!(h.is_done());
        assert!(h.is_success());
        assert!(h.cause().is_none());
        assert_eq!(*h.query_info(), "key");
    }

    #[test]
    fn failure_is_exposed_as_cause() {
        let h = handle();
        let cause = OperationError::Transport {
            reason: "connection reset".into(),
        };
        h.set_failure(cause.clone());
        assert!(h.is_done());
        assert!(!h.is_success());
        assert_eq!(h.cause(), Some(cause.clone()));
        assert_eq!(h.poll(), Some(Err(cause)));
    }

    #[test]
    fn second_completion_is_detected() {
        let h = handle();
        h.try_set_result(1).unwrap();
        assert_eq!(h.try_set_result(2), Err(DoubleCompletionError));
        assert_eq!(
            h.try_set_failure(OperationError::Server {
                message: "late".into()
            }),
            Err(DoubleCompletionError)
        );
        assert_eq!(h.poll(), Some(Ok(1)));
    }

    #[test]
    #[should_panic(expected = "result handle completed twice")]
    fn set_result_twice_panics() {
        let h = handle();
        h.set_result(1);
        h.set_result(2);
    }

    #[test]
    #[should_panic(expected = "result handle completed twice")]
    fn set_failure_after_result_panics() {
        let h = handle();
        h.set_result(1);
        h.set_failure(OperationError::Server {
            message: "late".into(),
        });
    }

    #[test]
    fn listeners_fire_once_before_and_after_completion() {
        let h = handle();
        let fired = Arc::new(AtomicU32::new(0));

        let early = Arc::clone(&fired);
        h.add_listener(move |done| {
            assert!(done.is_done());
            early.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        h.set_result(3);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        let late = Arc::clone(&fired);
        h.add_listener(move |done| {
            assert_eq!(done.poll(), Some(Ok(3)));
            late.fetch_add(10, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 11);

        // A rejected second completion must not re-fire anything.
        assert!(h.try_set_result(4).is_err());
        assert_eq!(fired.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn listener_can_register_listeners_reentrantly() {
        let h = handle();
        let fired = Arc::new(AtomicU32::new(0));

        let outer = Arc::clone(&fired);
        h.add_listener(move |done| {
            let inner = Arc::clone(&outer);
            done.add_listener(move |_| {
                inner.fetch_add(1, Ordering::SeqCst);
            });
            outer.fetch_add(1, Ordering::SeqCst);
        });

        h.set_result(0);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cancel_is_a_no_op() {
        let h = handle();
        assert!(!h.cancel());
        assert!(!h.is_cancelled());
        assert!(!h.is_done());
    }

    #[test]
    fn blocking_wait_is_woken_by_another_thread() {
        let h = handle();
        let producer = h.clone();
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.set_result(42);
        });

        assert_eq!(h.wait_blocking(), Ok(42));
        worker.join().unwrap();
    }

    #[test]
    fn blocking_wait_timeout_returns_none() {
        let h = handle();
        assert!(h.wait_blocking_timeout(Duration::from_millis(10)).is_none());
        h.set_result(1);
        assert_eq!(h.wait_blocking_timeout(Duration::from_millis(10)), Some(Ok(1)));
    }

    #[tokio::test]
    async fn async_wait_completes_from_spawned_task() {
        let h = handle();
        let producer = h.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.set_result(5);
        });

        assert_eq!(h.wait().await, Ok(5));
        // Waiting again does not consume the result.
        assert_eq!(h.wait().await, Ok(5));
    }

    #[tokio::test]
    async fn async_wait_timeout_is_not_ready() {
        let h = handle();
        assert!(h.wait_timeout(Duration::from_millis(10)).await.is_none());
        assert!(!h.is_done());
    }

    #[tokio::test]
    async fn map_transforms_result_and_passes_failures() {
        let h = handle();
        let doubled = h.map(|v| Ok(v * 2));
        assert_eq!(*doubled.query_info(), "key");
        h.set_result(21);
        assert_eq!(doubled.wait().await, Ok(42));

        let failing = handle();
        let mapped = failing.map(|v| Ok(v + 1));
        failing.set_failure(OperationError::Server {
            message: "nope".into(),
        });
        assert!(matches!(
            mapped.wait().await,
            Err(OperationError::Server { .. })
        ));

        let source = handle();
        let rejected: ResultHandle<u32, _> = source.map(|_| {
            Err(OperationError::Decode {
                code: 10,
                reason: "bad".into(),
            })
        });
        source.set_result(1);
        assert!(rejected.cause().is_some());
    }

    #[test]
    fn clones_observe_the_same_completion() {
        let h = handle();
        let other = h.clone();
        assert!(h.ptr_eq(&other));
        other.set_result(9);
        assert_eq!(h.poll(), Some(Ok(9)));
        assert!(!h.ptr_eq(&handle()));
    }
}
