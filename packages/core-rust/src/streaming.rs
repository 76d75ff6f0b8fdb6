//! Operations that publish partial results while replies are still arriving.
//!
//! A [`StreamingOperation`] behaves like an [`Operation`] and additionally
//! converts every reply into items pushed onto a bounded queue. The queue is
//! drained by one [`ChunkIterator`], obtained once from the operation's
//! [`StreamingHandle`]. When the operation completes the queue is closed and
//! the iterator ends after yielding what was already queued.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{select, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::debug;

use crate::config::StreamConfig;
use crate::error::{ConfigError, OperationError, StreamError};
use crate::handle::ResultHandle;
use crate::message::RawMessage;
use crate::operation::{Accepted, Exchange, Operation, OperationKind, OperationState};

/// An [`OperationKind`] whose replies also yield items for incremental consumption.
pub trait StreamingKind: OperationKind {
    type Item: Send + 'static;

    /// Items carried by one reply, in the order they should be consumed.
    fn process_chunk(&self, response: &Self::Response) -> Vec<Self::Item>;
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// StreamingOperation
// ---------------------------------------------------------------------------

/// Operation that streams converted items to a consumer before it completes.
pub struct StreamingOperation<K: StreamingKind> {
    operation: Operation<K>,
    sender: Mutex<Option<Sender<K::Item>>>,
    // Never carries a message; dropping the sender wakes a blocked producer.
    closing: Mutex<Option<Sender<()>>>,
    closed: Receiver<()>,
    results: Mutex<Option<StreamingHandle<K>>>,
    poll_timeout: Duration,
}

impl<K: StreamingKind> StreamingOperation<K> {
    /// # Errors
    ///
    /// Returns `ConfigError` if `config` has a zero poll timeout or capacity.
    pub fn new(kind: K, config: &StreamConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let operation = Operation::new(kind);
        let (sender, receiver) = crossbeam_channel::bounded(config.queue_capacity);
        let (closing, closed) = crossbeam_channel::bounded(0);
        let results = StreamingHandle {
            handle: operation.handle(),
            receiver: Arc::new(Mutex::new(Some(receiver))),
            poll_timeout: config.poll_timeout,
        };
        Ok(Self {
            operation,
            sender: Mutex::new(Some(sender)),
            closing: Mutex::new(Some(closing)),
            closed,
            results: Mutex::new(Some(results)),
            poll_timeout: config.poll_timeout,
        })
    }

    /// Takes the consumer side of this operation. Returns `None` on later calls.
    pub fn take_results(&self) -> Option<StreamingHandle<K>> {
        self.results.lock().take()
    }

    pub fn handle(&self) -> ResultHandle<K::Output, K::Query> {
        self.operation.handle()
    }

    pub fn state(&self) -> OperationState {
        self.operation.state()
    }

    fn enqueue(&self, response: &K::Response) -> Result<(), OperationError> {
        let items = self.operation.kind().process_chunk(response);
        if items.is_empty() {
            return Ok(());
        }

        // Clone out so a full queue never blocks `close_queue`.
        let Some(sender) = self.sender.lock().clone() else {
            return Ok(());
        };
        for item in items {
            select! {
                send(sender, item) -> sent => {
                    if sent.is_err() {
                        debug!("streaming consumer went away; discarding items");
                        return Ok(());
                    }
                }
                recv(self.closed) -> _ => {
                    debug!("operation completed while enqueueing; discarding items");
                    return Ok(());
                }
                default(self.poll_timeout) => {
                    return Err(OperationError::ConsumerStalled {
                        timeout_ms: millis(self.poll_timeout),
                    });
                }
            }
        }
        Ok(())
    }

    fn close_queue(&self) {
        self.sender.lock().take();
        self.closing.lock().take();
    }
}

impl<K: StreamingKind> Exchange for StreamingOperation<K> {
    fn request_message(&self) -> RawMessage {
        self.operation.request_message()
    }

    fn expected_response_code(&self) -> u8 {
        self.operation.expected_response_code()
    }

    fn on_submitted(&self) {
        self.operation.on_submitted();
    }

    fn on_raw_message(&self, message: RawMessage) -> bool {
        let accepted = self
            .operation
            .accept(message, |response| self.enqueue(response));
        // Only the call that completed the handle closes the queue, so the
        // iterator never sees the end of a stream whose outcome is unset.
        if accepted == Accepted::Completed {
            self.close_queue();
        }
        accepted.is_finished()
    }

    fn fail(&self, cause: OperationError) {
        if self.operation.fail_with(cause) {
            self.close_queue();
        }
    }

    fn is_done(&self) -> bool {
        self.operation.is_done()
    }
}

// ---------------------------------------------------------------------------
// StreamingHandle
// ---------------------------------------------------------------------------

/// Consumer side of a streaming operation: the final result plus a
/// single-use iterator over partial results.
pub struct StreamingHandle<K: StreamingKind> {
    handle: ResultHandle<K::Output, K::Query>,
    receiver: Arc<Mutex<Option<Receiver<K::Item>>>>,
    poll_timeout: Duration,
}

impl<K: StreamingKind> Clone for StreamingHandle<K> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            receiver: Arc::clone(&self.receiver),
            poll_timeout: self.poll_timeout,
        }
    }
}

impl<K: StreamingKind> StreamingHandle<K> {
    /// Handle for the aggregated final result.
    pub fn handle(&self) -> &ResultHandle<K::Output, K::Query> {
        &self.handle
    }

    /// Returns the iterator over partial results.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::AlreadyConsumed` if the iterator was already
    /// taken from this handle or one of its clones.
    pub fn iter(&self) -> Result<ChunkIterator<K>, StreamError> {
        let receiver = self
            .receiver
            .lock()
            .take()
            .ok_or(StreamError::AlreadyConsumed)?;
        Ok(ChunkIterator {
            receiver,
            handle: self.handle.clone(),
            poll_timeout: self.poll_timeout,
            peeked: None,
            failure_reported: false,
        })
    }
}

// ---------------------------------------------------------------------------
// ChunkIterator
// ---------------------------------------------------------------------------

/// Single-pass blocking iterator over a streaming operation's items.
///
/// Blocks the calling thread; run it on a plain thread or via
/// `tokio::task::spawn_blocking`.
pub struct ChunkIterator<K: StreamingKind> {
    receiver: Receiver<K::Item>,
    handle: ResultHandle<K::Output, K::Query>,
    poll_timeout: Duration,
    peeked: Option<K::Item>,
    failure_reported: bool,
}

impl<K: StreamingKind> ChunkIterator<K> {
    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    pub fn set_poll_timeout(&mut self, timeout: Duration) {
        self.poll_timeout = timeout;
    }

    /// Waits until an item is available (`Ok(true)`) or the stream ended
    /// after a successful operation (`Ok(false)`).
    ///
    /// # Errors
    ///
    /// - `StreamError::PollTimeout` if nothing arrived within the poll timeout;
    ///   the call may be retried.
    /// - `StreamError::Failed` once, after the queue is drained, if the
    ///   operation failed or was dropped before completing.
    pub fn has_next(&mut self) -> Result<bool, StreamError> {
        if self.peeked.is_some() {
            return Ok(true);
        }
        match self.receiver.recv_timeout(self.poll_timeout) {
            Ok(item) => {
                self.peeked = Some(item);
                Ok(true)
            }
            Err(RecvTimeoutError::Timeout) => Err(StreamError::PollTimeout {
                timeout_ms: millis(self.poll_timeout),
            }),
            Err(RecvTimeoutError::Disconnected) => self.end_of_stream(),
        }
    }

    /// Takes the item made available by the last `has_next()`.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::NoItemReady` if `has_next()` did not return `Ok(true)`.
    pub fn next_item(&mut self) -> Result<K::Item, StreamError> {
        self.peeked.take().ok_or(StreamError::NoItemReady)
    }

    fn end_of_stream(&mut self) -> Result<bool, StreamError> {
        if self.failure_reported {
            return Ok(false);
        }
        let cause = if self.handle.is_done() {
            self.handle.cause()
        } else {
            Some(OperationError::Transport {
                reason: "operation dropped before completion".into(),
            })
        };
        match cause {
            Some(cause) => {
                self.failure_reported = true;
                Err(StreamError::Failed(cause))
            }
            None => Ok(false),
        }
    }
}

impl<K: StreamingKind> Iterator for ChunkIterator<K> {
    type Item = Result<K::Item, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.has_next() {
            Ok(true) => self.peeked.take().map(Ok),
            Ok(false) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
