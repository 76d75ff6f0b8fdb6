//! Single-request operation lifecycle.
//!
//! An [`Operation`] pairs an [`OperationKind`] (what to send, how to read the
//! replies) with the [`ResultHandle`] its caller observes. The transport drives
//! it through the object-safe [`Exchange`] view:
//!
//! 1. `request_message()` produces the payload to send.
//! 2. `on_raw_message()` is called for every reply, in arrival order, and
//!    reports whether the operation is now finished.
//! 3. `fail()` records a transport-level failure.
//!
//! The `Done` transition inside this module is the only place an operation's
//! handle is completed.

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::OperationError;
use crate::handle::ResultHandle;
use crate::message::RawMessage;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// How an operation finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// Lifecycle of an operation.
///
/// `Pending -> Submitted -> (AwaitingMore)* -> Done`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// Built, not yet handed to a transport.
    Pending,
    /// Handed to a transport, no reply yet.
    Submitted,
    /// At least one non-final reply received.
    AwaitingMore,
    Done(Outcome),
}

impl OperationState {
    #[must_use]
    pub fn is_done(self) -> bool {
        matches!(self, Self::Done(_))
    }
}

// ---------------------------------------------------------------------------
// OperationKind
// ---------------------------------------------------------------------------

/// What an operation sends and how it interprets replies.
///
/// Implementations hold the immutable request descriptor. Request encoding and
/// per-message decoding live here; the lifecycle around them lives in
/// [`Operation`].
pub trait OperationKind: Send + Sync + 'static {
    /// One decoded reply message.
    type Response: Send + 'static;
    /// Domain result produced from all replies.
    type Output: Clone + Send + 'static;
    /// Identity of the request, carried by the result handle.
    type Query: Clone + Send + Sync + 'static;

    fn query_info(&self) -> Self::Query;

    /// Wire payload for this request. Must be a pure function of `self`.
    fn request_message(&self) -> RawMessage;

    /// Message code every reply must carry.
    fn expected_response_code(&self) -> u8;

    /// Decodes one reply whose code already matched.
    ///
    /// # Errors
    ///
    /// Returns `OperationError::Decode` if the payload is malformed.
    fn decode(&self, message: &RawMessage) -> Result<Self::Response, OperationError>;

    /// Whether `response` concludes the operation. Single-reply kinds keep
    /// the default; chunked kinds return the protocol's done flag.
    fn is_done(&self, _response: &Self::Response) -> bool {
        true
    }

    /// Converts all replies, in arrival order, into the domain result.
    ///
    /// # Errors
    ///
    /// Returns `OperationError::Decode` if the replies do not form a valid result.
    fn convert(&self, responses: Vec<Self::Response>) -> Result<Self::Output, OperationError>;
}

// ---------------------------------------------------------------------------
// Exchange
// ---------------------------------------------------------------------------

/// Transport-facing view of an operation, independent of its result types.
pub trait Exchange: Send + Sync {
    fn request_message(&self) -> RawMessage;

    fn expected_response_code(&self) -> u8;

    /// Marks the operation as handed to a transport.
    fn on_submitted(&self);

    /// Feeds one reply. Returns `true` once the operation is done, including
    /// when this reply failed it.
    fn on_raw_message(&self, message: RawMessage) -> bool;

    /// Fails the operation with a transport-level cause. Ignored once done.
    fn fail(&self, cause: OperationError);

    fn is_done(&self) -> bool;
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// What [`Operation::accept`] did with a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Accepted {
    /// Accumulated; more replies are expected.
    Pending,
    /// This reply moved the operation to `Done` and completed its handle.
    Completed,
    /// The operation was already done; the reply was dropped.
    Ignored,
}

impl Accepted {
    #[must_use]
    pub(crate) fn is_finished(self) -> bool {
        self != Self::Pending
    }
}

struct Progress<R> {
    state: OperationState,
    accumulator: Vec<R>,
}

/// One request/response unit of work and the handle reporting its outcome.
pub struct Operation<K: OperationKind> {
    kind: K,
    progress: Mutex<Progress<K::Response>>,
    handle: ResultHandle<K::Output, K::Query>,
}

impl<K: OperationKind> Operation<K> {
    #[must_use]
    pub fn new(kind: K) -> Self {
        let handle = ResultHandle::new(kind.query_info());
        Self {
            kind,
            progress: Mutex::new(Progress {
                state: OperationState::Pending,
                accumulator: Vec::new(),
            }),
            handle,
        }
    }

    pub fn kind(&self) -> &K {
        &self.kind
    }

    /// Handle completed when this operation reaches `Done`.
    pub fn handle(&self) -> ResultHandle<K::Output, K::Query> {
        self.handle.clone()
    }

    pub fn state(&self) -> OperationState {
        self.progress.lock().state
    }

    /// Type-checks and decodes `message`, hands the decoded reply to
    /// `on_response`, and settles the operation if it is now finished.
    ///
    /// `on_response` runs before the reply is accumulated and without the
    /// state lock held, so it may block; an error from it fails the operation.
    /// Replies of one operation are fed one at a time by the transport.
    pub(crate) fn accept<F>(&self, message: RawMessage, on_response: F) -> Accepted
    where
        F: FnOnce(&K::Response) -> Result<(), OperationError>,
    {
        let state = self.state();
        if state.is_done() {
            warn!(
                code = message.code,
                ?state,
                "reply arrived after operation completed; ignoring"
            );
            return Accepted::Ignored;
        }

        let step = self.decode_checked(&message).and_then(|response| {
            on_response(&response)?;
            Ok(response)
        });

        let mut progress = self.progress.lock();
        if progress.state.is_done() {
            debug!(code = message.code, "operation failed while reply was processed");
            return Accepted::Ignored;
        }

        let outcome = match step {
            Ok(response) => {
                let last = self.kind.is_done(&response);
                progress.accumulator.push(response);
                if !last {
                    progress.state = OperationState::AwaitingMore;
                    return Accepted::Pending;
                }
                self.kind
                    .convert(std::mem::take(&mut progress.accumulator))
            }
            Err(cause) => Err(cause),
        };

        progress.state = OperationState::Done(match outcome {
            Ok(_) => Outcome::Success,
            Err(_) => Outcome::Failure,
        });
        drop(progress);

        if let Err(cause) = &outcome {
            debug!(code = message.code, %cause, "operation failed");
        }
        self.handle.set_outcome(outcome);
        Accepted::Completed
    }

    fn decode_checked(&self, message: &RawMessage) -> Result<K::Response, OperationError> {
        if message.is_error_response() {
            return Err(OperationError::Server {
                message: message.error_text(),
            });
        }

        let expected = self.kind.expected_response_code();
        if message.code != expected {
            return Err(OperationError::ProtocolMismatch {
                expected,
                actual: message.code,
            });
        }

        self.kind.decode(message)
    }

    /// Fails the operation unless it is already done.
    ///
    /// Returns `true` if this call completed the handle.
    pub(crate) fn fail_with(&self, cause: OperationError) -> bool {
        {
            let mut progress = self.progress.lock();
            if progress.state.is_done() {
                debug!(%cause, "failure reported after completion; ignoring");
                return false;
            }
            progress.state = OperationState::Done(Outcome::Failure);
        }
        self.handle.set_failure(cause);
        true
    }

    pub(crate) fn mark_submitted(&self) {
        let mut progress = self.progress.lock();
        if progress.state == OperationState::Pending {
            progress.state = OperationState::Submitted;
        }
    }
}

impl<K: OperationKind> Exchange for Operation<K> {
    fn request_message(&self) -> RawMessage {
        self.kind.request_message()
    }

    fn expected_response_code(&self) -> u8 {
        self.kind.expected_response_code()
    }

    fn on_submitted(&self) {
        self.mark_submitted();
    }

    fn on_raw_message(&self, message: RawMessage) -> bool {
        self.accept(message, |_| Ok(())).is_finished()
    }

    fn fail(&self, cause: OperationError) {
        self.fail_with(cause);
    }

    fn is_done(&self) -> bool {
        self.state().is_done()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
