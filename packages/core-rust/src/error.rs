//! Error taxonomy for operations, streams, framing and configuration.
//!
//! Item-level failures ([`OperationError`]) are captured inside the failing
//! operation's [`ResultHandle`](crate::ResultHandle) and surface only when that
//! handle is inspected. [`OperationError::DispatchInterrupted`] is the one
//! variant that fails a whole batch.

/// Failure cause recorded in a [`ResultHandle`](crate::ResultHandle).
///
/// `Clone` so that every observer of a shared handle can read the cause.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum OperationError {
    #[error("failed to decode response message (code {code}): {reason}")]
    Decode { code: u8, reason: String },
    #[error("protocol mismatch: expected response code {expected}, got {actual}")]
    ProtocolMismatch { expected: u8, actual: u8 },
    #[error("server error: {message}")]
    Server { message: String },
    #[error("transport failure: {reason}")]
    Transport { reason: String },
    #[error("stream consumer stalled: queue stayed full for {timeout_ms}ms")]
    ConsumerStalled { timeout_ms: u64 },
    #[error("could not build operation: {reason}")]
    BuildFailed { reason: String },
    #[error("dispatch interrupted after {dispatched} of {total} operations")]
    DispatchInterrupted { dispatched: usize, total: usize },
}

impl OperationError {
    /// Returns `true` if this cause failed a whole batch rather than one item.
    #[must_use]
    pub fn is_batch_level(&self) -> bool {
        matches!(self, Self::DispatchInterrupted { .. })
    }
}

/// A result handle's producer side was invoked after the handle completed.
///
/// This is a programming error: the panicking producers
/// ([`ResultHandle::set_result`](crate::ResultHandle::set_result) and
/// [`ResultHandle::set_failure`](crate::ResultHandle::set_failure)) raise it as
/// a panic, the `try_` variants return it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("result handle completed twice")]
pub struct DoubleCompletionError;

/// Errors surfaced by a streaming result iterator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("no chunk arrived within {timeout_ms}ms")]
    PollTimeout { timeout_ms: u64 },
    #[error("streaming results were already consumed")]
    AlreadyConsumed,
    #[error("no item is ready; call has_next() first")]
    NoItemReady,
    #[error("streaming operation failed: {0}")]
    Failed(#[from] OperationError),
}

/// Errors from the length-prefixed frame codec.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    TooLarge { len: usize, max: usize },
    #[error("frame carries no message code")]
    Empty,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}
