//! Contract between this client and the transport that talks to the cluster.
//!
//! The transport owns connections, framing, node selection and retries. This
//! crate only hands it operations through [`Transport::submit`] and relies on
//! it to resolve each one exactly once.

use std::sync::Arc;

use kvdriver_core::{
    Exchange, Operation, OperationKind, ResultHandle, StreamError, StreamingHandle,
    StreamingKind, StreamingOperation,
};

/// Executes operations against the cluster.
///
/// # Contract
///
/// `submit` must not block. For every submitted operation the transport must
/// eventually either feed its replies through
/// [`Exchange::on_raw_message`] until that returns `true`, or call
/// [`Exchange::fail`], including when the connection is lost. Replies of one
/// operation are fed in arrival order. Completion may happen on any thread,
/// including synchronously inside `submit`.
pub trait Transport: Send + Sync + 'static {
    fn submit(&self, operation: Arc<dyn Exchange>);
}

/// Submits `operation` and returns its handle.
pub fn execute<T, K>(transport: &T, operation: Operation<K>) -> ResultHandle<K::Output, K::Query>
where
    T: Transport + ?Sized,
    K: OperationKind,
{
    let handle = operation.handle();
    let operation = Arc::new(operation);
    operation.on_submitted();
    transport.submit(operation);
    handle
}

/// Submits a streaming operation and returns its consumer side.
///
/// # Errors
///
/// Returns `StreamError::AlreadyConsumed` without submitting if the
/// operation's results were already taken.
pub fn execute_streaming<T, K>(
    transport: &T,
    operation: StreamingOperation<K>,
) -> Result<StreamingHandle<K>, StreamError>
where
    T: Transport + ?Sized,
    K: StreamingKind,
{
    let results = operation
        .take_results()
        .ok_or(StreamError::AlreadyConsumed)?;
    let operation = Arc::new(operation);
    operation.on_submitted();
    transport.submit(operation);
    Ok(results)
}
