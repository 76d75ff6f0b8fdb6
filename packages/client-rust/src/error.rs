use kvdriver_core::{ConfigError, OperationError, StreamError};

/// Errors raised while setting up a request, before any handle exists.
///
/// Once a request is submitted its failures travel through its handle as
/// [`OperationError`] instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Build(#[from] OperationError),
    #[error(transparent)]
    Stream(#[from] StreamError),
}
