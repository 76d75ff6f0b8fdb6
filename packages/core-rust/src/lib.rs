//! kvdriver core: raw messages and framing, result handles, operations and
//! streaming operations for a framed-RPC key-value store client.

pub mod config;
pub mod error;
pub mod handle;
pub mod message;
pub mod operation;
pub mod streaming;
pub mod types;

pub use config::{FrameConfig, StreamConfig};
pub use error::{ConfigError, DoubleCompletionError, FrameError, OperationError, StreamError};
pub use handle::ResultHandle;
pub use message::{FrameCodec, RawMessage, ERROR_RESPONSE_CODE};
pub use operation::{Exchange, Operation, OperationKind, OperationState, Outcome};
pub use streaming::{ChunkIterator, StreamingHandle, StreamingKind, StreamingOperation};
pub use types::{Location, Namespace, DEFAULT_BUCKET_TYPE};
