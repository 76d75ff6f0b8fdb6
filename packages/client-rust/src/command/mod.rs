//! Concrete key-value commands and the operation kinds behind them.
//!
//! A command is the caller-facing request description. Turning it into an
//! [`Operation`] encodes the request payload up front, so a command that cannot
//! be encoded fails with `OperationError::BuildFailed` before anything is sent.
//!
//! Payloads are `MsgPack` maps with camelCase field names, framed by
//! [`FrameCodec`](kvdriver_core::FrameCodec) with the message codes in [`codes`].

pub mod delete;
pub mod fetch;
pub mod list_keys;
pub mod store;

use kvdriver_core::{Location, Operation, OperationError, OperationKind, RawMessage};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use delete::{DeleteOperation, DeleteValue};
pub use fetch::{FetchOperation, FetchOutput, FetchReply, FetchValue};
pub use list_keys::{ListKeys, ListKeysChunk, ListKeysOperation, ListKeysReply};
pub use store::{StoreOperation, StoreValue};

/// Message codes of the requests and replies this crate speaks.
pub mod codes {
    pub const GET_REQ: u8 = 9;
    pub const GET_RESP: u8 = 10;
    pub const PUT_REQ: u8 = 11;
    pub const PUT_RESP: u8 = 12;
    pub const DEL_REQ: u8 = 13;
    pub const DEL_RESP: u8 = 14;
    pub const LIST_KEYS_REQ: u8 = 17;
    pub const LIST_KEYS_RESP: u8 = 18;
}

/// Something that can be turned into an [`Operation`] and dispatched.
pub trait Command {
    type Kind: OperationKind;

    /// Identity of the request, available before the operation is built.
    fn query_info(&self) -> <Self::Kind as OperationKind>::Query;

    /// # Errors
    ///
    /// Returns `OperationError::BuildFailed` if the request cannot be encoded.
    fn into_operation(self) -> Result<Operation<Self::Kind>, OperationError>;
}

/// An already built operation dispatches as-is.
impl<K: OperationKind> Command for Operation<K> {
    type Kind = K;

    fn query_info(&self) -> K::Query {
        self.kind().query_info()
    }

    fn into_operation(self) -> Result<Operation<K>, OperationError> {
        Ok(self)
    }
}

/// Encodes `body` as the payload of a message with `code`.
///
/// # Errors
///
/// Returns `OperationError::BuildFailed` if `body` cannot be serialized.
pub fn encode_message<T: Serialize>(code: u8, body: &T) -> Result<RawMessage, OperationError> {
    let payload = rmp_serde::to_vec_named(body).map_err(|e| OperationError::BuildFailed {
        reason: format!("cannot encode message {code}: {e}"),
    })?;
    Ok(RawMessage::new(code, payload))
}

/// Decodes the payload of `message`.
///
/// # Errors
///
/// Returns `OperationError::Decode` if the payload does not match `T`.
pub fn decode_message<T: DeserializeOwned>(message: &RawMessage) -> Result<T, OperationError> {
    rmp_serde::from_slice(&message.payload).map_err(|e| OperationError::Decode {
        code: message.code,
        reason: e.to_string(),
    })
}

/// Rejects locations the store cannot address.
fn check_location(location: &Location) -> Result<(), OperationError> {
    let missing = if location.namespace.bucket.is_empty() {
        "bucket"
    } else if location.key.is_empty() {
        "key"
    } else {
        return Ok(());
    };
    Err(OperationError::BuildFailed {
        reason: format!("{location}: {missing} must not be empty"),
    })
}

/// Key-addressing fields shared by single-key requests.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct KeyRef<'a> {
    bucket_type: &'a str,
    bucket: &'a str,
    key: &'a str,
}

impl<'a> From<&'a Location> for KeyRef<'a> {
    fn from(location: &'a Location) -> Self {
        Self {
            bucket_type: &location.namespace.bucket_type,
            bucket: &location.namespace.bucket,
            key: &location.key,
        }
    }
}
