//! List every key in a namespace.
//!
//! The store answers with a series of chunks, the last one flagged `done`.
//! Run as a [`StreamingOperation`], keys become available to the consumer as
//! each chunk arrives; run as a plain operation, the result is the full list.

use kvdriver_core::{
    Location, Namespace, Operation, OperationError, OperationKind, RawMessage, StreamConfig,
    StreamingHandle, StreamingKind, StreamingOperation,
};
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use super::{codes, decode_message, encode_message, Command};
use crate::error::ClientError;
use crate::transport::{execute_streaming, Transport};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListKeysRequest<'a> {
    bucket_type: &'a str,
    bucket: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout_ms: Option<u32>,
}

/// Wire form of one list-keys reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListKeysReply {
    pub keys: Vec<ByteBuf>,
    pub done: bool,
}

impl ListKeysReply {
    #[must_use]
    pub fn chunk<I, K>(keys: I, done: bool) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Vec<u8>>,
    {
        Self {
            keys: keys.into_iter().map(|k| ByteBuf::from(k.into())).collect(),
            done,
        }
    }

    /// # Errors
    ///
    /// Returns `OperationError::BuildFailed` if the reply cannot be encoded.
    pub fn to_message(&self) -> Result<RawMessage, OperationError> {
        encode_message(codes::LIST_KEYS_RESP, self)
    }
}

/// One decoded list-keys reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListKeysChunk {
    pub keys: Vec<String>,
    pub done: bool,
}

/// List-keys command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListKeys {
    namespace: Namespace,
    timeout_ms: Option<u32>,
}

impl ListKeys {
    #[must_use]
    pub fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            timeout_ms: None,
        }
    }

    /// Server-side timeout for the listing.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// # Errors
    ///
    /// Returns `OperationError::BuildFailed` if the namespace has no bucket or
    /// the request cannot be encoded.
    pub fn build(self) -> Result<ListKeysOperation, OperationError> {
        if self.namespace.bucket.is_empty() {
            return Err(OperationError::BuildFailed {
                reason: format!("{}: bucket must not be empty", self.namespace),
            });
        }
        let request = encode_message(
            codes::LIST_KEYS_REQ,
            &ListKeysRequest {
                bucket_type: &self.namespace.bucket_type,
                bucket: &self.namespace.bucket,
                timeout_ms: self.timeout_ms,
            },
        )?;
        Ok(ListKeysOperation {
            namespace: self.namespace,
            request,
        })
    }

    /// Builds the streaming form of this command.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Build` if the request cannot be built and
    /// `ClientError::Config` if `config` is invalid.
    pub fn into_streaming(
        self,
        config: &StreamConfig,
    ) -> Result<StreamingOperation<ListKeysOperation>, ClientError> {
        Ok(StreamingOperation::new(self.build()?, config)?)
    }

    /// Builds, submits and returns the consumer side of a streaming listing.
    ///
    /// # Errors
    ///
    /// See [`into_streaming`](Self::into_streaming).
    pub fn stream<T: Transport + ?Sized>(
        self,
        transport: &T,
        config: &StreamConfig,
    ) -> Result<StreamingHandle<ListKeysOperation>, ClientError> {
        Ok(execute_streaming(transport, self.into_streaming(config)?)?)
    }
}

impl Command for ListKeys {
    type Kind = ListKeysOperation;

    fn query_info(&self) -> Namespace {
        self.namespace.clone()
    }

    fn into_operation(self) -> Result<Operation<ListKeysOperation>, OperationError> {
        Ok(Operation::new(self.build()?))
    }
}

/// Operation kind behind [`ListKeys`].
#[derive(Debug)]
pub struct ListKeysOperation {
    namespace: Namespace,
    request: RawMessage,
}

impl ListKeysOperation {
    fn locations<'a>(&'a self, keys: &'a [String]) -> impl Iterator<Item = Location> + 'a {
        keys.iter()
            .map(|key| Location::new(self.namespace.clone(), key.clone()))
    }
}

impl OperationKind for ListKeysOperation {
    type Response = ListKeysChunk;
    type Output = Vec<Location>;
    type Query = Namespace;

    fn query_info(&self) -> Namespace {
        self.namespace.clone()
    }

    fn request_message(&self) -> RawMessage {
        self.request.clone()
    }

    fn expected_response_code(&self) -> u8 {
        codes::LIST_KEYS_RESP
    }

    fn decode(&self, message: &RawMessage) -> Result<ListKeysChunk, OperationError> {
        let reply: ListKeysReply = decode_message(message)?;
        let keys = reply
            .keys
            .into_iter()
            .map(|key| {
                String::from_utf8(key.into_vec()).map_err(|e| OperationError::Decode {
                    code: message.code,
                    reason: format!("key is not UTF-8: {e}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ListKeysChunk {
            keys,
            done: reply.done,
        })
    }

    fn is_done(&self, response: &ListKeysChunk) -> bool {
        response.done
    }

    fn convert(&self, responses: Vec<ListKeysChunk>) -> Result<Vec<Location>, OperationError> {
        Ok(responses
            .iter()
            .flat_map(|chunk| self.locations(&chunk.keys))
            .collect())
    }
}

impl StreamingKind for ListKeysOperation {
    type Item = Location;

    fn process_chunk(&self, response: &ListKeysChunk) -> Vec<Location> {
        self.locations(&response.keys).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use kvdriver_core::{Exchange, OperationState, StreamError};
    use parking_lot::Mutex;

    use super::*;

    /// Holds on to submitted operations so the test can answer them.
    #[derive(Default)]
    struct Parked(Mutex<Vec<Arc<dyn Exchange>>>);

    impl Transport for Parked {
        fn submit(&self, operation: Arc<dyn Exchange>) {
            self.0.lock().push(operation);
        }
    }

    fn reply(keys: &[&str], done: bool) -> RawMessage {
        ListKeysReply::chunk(keys.iter().map(|k| k.as_bytes().to_vec()), done)
            .to_message()
            .unwrap()
    }

    #[test]
    fn plain_operation_collects_every_chunk() {
        let op = ListKeys::new(Namespace::new("users"))
            .with_timeout_ms(5_000)
            .into_operation()
            .unwrap();
        assert_eq!(op.request_message().code, codes::LIST_KEYS_REQ);

        assert!(!op.on_raw_message(reply(&["a", "b"], false)));
        assert!(op.on_raw_message(reply(&["c"], true)));

        let keys: Vec<String> = op
            .handle()
            .poll()
            .unwrap()
            .unwrap()
            .into_iter()
            .map(|l| l.key)
            .collect();
        assert_eq!(keys, ["a", "b", "c"]);
    }

    #[test]
    fn streamed_keys_arrive_per_chunk() {
        let transport = Parked::default();
        let results = ListKeys::new(Namespace::new("users"))
            .stream(&transport, &StreamConfig::default())
            .unwrap();
        let op = transport.0.lock().pop().unwrap();

        op.on_raw_message(reply(&["a", "b"], false));
        let mut iter = results.iter().unwrap();
        assert!(iter.has_next().unwrap());
        assert_eq!(iter.next_item().unwrap().key, "a");

        op.on_raw_message(reply(&["c"], false));
        op.on_raw_message(reply(&[], true));

        let rest: Vec<String> = iter.map(|item| item.unwrap().key).collect();
        assert_eq!(rest, ["b", "c"]);
        assert!(results.handle().is_success());
        assert!(matches!(results.iter(), Err(StreamError::AlreadyConsumed)));
    }

    #[test]
    fn invalid_utf8_key_fails_the_listing() {
        let op = ListKeys::new(Namespace::new("users"))
            .into_streaming(&StreamConfig::default())
            .unwrap();
        let message = ListKeysReply::chunk([vec![0xff_u8]], true).to_message().unwrap();
        assert!(op.on_raw_message(message));
        assert!(matches!(
            op.handle().cause(),
            Some(OperationError::Decode { .. })
        ));
        assert!(matches!(op.state(), OperationState::Done(_)));
    }

    #[test]
    fn missing_bucket_fails_to_build() {
        let err = ListKeys::new(Namespace::new("")).build().unwrap_err();
        assert!(matches!(err, OperationError::BuildFailed { .. }));
    }
}
