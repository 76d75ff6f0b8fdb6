//! Fetch the value stored at one location.

use bytes::Bytes;
use kvdriver_core::{Location, Operation, OperationError, OperationKind, RawMessage};
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use super::{check_location, codes, decode_message, encode_message, Command, KeyRef};

/// Value found at a location, or nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOutput {
    pub value: Option<Bytes>,
    /// Opaque causal context to pass back on a subsequent store.
    pub vclock: Option<Bytes>,
}

impl FetchOutput {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.value.is_none()
    }
}

/// Wire form of a fetch reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FetchReply {
    pub value: Option<ByteBuf>,
    pub vclock: Option<ByteBuf>,
}

impl FetchReply {
    /// Reply for a missing key.
    #[must_use]
    pub fn not_found() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn found(value: impl Into<Vec<u8>>) -> Self {
        Self {
            value: Some(ByteBuf::from(value.into())),
            vclock: None,
        }
    }

    /// # Errors
    ///
    /// Returns `OperationError::BuildFailed` if the reply cannot be encoded.
    pub fn to_message(&self) -> Result<RawMessage, OperationError> {
        encode_message(codes::GET_RESP, self)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FetchRequest<'a> {
    #[serde(flatten)]
    key: KeyRef<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    r: Option<u32>,
    not_found_ok: bool,
}

/// Fetch command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchValue {
    location: Location,
    r: Option<u32>,
    not_found_ok: bool,
}

impl FetchValue {
    #[must_use]
    pub fn new(location: Location) -> Self {
        Self {
            location,
            r: None,
            not_found_ok: true,
        }
    }

    /// Read quorum; the bucket's default when unset.
    #[must_use]
    pub fn with_r(mut self, r: u32) -> Self {
        self.r = Some(r);
        self
    }

    /// Whether a not-found reply from one replica satisfies the quorum.
    #[must_use]
    pub fn with_not_found_ok(mut self, not_found_ok: bool) -> Self {
        self.not_found_ok = not_found_ok;
        self
    }

    pub fn location(&self) -> &Location {
        &self.location
    }
}

impl Command for FetchValue {
    type Kind = FetchOperation;

    fn query_info(&self) -> Location {
        self.location.clone()
    }

    fn into_operation(self) -> Result<Operation<FetchOperation>, OperationError> {
        check_location(&self.location)?;
        let request = encode_message(
            codes::GET_REQ,
            &FetchRequest {
                key: KeyRef::from(&self.location),
                r: self.r,
                not_found_ok: self.not_found_ok,
            },
        )?;
        Ok(Operation::new(FetchOperation {
            location: self.location,
            request,
        }))
    }
}

/// Operation kind behind [`FetchValue`].
#[derive(Debug)]
pub struct FetchOperation {
    location: Location,
    request: RawMessage,
}

impl OperationKind for FetchOperation {
    type Response = FetchReply;
    type Output = FetchOutput;
    type Query = Location;

    fn query_info(&self) -> Location {
        self.location.clone()
    }

    fn request_message(&self) -> RawMessage {
        self.request.clone()
    }

    fn expected_response_code(&self) -> u8 {
        codes::GET_RESP
    }

    fn decode(&self, message: &RawMessage) -> Result<FetchReply, OperationError> {
        // A missing key is answered with an empty reply.
        if message.payload.is_empty() {
            return Ok(FetchReply::not_found());
        }
        decode_message(message)
    }

    fn convert(&self, responses: Vec<FetchReply>) -> Result<FetchOutput, OperationError> {
        let reply = responses.into_iter().last().unwrap_or_default();
        Ok(FetchOutput {
            value: reply.value.map(|v| Bytes::from(v.into_vec())),
            vclock: reply.vclock.map(|v| Bytes::from(v.into_vec())),
        })
    }
}
