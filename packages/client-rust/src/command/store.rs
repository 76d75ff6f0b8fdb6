//! Store a value at one location.

use bytes::Bytes;
use kvdriver_core::{Location, Operation, OperationError, OperationKind, RawMessage};
use serde::Serialize;

use super::{check_location, codes, encode_message, Command, KeyRef};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StoreRequest<'a> {
    #[serde(flatten)]
    key: KeyRef<'a>,
    #[serde(with = "serde_bytes")]
    value: &'a [u8],
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    vclock: Option<&'a [u8]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    w: Option<u32>,
}

/// Store command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreValue {
    location: Location,
    value: Bytes,
    content_type: Option<String>,
    vclock: Option<Bytes>,
    w: Option<u32>,
}

impl StoreValue {
    #[must_use]
    pub fn new(location: Location, value: impl Into<Bytes>) -> Self {
        Self {
            location,
            value: value.into(),
            content_type: None,
            vclock: None,
            w: None,
        }
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Causal context from an earlier fetch of the same location.
    #[must_use]
    pub fn with_vclock(mut self, vclock: impl Into<Bytes>) -> Self {
        self.vclock = Some(vclock.into());
        self
    }

    /// Write quorum; the bucket's default when unset.
    #[must_use]
    pub fn with_w(mut self, w: u32) -> Self {
        self.w = Some(w);
        self
    }

    pub fn location(&self) -> &Location {
        &self.location
    }
}

impl Command for StoreValue {
    type Kind = StoreOperation;

    fn query_info(&self) -> Location {
        self.location.clone()
    }

    fn into_operation(self) -> Result<Operation<StoreOperation>, OperationError> {
        check_location(&self.location)?;
        let request = encode_message(
            codes::PUT_REQ,
            &StoreRequest {
                key: KeyRef::from(&self.location),
                value: &self.value,
                content_type: self.content_type.as_deref(),
                vclock: self.vclock.as_deref(),
                w: self.w,
            },
        )?;
        Ok(Operation::new(StoreOperation {
            location: self.location,
            request,
        }))
    }
}

/// Operation kind behind [`StoreValue`]. The reply body is ignored.
#[derive(Debug)]
pub struct StoreOperation {
    location: Location,
    request: RawMessage,
}

impl OperationKind for StoreOperation {
    type Response = ();
    type Output = ();
    type Query = Location;

    fn query_info(&self) -> Location {
        self.location.clone()
    }

    fn request_message(&self) -> RawMessage {
        self.request.clone()
    }

    fn expected_response_code(&self) -> u8 {
        codes::PUT_RESP
    }

    fn decode(&self, _message: &RawMessage) -> Result<(), OperationError> {
        Ok(())
    }

    fn convert(&self, _responses: Vec<()>) -> Result<(), OperationError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use kvdriver_core::{Exchange, Namespace};
    use serde::Deserialize;
    use serde_bytes::ByteBuf;

    use super::*;

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Decoded {
        key: String,
        value: ByteBuf,
        content_type: Option<String>,
        vclock: Option<ByteBuf>,
        w: Option<u32>,
    }

    #[test]
    fn request_carries_value_and_options() {
        let location = Location::new(Namespace::with_type("maps", "carts"), "c1");
        let op = StoreValue::new(location.clone(), &b"{}"[..])
            .with_content_type("application/json")
            .with_w(3)
            .into_operation()
            .unwrap();

        let request = op.request_message();
        assert_eq!(request.code, codes::PUT_REQ);
        let body: Decoded = rmp_serde::from_slice(&request.payload).unwrap();
        assert_eq!(body.key, "c1");
        assert_eq!(body.value.as_slice(), b"{}");
        assert_eq!(body.content_type.as_deref(), Some("application/json"));
        assert!(body.vclock.is_none());
        assert_eq!(body.w, Some(3));
        assert_eq!(*op.handle().query_info(), location);
    }

    #[test]
    fn put_reply_completes_with_unit() {
        let op = StoreValue::new(Location::new(Namespace::new("b"), "k"), "v")
            .with_vclock(&b"vc"[..])
            .into_operation()
            .unwrap();
        assert!(op.on_raw_message(RawMessage::empty(codes::PUT_RESP)));
        assert_eq!(op.handle().poll(), Some(Ok(())));
    }

    #[test]
    fn server_error_fails_the_store() {
        let op = StoreValue::new(Location::new(Namespace::new("b"), "k"), "v")
            .into_operation()
            .unwrap();
        assert!(op.on_raw_message(RawMessage::error_response("w val unsatisfiable")));
        assert_eq!(
            op.handle().cause(),
            Some(OperationError::Server {
                message: "w val unsatisfiable".into()
            })
        );
    }
}
