//! Delete the value at one location.

use bytes::Bytes;
use kvdriver_core::{Location, Operation, OperationError, OperationKind, RawMessage};
use serde::Serialize;

use super::{check_location, codes, encode_message, Command, KeyRef};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteRequest<'a> {
    #[serde(flatten)]
    key: KeyRef<'a>,
    #[serde(skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    vclock: Option<&'a [u8]>,
}

/// Delete command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteValue {
    location: Location,
    vclock: Option<Bytes>,
}

impl DeleteValue {
    #[must_use]
    pub fn new(location: Location) -> Self {
        Self {
            location,
            vclock: None,
        }
    }

    #[must_use]
    pub fn with_vclock(mut self, vclock: impl Into<Bytes>) -> Self {
        self.vclock = Some(vclock.into());
        self
    }

    pub fn location(&self) -> &Location {
        &self.location
    }
}

impl Command for DeleteValue {
    type Kind = DeleteOperation;

    fn query_info(&self) -> Location {
        self.location.clone()
    }

    fn into_operation(self) -> Result<Operation<DeleteOperation>, OperationError> {
        check_location(&self.location)?;
        let request = encode_message(
            codes::DEL_REQ,
            &DeleteRequest {
                key: KeyRef::from(&self.location),
                vclock: self.vclock.as_deref(),
            },
        )?;
        Ok(Operation::new(DeleteOperation {
            location: self.location,
            request,
        }))
    }
}

/// Operation kind behind [`DeleteValue`].
#[derive(Debug)]
pub struct DeleteOperation {
    location: Location,
    request: RawMessage,
}

impl OperationKind for DeleteOperation {
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
        codes::DEL_RESP
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

    use super::*;

    #[test]
    fn delete_completes_on_del_resp() {
        let op = DeleteValue::new(Location::new(Namespace::new("b"), "k"))
            .into_operation()
            .unwrap();
        assert_eq!(op.request_message().code, codes::DEL_REQ);
        assert!(op.on_raw_message(RawMessage::empty(codes::DEL_RESP)));
        assert_eq!(op.handle().poll(), Some(Ok(())));
    }

    #[test]
    fn get_resp_is_a_protocol_mismatch() {
        let op = DeleteValue::new(Location::new(Namespace::new("b"), "k"))
            .with_vclock(&b"vc"[..])
            .into_operation()
            .unwrap();
        assert!(op.on_raw_message(RawMessage::empty(codes::GET_RESP)));
        assert_eq!(
            op.handle().cause(),
            Some(OperationError::ProtocolMismatch {
                expected: codes::DEL_RESP,
                actual: codes::GET_RESP
            })
        );
    }
}
