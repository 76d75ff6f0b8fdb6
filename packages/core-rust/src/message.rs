//! Raw protocol messages and the length-prefixed frame that carries them.
//!
//! A frame on the wire is a 4-byte big-endian length (covering the code byte
//! and the payload), a 1-byte message code, then the payload. Payload layout
//! belongs to the individual operation kinds and is opaque here.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::FrameConfig;
use crate::error::FrameError;

/// Message code the store uses for an error response to any request.
///
/// The payload of such a message is a UTF-8 error text.
pub const ERROR_RESPONSE_CODE: u8 = 0;

const LENGTH_PREFIX: usize = 4;

/// One undecoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub code: u8,
    pub payload: Bytes,
}

impl RawMessage {
    #[must_use]
    pub fn new(code: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            code,
            payload: payload.into(),
        }
    }

    /// A message that carries only its code.
    #[must_use]
    pub fn empty(code: u8) -> Self {
        Self {
            code,
            payload: Bytes::new(),
        }
    }

    /// Builds an error response carrying `message` as its text.
    #[must_use]
    pub fn error_response(message: &str) -> Self {
        Self::new(ERROR_RESPONSE_CODE, Bytes::copy_from_slice(message.as_bytes()))
    }

    #[must_use]
    pub fn is_error_response(&self) -> bool {
        self.code == ERROR_RESPONSE_CODE
    }

    /// Error text of an error response, decoded lossily.
    #[must_use]
    pub fn error_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

// ---------------------------------------------------------------------------
// FrameCodec
// ---------------------------------------------------------------------------

/// `tokio-util` codec for length-prefixed [`RawMessage`] frames.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_len: usize,
}

impl FrameCodec {
    #[must_use]
    pub fn new(config: &FrameConfig) -> Self {
        Self {
            max_frame_len: config.max_frame_len,
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(&FrameConfig::default())
    }
}

impl Decoder for FrameCodec {
    type Item = RawMessage;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RawMessage>, FrameError> {
        if src.len() < LENGTH_PREFIX {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX];
        prefix.copy_from_slice(&src[..LENGTH_PREFIX]);
        let len = u32::from_be_bytes(prefix) as usize;

        if len == 0 {
            return Err(FrameError::Empty);
        }
        if len > self.max_frame_len {
            return Err(FrameError::TooLarge {
                len,
                max: self.max_frame_len,
            });
        }

        let needed = LENGTH_PREFIX + len;
        if src.len() < needed {
            src.reserve(needed - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX);
        let mut frame = src.split_to(len);
        let code = frame.get_u8();
        Ok(Some(RawMessage {
            code,
            payload: frame.freeze(),
        }))
    }
}

impl Encoder<RawMessage> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: RawMessage, dst: &mut BytesMut) -> Result<(), FrameError> {
        let len = item.payload.len() + 1;
        let too_large = FrameError::TooLarge {
            len,
            max: self.max_frame_len,
        };
        if len > self.max_frame_len {
            return Err(too_large);
        }
        let prefix = u32::try_from(len).map_err(|_| too_large)?;

        dst.reserve(LENGTH_PREFIX + len);
        dst.put_u32(prefix);
        dst.put_u8(item.code);
        dst.extend_from_slice(&item.payload);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_round_trips_text() {
        let msg = RawMessage::error_response("bucket not found");
        assert!(msg.is_error_response());
        assert_eq!(msg.error_text(), "bucket not found");
    }

    #[test]
    fn encodes_length_code_and_payload() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        codec
            .encode(RawMessage::new(9, &b"abc"[..]), &mut buf)
            .unwrap();
        assert_eq!(&buf[..], &[0, 0, 0, 4, 9, b'a', b'b', b'c']);
    }

    #[test]
    fn decodes_frames_split_across_reads() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&[0u8, 0, 0, 3, 10][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"hi");
        buf.extend_from_slice(&[0, 0, 0, 1, 14]);

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first, RawMessage::new(10, &b"hi"[..]));

        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second, RawMessage::empty(14));
        assert!(buf.is_empty());
    }

    #[test]
    fn rejects_oversized_frames() {
        let mut codec = FrameCodec::new(&FrameConfig { max_frame_len: 8 });

        let mut buf = BytesMut::from(&[0u8, 0, 0, 9][..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::TooLarge { len: 9, max: 8 }));

        let mut out = BytesMut::new();
        let err = codec
            .encode(RawMessage::new(11, vec![0u8; 8]), &mut out)
            .unwrap_err();
        assert!(matches!(err, FrameError::TooLarge { len: 9, max: 8 }));
        assert!(out.is_empty());
    }

    #[test]
    fn rejects_zero_length_frames() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&[0u8, 0, 0, 0][..]);
        assert!(matches!(codec.decode(&mut buf), Err(FrameError::Empty)));
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn decoding_is_independent_of_read_boundaries(
                messages in prop::collection::vec(
                    (1u8..=255, prop::collection::vec(any::<u8>(), 0..64)),
                    1..8,
                ),
                chunk in 1usize..16,
            ) {
                let mut codec = FrameCodec::default();
                let mut wire = BytesMut::new();
                for (code, payload) in &messages {
                    codec.encode(RawMessage::new(*code, payload.clone()), &mut wire).unwrap();
                }

                let mut buf = BytesMut::new();
                let mut decoded = Vec::new();
                for piece in wire.chunks(chunk) {
                    buf.extend_from_slice(piece);
                    while let Some(msg) = codec.decode(&mut buf).unwrap() {
                        decoded.push(msg);
                    }
                }

                let expected: Vec<RawMessage> = messages
                    .into_iter()
                    .map(|(code, payload)| RawMessage::new(code, payload))
                    .collect();
                prop_assert_eq!(decoded, expected);
                prop_assert!(buf.is_empty());
            }
        }
    }
}
