//! Typed envelope carried by every frame.

use bytes::{BufMut, Bytes};
use serde::{Deserialize, Serialize};

use crate::{
    errors::{ProtocolError, Result},
    frame::{LENGTH_PREFIX_SIZE, MAX_ENVELOPE_SIZE, decode_length, encode_length},
};

/// A typed message: a type name plus opaque payload bytes.
///
/// Serialized as a CBOR map `{ "type": text, "payload": bytes }`. The server
/// routes on `type` and hands `payload` untouched to the deserializer
/// registered for it.
///
/// # Invariants
///
/// - `type` is non-empty. Enforced by [`Envelope::from_bytes`] on the read
///   side and by [`Envelope::encode`] on the write side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    type_name: String,
    payload: Bytes,
}

impl Envelope {
    /// Create an envelope.
    pub fn new(type_name: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self { type_name: type_name.into(), payload: payload.into() }
    }

    /// Type name used as the registry key.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Opaque payload bytes.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Split into `(type_name, payload)`.
    pub fn into_parts(self) -> (String, Bytes) {
        (self.type_name, self.payload)
    }

    /// Serialize the envelope body (no length prefix).
    ///
    /// # Errors
    ///
    /// - `ProtocolError::EmptyTypeName` if the type name is empty
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if self.type_name.is_empty() {
            return Err(ProtocolError::EmptyTypeName);
        }

        let mut body = Vec::with_capacity(self.type_name.len() + self.payload.len() + 16);
        ciborium::ser::into_writer(self, &mut body)
            .map_err(|e| ProtocolError::CborEncode(e.to_string()))?;
        Ok(body)
    }

    /// Parse an envelope body (no length prefix).
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborDecode` if the bytes are not a CBOR envelope
    /// - `ProtocolError::EmptyTypeName` if the decoded type name is empty
    pub fn from_bytes(body: &[u8]) -> Result<Self> {
        let envelope: Self = ciborium::de::from_reader(body)
            .map_err(|e| ProtocolError::CborDecode(e.to_string()))?;

        if envelope.type_name.is_empty() {
            return Err(ProtocolError::EmptyTypeName);
        }

        Ok(envelope)
    }

    /// Encode a complete frame: length prefix followed by the body.
    ///
    /// The whole frame is written in one go so callers can hand it to a
    /// single `send`.
    ///
    /// # Errors
    ///
    /// - Anything [`Envelope::to_bytes`] returns
    /// - `ProtocolError::EnvelopeTooLarge` if the body exceeds
    ///   [`MAX_ENVELOPE_SIZE`]
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let body = self.to_bytes()?;
        if body.len() > MAX_ENVELOPE_SIZE {
            return Err(ProtocolError::EnvelopeTooLarge {
                size: body.len(),
                max: MAX_ENVELOPE_SIZE,
            });
        }

        dst.put_slice(&encode_length(body.len())?);
        dst.put_slice(&body);
        Ok(())
    }

    /// Encode a complete frame into a fresh buffer.
    pub fn to_frame(&self) -> Result<Vec<u8>> {
        let mut frame = Vec::new();
        self.encode(&mut frame)?;
        Ok(frame)
    }

    /// Decode a complete frame from a buffer.
    ///
    /// Trailing bytes after the frame are ignored.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTruncated` if the buffer is shorter than the
    ///   prefix or than the length the prefix claims
    /// - Anything [`decode_length`] or [`Envelope::from_bytes`] returns
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let Some((prefix, rest)) = bytes.split_first_chunk::<LENGTH_PREFIX_SIZE>() else {
            return Err(ProtocolError::FrameTruncated {
                expected: LENGTH_PREFIX_SIZE,
                actual: bytes.len(),
            });
        };

        let len = decode_length(*prefix, MAX_ENVELOPE_SIZE)?;
        let Some(body) = rest.get(..len) else {
            return Err(ProtocolError::FrameTruncated { expected: len, actual: rest.len() });
        };

        Self::from_bytes(body)
    }
}
