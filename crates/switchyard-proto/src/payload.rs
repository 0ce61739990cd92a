//! CBOR payload helpers.
//!
//! The envelope does not care how payloads are encoded. These helpers exist
//! so applications without a codec of their own get a self-describing one
//! that matches the envelope encoding.

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

use crate::errors::{ProtocolError, Result};

/// Serialize a value into CBOR payload bytes.
///
/// # Errors
///
/// - `ProtocolError::CborEncode` if serialization fails
pub fn encode_payload<T: Serialize>(value: &T) -> Result<Bytes> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf)
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))?;
    Ok(Bytes::from(buf))
}

/// Deserialize CBOR payload bytes into a value.
///
/// # Errors
///
/// - `ProtocolError::CborDecode` if the bytes do not decode as `T`
pub fn decode_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Position {
        x: f32,
        y: f32,
        z: f32,
    }

    #[test]
    fn payload_round_trip() {
        let original = Position { x: 1.0, y: -2.5, z: 100.0 };
        let bytes = encode_payload(&original).unwrap();
        let decoded: Position = decode_payload(&bytes).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn payload_decode_rejects_wrong_shape() {
        let bytes = encode_payload(&"not a position").unwrap();
        let result: Result<Position> = decode_payload(&bytes);
        assert!(matches!(result, Err(ProtocolError::CborDecode(_))));
    }
}
