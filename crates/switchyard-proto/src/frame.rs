//! Length prefix handling.
//!
//! The prefix is a signed 32-bit little-endian integer. Signed because peers
//! written against other runtimes commonly emit a native `int`; a negative
//! value is therefore a real possibility on the wire and is rejected rather
//! than reinterpreted.

use crate::errors::{ProtocolError, Result};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default upper bound on a single envelope body (16 MB).
///
/// Readers allocate the body up front, so the bound is what keeps a hostile
/// prefix from reserving arbitrary memory.
pub const MAX_ENVELOPE_SIZE: usize = 16 * 1024 * 1024;

/// Decode a length prefix and check it against `max`.
///
/// # Errors
///
/// - `ProtocolError::NegativeLength` if the prefix is below zero
/// - `ProtocolError::EnvelopeTooLarge` if the length exceeds `max`
pub fn decode_length(prefix: [u8; LENGTH_PREFIX_SIZE], max: usize) -> Result<usize> {
    let raw = i32::from_le_bytes(prefix);
    if raw < 0 {
        return Err(ProtocolError::NegativeLength(raw));
    }

    let len = raw as usize;
    if len > max {
        return Err(ProtocolError::EnvelopeTooLarge { size: len, max });
    }

    Ok(len)
}

/// Encode a body length as a prefix.
///
/// # Errors
///
/// - `ProtocolError::EnvelopeTooLarge` if `len` does not fit in an `i32`
pub fn encode_length(len: usize) -> Result<[u8; LENGTH_PREFIX_SIZE]> {
    let raw = i32::try_from(len)
        .map_err(|_| ProtocolError::EnvelopeTooLarge { size: len, max: i32::MAX as usize })?;
    Ok(raw.to_le_bytes())
}
