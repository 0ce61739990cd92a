//! Protocol error types.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while framing or parsing envelopes.
///
/// Any of these on an inbound stream means the peer is out of sync with the
/// framing, so the connection cannot be trusted for further reads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Length prefix decoded to a negative value
    #[error("negative envelope length: {0}")]
    NegativeLength(i32),

    /// Envelope exceeds the configured maximum
    #[error("envelope too large: {size} bytes (max {max})")]
    EnvelopeTooLarge {
        /// Size claimed by the prefix or produced by the encoder
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Buffer ends before the frame does
    #[error("frame truncated: expected {expected} bytes, got {actual}")]
    FrameTruncated {
        /// Bytes the frame needs
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// Envelope carries an empty type name
    #[error("envelope type name is empty")]
    EmptyTypeName,

    /// CBOR serialization failed
    #[error("CBOR encode failed: {0}")]
    CborEncode(String),

    /// CBOR deserialization failed
    #[error("CBOR decode failed: {0}")]
    CborDecode(String),
}
