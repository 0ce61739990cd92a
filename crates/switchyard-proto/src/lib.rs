//! Switchyard wire protocol.
//!
//! Every message on the wire is a single frame:
//!
//! ```text
//! ┌──────────────────────┬───────────────────────────────────────────┐
//! │ length: i32 (LE, 4B) │ CBOR envelope { "type": text,             │
//! │                      │                 "payload": bytes } (L B)  │
//! └──────────────────────┴───────────────────────────────────────────┘
//! ```
//!
//! The envelope names the payload type so the server can route it without
//! knowing anything about the payload schema. Payload bytes are opaque here;
//! [`encode_payload`] and [`decode_payload`] are a CBOR convenience for
//! applications that have no codec preference.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod envelope;
pub mod errors;
mod frame;
mod payload;

pub use envelope::Envelope;
pub use errors::{ProtocolError, Result};
pub use frame::{LENGTH_PREFIX_SIZE, MAX_ENVELOPE_SIZE, decode_length, encode_length};
pub use payload::{decode_payload, encode_payload};
