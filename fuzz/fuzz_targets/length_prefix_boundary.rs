//! Fuzz target for length prefix boundary conditions
//!
//! # Strategy
//!
//! - Prefix: zero, negative, i32::MIN, at-max, just-over-max, i32::MAX,
//!   random
//! - Body: a valid envelope body or arbitrary bytes, possibly truncated
//!
//! # Invariants
//!
//! - Negative prefixes MUST return `ProtocolError::NegativeLength`
//! - Prefixes over the bound MUST return `ProtocolError::EnvelopeTooLarge`
//! - Bodies shorter than the prefix MUST return `ProtocolError::FrameTruncated`
//! - Nothing panics

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use switchyard_proto::{Envelope, MAX_ENVELOPE_SIZE, ProtocolError, decode_length};

#[derive(Debug, Clone, Arbitrary)]
enum Prefix {
    Zero,
    Negative(u16),
    Min,
    AtMax,
    JustOverMax,
    Max,
    Random(i32),
}

impl Prefix {
    fn value(&self) -> i32 {
        match self {
            Self::Zero => 0,
            Self::Negative(n) => -i32::from(*n) - 1,
            Self::Min => i32::MIN,
            Self::AtMax => MAX_ENVELOPE_SIZE as i32,
            Self::JustOverMax => MAX_ENVELOPE_SIZE as i32 + 1,
            Self::Max => i32::MAX,
            Self::Random(n) => *n,
        }
    }
}

#[derive(Debug, Clone, Arbitrary)]
struct Input {
    prefix: Prefix,
    type_name: String,
    payload: Vec<u8>,
    raw_body: Option<Vec<u8>>,
}

fuzz_target!(|input: Input| {
    let prefix = input.prefix.value();

    let body = match input.raw_body {
        Some(raw) => raw,
        None => match Envelope::new(input.type_name, input.payload).to_bytes() {
            Ok(body) => body,
            Err(_) => return,
        },
    };

    let mut frame = prefix.to_le_bytes().to_vec();
    frame.extend_from_slice(&body);

    match decode_length(prefix.to_le_bytes(), MAX_ENVELOPE_SIZE) {
        Err(ProtocolError::NegativeLength(n)) => assert!(n < 0),
        Err(ProtocolError::EnvelopeTooLarge { size, max }) => assert!(size > max),
        Err(other) => panic!("unexpected length error: {other}"),
        Ok(len) => {
            assert!(len <= MAX_ENVELOPE_SIZE);
            if body.len() < len {
                assert!(matches!(
                    Envelope::decode(&frame),
                    Err(ProtocolError::FrameTruncated { .. })
                ));
            } else {
                let _ = Envelope::decode(&frame);
            }
        },
    }

    if prefix < 0 {
        assert!(matches!(Envelope::decode(&frame), Err(ProtocolError::NegativeLength(_))));
    }
});
