//! Fuzz target for Envelope::decode
//!
//! Arbitrary bytes as a complete frame (prefix + CBOR body). Decoding must
//! never panic; invalid input returns a `ProtocolError`. Anything that does
//! decode must re-encode to a frame that decodes to the same envelope.

#![no_main]

use libfuzzer_sys::fuzz_target;
use switchyard_proto::Envelope;

fuzz_target!(|data: &[u8]| {
    if let Ok(envelope) = Envelope::decode(data) {
        assert!(!envelope.type_name().is_empty(), "decoded envelope with empty type");

        let frame = envelope.to_frame().expect("decoded envelope must re-encode");
        let again = Envelope::decode(&frame).expect("re-encoded frame must decode");
        assert_eq!(envelope, again);
    }
});
