//! Property and wire-format tests for envelope framing.
//!
//! Round-trips are checked for arbitrary envelopes; the fixed-vector tests
//! pin the exact bytes so peers in other languages can be checked against
//! them.

use bytes::Bytes;
use proptest::prelude::*;
use switchyard_proto::{
    Envelope, LENGTH_PREFIX_SIZE, MAX_ENVELOPE_SIZE, ProtocolError, decode_length,
};

/// Strategy for type names accepted by the registry
fn arbitrary_type_name() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9_.:]{0,63}"
}

/// Strategy for envelopes with payloads up to 4KB
fn arbitrary_envelope() -> impl Strategy<Value = Envelope> {
    (arbitrary_type_name(), prop::collection::vec(any::<u8>(), 0..4096))
        .prop_map(|(type_name, payload)| Envelope::new(type_name, Bytes::from(payload)))
}

#[test]
fn prop_frame_round_trip() {
    proptest!(|(envelope in arbitrary_envelope())| {
        let frame = envelope.to_frame().expect("encode should succeed");
        let decoded = Envelope::decode(&frame).expect("decode should succeed");

        prop_assert_eq!(decoded.type_name(), envelope.type_name());
        prop_assert_eq!(decoded.payload(), envelope.payload());
    });
}

#[test]
fn prop_prefix_matches_body_length() {
    proptest!(|(envelope in arbitrary_envelope())| {
        let frame = envelope.to_frame().expect("encode should succeed");
        let (prefix, body) = frame.split_at(LENGTH_PREFIX_SIZE);

        let mut raw = [0u8; LENGTH_PREFIX_SIZE];
        raw.copy_from_slice(prefix);
        let len = decode_length(raw, MAX_ENVELOPE_SIZE).expect("valid prefix");

        prop_assert_eq!(len, body.len());
        prop_assert_eq!(Envelope::from_bytes(body).expect("body decodes"), envelope);
    });
}

#[test]
fn prop_negative_prefix_always_rejected() {
    proptest!(|(raw in i32::MIN..0i32)| {
        prop_assert_eq!(
            decode_length(raw.to_le_bytes(), MAX_ENVELOPE_SIZE),
            Err(ProtocolError::NegativeLength(raw))
        );
    });
}

#[test]
fn ping_with_empty_payload_wire_bytes() {
    let frame = Envelope::new("Ping", Bytes::new()).to_frame().unwrap();

    // 0x14 = 20 byte body: {"type": "Ping", "payload": h''}
    assert_eq!(hex::encode(&frame), "14000000a264747970656450696e67677061796c6f616440");
}

#[test]
fn ping_with_payload_wire_bytes() {
    let frame = Envelope::new("Ping", vec![1, 2, 3]).to_frame().unwrap();

    // 0x17 = 23 byte body: {"type": "Ping", "payload": h'010203'}
    assert_eq!(hex::encode(&frame), "17000000a264747970656450696e67677061796c6f616443010203");
}
