//! Unit tests for the bus frame codec: packing, parsing, validation and the
//! delimiter-resynchronizing accumulator.

use proptest::prelude::*;
use spabus_rs::rs485::frame::{
    compute_fcs, is_valid, pack_frame, parse_frame, verify_frame, FrameAccumulator,
};
use spabus_rs::SpaError;

/// Tests that a packed frame parses back to its constituent fields.
#[test]
fn test_pack_parse_round_trip() {
    let packed = pack_frame(0x10, 0xAF, 0x13, &[0x01, 0x02, 0x03]);
    assert!(is_valid(&packed));
    let (rest, frame) = parse_frame(&packed).unwrap();
    assert!(rest.is_empty());
    assert_eq!(frame.address, 0x10);
    assert_eq!(frame.control, 0xAF);
    assert_eq!(frame.packet_type, 0x13);
    assert_eq!(frame.payload, vec![0x01, 0x02, 0x03]);
}

/// Tests that an empty payload still forms a minimal valid frame.
#[test]
fn test_empty_payload_frame() {
    let packed = pack_frame(0xFE, 0xBF, 0x07, &[]);
    assert_eq!(packed.len(), 7);
    assert!(is_valid(&packed));
    let (_, frame) = parse_frame(&packed).unwrap();
    assert!(frame.payload.is_empty());
}

/// Tests that a frame shorter than the minimum is rejected.
#[test]
fn test_too_short_rejected() {
    assert!(matches!(
        verify_frame(&[0x7E, 0x04, 0x10, 0xAF, 0x7E]),
        Err(SpaError::FrameParseError(_))
    ));
}

/// Tests that a missing trailing delimiter is rejected.
#[test]
fn test_missing_delimiter_rejected() {
    let mut packed = pack_frame(0x10, 0xAF, 0x13, &[0xAA]);
    let last = packed.len() - 1;
    packed[last] = 0x00;
    assert!(matches!(
        verify_frame(&packed),
        Err(SpaError::FrameParseError(_))
    ));
}

/// Tests that a length byte disagreeing with the actual size is reported
/// as a malformed length, not a checksum failure.
#[test]
fn test_declared_length_mismatch() {
    let mut packed = pack_frame(0x10, 0xAF, 0x13, &[0xAA, 0xBB]);
    packed[1] += 1;
    assert!(matches!(
        verify_frame(&packed),
        Err(SpaError::MalformedLength { .. })
    ));
}

/// Tests that a corrupted check sequence is reported with both values.
#[test]
fn test_checksum_failure_reported() {
    let mut packed = pack_frame(0x10, 0xAF, 0x13, &[0xAA, 0xBB]);
    let fcs_index = packed.len() - 2;
    packed[fcs_index] ^= 0x5A;
    match verify_frame(&packed) {
        Err(SpaError::InvalidChecksum { expected, calculated }) => {
            assert_ne!(expected, calculated);
        }
        other => panic!("expected checksum error, got {other:?}"),
    }
}

/// Tests that the accumulator yields frames split across arbitrary chunk
/// boundaries.
#[test]
fn test_accumulator_chunked_stream() {
    let mut acc = FrameAccumulator::new();
    let a = pack_frame(0x10, 0xAF, 0x13, &[1, 2, 3, 4]);
    let b = pack_frame(0x10, 0xAF, 0x23, &[9, 8, 7, 6, 5, 4, 3, 2]);
    let mut stream = Vec::new();
    stream.extend_from_slice(&a);
    stream.extend_from_slice(&b);

    for chunk in stream.chunks(3) {
        acc.extend(chunk);
    }
    assert_eq!(acc.next_frame().unwrap().packet_type, 0x13);
    assert_eq!(acc.next_frame().unwrap().payload, vec![9, 8, 7, 6, 5, 4, 3, 2]);
    assert!(acc.next_frame().is_none());
}

/// Tests that a corrupted frame between two good frames is skipped and
/// counted, without losing the frame that follows it.
#[test]
fn test_accumulator_skips_corrupt_frame() {
    let mut acc = FrameAccumulator::new();
    let good = pack_frame(0x10, 0xAF, 0x13, &[0x42]);
    let mut bad = good.clone();
    bad[5] ^= 0xFF; // corrupt the payload so the FCS fails

    acc.extend(&good);
    acc.extend(&bad);
    acc.extend(&good);

    assert_eq!(acc.next_frame().unwrap().payload, vec![0x42]);
    assert_eq!(acc.next_frame().unwrap().payload, vec![0x42]);
    assert!(acc.next_frame().is_none());
    assert!(acc.dropped > 0);
}

proptest! {
    /// Any packed frame must validate and parse back to the same fields.
    #[test]
    fn prop_pack_parse_round_trip(
        address in any::<u8>(),
        control in any::<u8>(),
        packet_type in any::<u8>(),
        payload in proptest::collection::vec(any::<u8>(), 0..=200),
    ) {
        let packed = pack_frame(address, control, packet_type, &payload);
        prop_assert!(is_valid(&packed));
        let (_, frame) = parse_frame(&packed).unwrap();
        prop_assert_eq!(frame.address, address);
        prop_assert_eq!(frame.control, control);
        prop_assert_eq!(frame.packet_type, packet_type);
        prop_assert_eq!(frame.payload, payload);
    }

    /// A frame assembled by hand with the computed FCS always validates;
    /// the packer and the validator agree on the checksummed range.
    #[test]
    fn prop_fcs_round_trip(
        address in any::<u8>(),
        control in any::<u8>(),
        packet_type in any::<u8>(),
        payload in proptest::collection::vec(any::<u8>(), 0..=64),
    ) {
        let mut range = vec![payload.len() as u8 + 4, address, control, packet_type];
        range.extend_from_slice(&payload);
        let fcs = compute_fcs(&range);

        let mut frame = vec![0x7E];
        frame.extend_from_slice(&range);
        frame.push(fcs);
        frame.push(0x7E);
        prop_assert!(is_valid(&frame));
    }

    /// Flipping any single bit inside the checksummed range invalidates
    /// the frame.
    #[test]
    fn prop_single_bit_flip_detected(
        payload in proptest::collection::vec(any::<u8>(), 0..=32),
        byte_index in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let packed = pack_frame(0x10, 0xAF, 0x13, &payload);
        // Checksummed range: length byte through the last payload byte.
        let range = 1..packed.len() - 2;
        let index = byte_index.index(range.len()) + range.start;
        let mut corrupted = packed.clone();
        corrupted[index] ^= 1 << bit;
        prop_assert!(!is_valid(&corrupted));
    }
}
