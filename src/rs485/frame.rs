//! # Spa Bus Frame Codec
//!
//! This module provides functionality to decode and encode the HDLC-style
//! frames spoken on the spa controller's RS485 bus. It leverages the `nom`
//! crate for parsing of binary data.
//!
//! ## Wire format
//!
//! ```text
//! 0x7E | length | address | control | packet-type | payload... | fcs | 0x7E
//! ```
//!
//! The length byte counts every byte that follows it up to and including the
//! frame check sequence. The FCS is computed over the length, address,
//! control, packet-type and payload bytes (everything between the delimiters
//! except the FCS itself) and must round-trip: appending `compute_fcs(range)`
//! to `range` and re-validating always succeeds.
//!
//! ## Error Handling
//! Corrupt frames are common on a shared bus. Validation failures are
//! reported as `SpaError` values that the session loop logs and drops; they
//! never terminate the loop.

use crate::constants::FRAME_DELIMITER;
use crate::error::SpaError;
use nom::bytes::streaming::take;
use nom::number::streaming::be_u8;
use nom::Err as NomErr;
use nom::IResult;

/// Minimum on-wire size: delimiters, length, address, control, type, fcs.
pub const MIN_FRAME_LEN: usize = 7;

/// Bytes covered by the length field besides the payload: address, control,
/// packet type and FCS.
const LENGTH_OVERHEAD: u8 = 4;

/// Represents a validated spa bus frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaFrame {
    pub address: u8,
    pub control: u8,
    pub packet_type: u8,
    pub payload: Vec<u8>,
    pub fcs: u8,
}

/// Computes the frame check sequence over the checksummed range of a frame
/// (length byte through the last payload byte).
///
/// CRC-8 with polynomial 0x07, initial value 0x02 and final XOR 0x02. The
/// concrete algorithm is treated as opaque by the rest of the crate; only the
/// round-trip property matters to callers.
pub fn compute_fcs(bytes: &[u8]) -> u8 {
    let mut crc: u8 = 0x02;
    for &byte in bytes {
        crc ^= byte;
        for _ in 0..8 {
            if crc & 0x80 != 0 {
                crc = (crc << 1) ^ 0x07;
            } else {
                crc <<= 1;
            }
        }
    }
    crc ^ 0x02
}

/// Validates a complete on-wire frame: delimiters, declared length and FCS.
pub fn is_valid(frame_bytes: &[u8]) -> bool {
    verify_frame(frame_bytes).is_ok()
}

/// Validates a complete on-wire frame, reporting the first defect found.
pub fn verify_frame(frame_bytes: &[u8]) -> Result<(), SpaError> {
    if frame_bytes.len() < MIN_FRAME_LEN {
        return Err(SpaError::FrameParseError(format!(
            "frame too short: {} bytes",
            frame_bytes.len()
        )));
    }
    if frame_bytes[0] != FRAME_DELIMITER || frame_bytes[frame_bytes.len() - 1] != FRAME_DELIMITER {
        return Err(SpaError::FrameParseError("missing frame delimiter".into()));
    }
    let declared = frame_bytes[1] as usize;
    // length + its own byte + the two delimiters
    let actual = frame_bytes.len() - 3;
    if declared != actual {
        return Err(SpaError::MalformedLength { declared, actual });
    }
    let fcs_index = frame_bytes.len() - 2;
    let calculated = compute_fcs(&frame_bytes[1..fcs_index]);
    if calculated != frame_bytes[fcs_index] {
        return Err(SpaError::InvalidChecksum {
            expected: frame_bytes[fcs_index],
            calculated,
        });
    }
    Ok(())
}

/// Uses the `nom` crate to parse a spa bus frame from a byte slice.
///
/// The caller is expected to have validated the FCS via `verify_frame`;
/// parsing itself only checks structure.
pub fn parse_frame(input: &[u8]) -> IResult<&[u8], SpaFrame> {
    let (input, start) = be_u8(input)?;
    if start != FRAME_DELIMITER {
        return Err(NomErr::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Tag,
        )));
    }
    let (input, length) = be_u8(input)?;
    if length < LENGTH_OVERHEAD {
        return Err(NomErr::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::LengthValue,
        )));
    }
    let (input, address) = be_u8(input)?;
    let (input, control) = be_u8(input)?;
    let (input, packet_type) = be_u8(input)?;
    let payload_len = (length - LENGTH_OVERHEAD) as usize;
    let (input, payload) = take(payload_len)(input)?;
    let (input, fcs) = be_u8(input)?;
    let (input, stop) = be_u8(input)?;
    if stop != FRAME_DELIMITER {
        return Err(NomErr::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Tag,
        )));
    }
    Ok((
        input,
        SpaFrame {
            address,
            control,
            packet_type,
            payload: payload.to_vec(),
            fcs,
        },
    ))
}

/// Packs a frame into its on-wire byte vector, computing the FCS.
pub fn pack_frame(address: u8, control: u8, packet_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(payload.len() + MIN_FRAME_LEN);
    data.push(FRAME_DELIMITER);
    data.push(payload.len() as u8 + LENGTH_OVERHEAD);
    data.push(address);
    data.push(control);
    data.push(packet_type);
    data.extend_from_slice(payload);
    let fcs = compute_fcs(&data[1..]);
    data.push(fcs);
    data.push(FRAME_DELIMITER);
    data
}

/// Incremental delimiter-scanning accumulator over a raw serial byte stream.
///
/// The serial transport hands the session loop arbitrary byte chunks; this
/// accumulator buffers them, resynchronizes on the delimiter byte and yields
/// complete validated frames. Bytes that do not form a valid frame are
/// discarded one at a time so a corrupted stretch cannot wedge the stream.
#[derive(Debug, Default)]
pub struct FrameAccumulator {
    buffer: Vec<u8>,
    /// Frames dropped due to failed validation since creation.
    pub dropped: u64,
}

impl FrameAccumulator {
    pub fn new() -> Self {
        FrameAccumulator {
            buffer: Vec::with_capacity(512),
            dropped: 0,
        }
    }

    /// Appends freshly read bytes to the accumulator.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Extracts the next complete valid frame, if one is buffered.
    pub fn next_frame(&mut self) -> Option<SpaFrame> {
        loop {
            // Drop leading garbage up to the first delimiter.
            match self.buffer.iter().position(|&b| b == FRAME_DELIMITER) {
                Some(0) => {}
                Some(n) => {
                    self.buffer.drain(..n);
                }
                None => {
                    self.buffer.clear();
                    return None;
                }
            }
            if self.buffer.len() < 2 {
                return None;
            }
            let total = self.buffer[1] as usize + 3;
            if total < MIN_FRAME_LEN {
                // Implausible length byte; resync past this delimiter.
                self.buffer.drain(..1);
                self.dropped += 1;
                continue;
            }
            if self.buffer.len() < total {
                return None;
            }
            let candidate = &self.buffer[..total];
            match verify_frame(candidate) {
                Ok(()) => match parse_frame(candidate) {
                    Ok((_, frame)) => {
                        self.buffer.drain(..total);
                        return Some(frame);
                    }
                    Err(_) => {
                        self.buffer.drain(..1);
                        self.dropped += 1;
                    }
                },
                Err(e) => {
                    log::debug!("dropping invalid frame: {e}");
                    self.buffer.drain(..1);
                    self.dropped += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fcs_round_trip() {
        let range = [0x09, 0x10, 0xAF, 0x13, 0x01, 0x02, 0x03, 0x04, 0x05];
        let fcs = compute_fcs(&range);
        let mut frame = vec![FRAME_DELIMITER];
        frame.extend_from_slice(&range);
        frame.push(fcs);
        frame.push(FRAME_DELIMITER);
        assert!(is_valid(&frame));
    }

    #[test]
    fn test_pack_then_parse() {
        let packed = pack_frame(0x10, 0xAF, 0x13, &[0xAA, 0xBB]);
        assert!(is_valid(&packed));
        let (_, frame) = parse_frame(&packed).unwrap();
        assert_eq!(frame.address, 0x10);
        assert_eq!(frame.control, 0xAF);
        assert_eq!(frame.packet_type, 0x13);
        assert_eq!(frame.payload, vec![0xAA, 0xBB]);
    }

    #[test]
    fn test_corrupt_fcs_rejected() {
        let mut packed = pack_frame(0x10, 0xAF, 0x13, &[0xAA]);
        let fcs_index = packed.len() - 2;
        packed[fcs_index] ^= 0xFF;
        assert!(!is_valid(&packed));
    }

    #[test]
    fn test_accumulator_resyncs_past_garbage() {
        let mut acc = FrameAccumulator::new();
        let good = pack_frame(0x10, 0xAF, 0x06, &[]);
        acc.extend(&[0x00, 0x55, 0x7E, 0x01]); // garbage including a stray delimiter
        acc.extend(&good);
        let frame = acc.next_frame().expect("frame after garbage");
        assert_eq!(frame.packet_type, 0x06);
        assert!(acc.next_frame().is_none());
    }

    #[test]
    fn test_accumulator_partial_then_complete() {
        let mut acc = FrameAccumulator::new();
        let good = pack_frame(0x10, 0xAF, 0x13, &[1, 2, 3]);
        acc.extend(&good[..4]);
        assert!(acc.next_frame().is_none());
        acc.extend(&good[4..]);
        assert_eq!(acc.next_frame().unwrap().payload, vec![1, 2, 3]);
    }
}
