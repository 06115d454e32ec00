//! WSS frame encoder/decoder.
//!
//! The WSS wireless bridge carries SLIP-style frames over a byte stream with
//! no message boundaries. This module handles the pure byte-level encoding
//! and the incremental, checksum-validated decoding of those frames.
//!
//! # Frame format
//!
//! ```text
//! escape( <sender> <target> <cmd> <len> [<data>...] <checksum> ) 0xC0
//! ```
//!
//! - `sender`: address of the transmitting node (`0x00` for the host)
//! - `target`: destination address (unit or broadcast)
//! - `cmd` / `len` / `data`: the payload; `len` counts the data bytes
//! - `checksum`: see [`checksum`]
//! - Terminator: `0xC0`, the only unescaped `0xC0` on the wire

use bytes::{BufMut, BytesMut};

/// Frame terminator byte.
pub const END: u8 = 0xC0;

/// Escape introducer.
pub const ESC: u8 = 0xDB;

/// Second byte of an escaped [`END`].
pub const ESC_END: u8 = 0xDC;

/// Second byte of an escaped [`ESC`].
pub const ESC_ESC: u8 = 0xDD;

/// Smallest decodable frame: sender, target and checksum.
pub const MIN_FRAME_LEN: usize = 3;

/// Largest data section a payload can describe with its one-byte length.
pub const MAX_DATA_LEN: usize = 255;

/// Compute the frame checksum over `bytes`.
///
/// The 16-bit byte sum is folded into one byte (low byte plus carry) and
/// inverted.
///
/// # Example
///
/// ```
/// use wss_protocol::frame::checksum;
///
/// assert_eq!(checksum(&[0x00, 0x81, 0x07, 0x02, 0x11, 0x22]), 0x42);
/// ```
pub fn checksum(bytes: &[u8]) -> u8 {
    let sum: u32 = bytes.iter().map(|&b| b as u32).sum();
    (((sum & 0xFF) + (sum >> 8)) ^ 0xFF) as u8
}

/// A validated, unescaped frame with the terminator stripped.
///
/// The checksum byte is kept as the last byte of [`Frame::as_bytes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    /// Build a frame from its raw fields, computing the checksum.
    pub fn new(sender: u8, target: u8, payload: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(payload.len() + 3);
        bytes.push(sender);
        bytes.push(target);
        bytes.extend_from_slice(payload);
        bytes.push(checksum(&bytes));
        Frame { bytes }
    }

    /// Address of the node that sent this frame.
    pub fn sender(&self) -> u8 {
        self.bytes[0]
    }

    /// Address this frame is destined for.
    pub fn target(&self) -> u8 {
        self.bytes[1]
    }

    /// Payload bytes: everything between the addresses and the checksum.
    pub fn payload(&self) -> &[u8] {
        &self.bytes[2..self.bytes.len() - 1]
    }

    /// Command opcode, if the payload is non-empty.
    pub fn command(&self) -> Option<u8> {
        self.payload().first().copied()
    }

    /// Data section of the payload (after `cmd` and `len`).
    ///
    /// Trusts the actual frame length over the length byte; a payload that
    /// is too short for a header yields an empty slice.
    pub fn data(&self) -> &[u8] {
        self.payload().get(2..).unwrap_or(&[])
    }

    /// Trailing checksum byte.
    pub fn checksum(&self) -> u8 {
        self.bytes[self.bytes.len() - 1]
    }

    /// The whole unescaped frame including the checksum.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Escape and terminate this frame for transmission.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.bytes.len() * 2 + 1);
        for &b in &self.bytes {
            match b {
                END => {
                    buf.put_u8(ESC);
                    buf.put_u8(ESC_END);
                }
                ESC => {
                    buf.put_u8(ESC);
                    buf.put_u8(ESC_ESC);
                }
                _ => buf.put_u8(b),
            }
        }
        buf.put_u8(END);
        buf.to_vec()
    }
}

/// Encode a frame into raw bytes ready for transmission.
///
/// # Example
///
/// ```
/// use wss_protocol::frame::encode;
///
/// // Echo (0x07) with data [0x11, 0x22] from the host to unit 1.
/// let bytes = encode(0x00, 0x81, &[0x07, 0x02, 0x11, 0x22]);
/// assert_eq!(bytes, vec![0x00, 0x81, 0x07, 0x02, 0x11, 0x22, 0x42, 0xC0]);
/// ```
pub fn encode(sender: u8, target: u8, payload: &[u8]) -> Vec<u8> {
    Frame::new(sender, target, payload).to_wire()
}

/// Reverse the escaping of one terminated candidate.
///
/// Returns `None` on an escape byte followed by anything other than
/// [`ESC_END`] / [`ESC_ESC`], or a dangling escape.
fn unescape(raw: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(raw.len());
    let mut iter = raw.iter();
    while let Some(&b) = iter.next() {
        if b == ESC {
            match iter.next() {
                Some(&ESC_END) => out.push(END),
                Some(&ESC_ESC) => out.push(ESC),
                _ => return None,
            }
        } else {
            out.push(b);
        }
    }
    Some(out)
}

/// Incremental frame decoder.
///
/// Holds the escaped bytes of the current unterminated frame across calls,
/// so frames may be split or coalesced arbitrarily by the transport. Each
/// connection owns its own decoder.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk of received bytes, returning every frame it completes.
    ///
    /// Candidates that are too short, contain an invalid escape sequence or
    /// fail the checksum are dropped silently. The accumulator is reset at
    /// every terminator either way.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        for &b in chunk {
            if b != END {
                self.buf.put_u8(b);
                continue;
            }

            let raw = self.buf.split();
            if raw.is_empty() {
                // Back-to-back terminators.
                continue;
            }
            match Self::validate(&raw) {
                Some(frame) => frames.push(frame),
                None => {
                    tracing::trace!(len = raw.len(), data = ?&raw[..], "dropping invalid frame");
                }
            }
        }
        frames
    }

    /// Number of buffered bytes belonging to an unterminated frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Discard any partially received frame.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    fn validate(raw: &[u8]) -> Option<Frame> {
        let bytes = unescape(raw)?;
        if bytes.len() < MIN_FRAME_LEN {
            return None;
        }
        let (body, sum) = bytes.split_at(bytes.len() - 1);
        if checksum(body) != sum[0] {
            return None;
        }
        Some(Frame { bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Echo from the host to unit 1; no byte is one bit away from END or ESC.
    const ECHO_PAYLOAD: [u8; 4] = [0x07, 0x02, 0x11, 0x22];

    // ---------------------------------------------------------------
    // Checksum
    // ---------------------------------------------------------------

    #[test]
    fn checksum_simple() {
        assert_eq!(checksum(&[0x00, 0x81, 0x07, 0x02, 0x11, 0x22]), 0x42);
    }

    #[test]
    fn checksum_folds_carry() {
        // 0xFF + 0xFF = 0x1FE -> 0xFE + 0x01 = 0xFF -> inverted 0x00
        assert_eq!(checksum(&[0xFF, 0xFF]), 0x00);
        // 0x81 + 0x81 = 0x102 -> 0x02 + 0x01 = 0x03 -> inverted 0xFC
        assert_eq!(checksum(&[0x81, 0x81]), 0xFC);
    }

    #[test]
    fn checksum_empty() {
        assert_eq!(checksum(&[]), 0xFF);
    }

    // ---------------------------------------------------------------
    // Encoding
    // ---------------------------------------------------------------

    #[test]
    fn encode_plain_frame() {
        let bytes = encode(0x00, 0x81, &ECHO_PAYLOAD);
        assert_eq!(bytes, vec![0x00, 0x81, 0x07, 0x02, 0x11, 0x22, 0x42, 0xC0]);
    }

    #[test]
    fn encode_escapes_end_and_esc() {
        let payload = [0x07, 0x02, END, ESC];
        let bytes = encode(0x00, 0x81, &payload);

        // Only the final byte may be a bare END.
        let (body, term) = bytes.split_at(bytes.len() - 1);
        assert_eq!(term, &[END]);
        assert!(!body.contains(&END));
        assert_eq!(
            &body[..8],
            &[0x00, 0x81, 0x07, 0x02, ESC, ESC_END, ESC, ESC_ESC]
        );
    }

    #[test]
    fn encode_escapes_checksum_byte() {
        // Byte sum 0x3F inverts to END.
        let frame = Frame::new(0x00, 0x00, &[0x3F]);
        assert_eq!(frame.checksum(), END);
        let wire = frame.to_wire();
        assert_eq!(&wire[wire.len() - 3..], &[ESC, ESC_END, END]);
    }

    #[test]
    fn frame_accessors() {
        let frame = Frame::new(0x81, 0x00, &ECHO_PAYLOAD);
        assert_eq!(frame.sender(), 0x81);
        assert_eq!(frame.target(), 0x00);
        assert_eq!(frame.command(), Some(0x07));
        assert_eq!(frame.payload(), &ECHO_PAYLOAD);
        assert_eq!(frame.data(), &[0x11, 0x22]);
    }

    #[test]
    fn frame_data_of_short_payload_is_empty() {
        let frame = Frame::new(0x81, 0x00, &[0x07]);
        assert_eq!(frame.command(), Some(0x07));
        assert!(frame.data().is_empty());
    }

    // ---------------------------------------------------------------
    // Decoding
    // ---------------------------------------------------------------

    #[test]
    fn decode_single_frame() {
        let mut dec = FrameDecoder::new();
        let frames = dec.decode(&encode(0x00, 0x81, &ECHO_PAYLOAD));
        assert_eq!(frames.len(), 1);
        assert_eq!(
            frames[0].as_bytes(),
            &[0x00, 0x81, 0x07, 0x02, 0x11, 0x22, 0x42]
        );
        assert_eq!(dec.buffered(), 0);
    }

    #[test]
    fn decode_escaped_payload() {
        let payload = [0x07, 0x04, END, ESC, ESC, END];
        let mut dec = FrameDecoder::new();
        let frames = dec.decode(&encode(0x81, 0x00, &payload));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), &payload);
    }

    #[test]
    fn decode_coalesced_frames() {
        let mut wire = encode(0x81, 0x00, &[0x40, 0x00]);
        wire.extend(encode(0x82, 0x00, &[0x40, 0x00]));
        wire.extend(encode(0x83, 0x00, &[0x40, 0x00]));

        let mut dec = FrameDecoder::new();
        let frames = dec.decode(&wire);
        let senders: Vec<u8> = frames.iter().map(|f| f.sender()).collect();
        assert_eq!(senders, vec![0x81, 0x82, 0x83]);
    }

    #[test]
    fn decode_split_frame() {
        let wire = encode(0x00, 0x81, &ECHO_PAYLOAD);
        let mut dec = FrameDecoder::new();
        assert!(dec.decode(&wire[..3]).is_empty());
        assert_eq!(dec.buffered(), 3);
        let frames = dec.decode(&wire[3..]);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn decode_escape_at_chunk_boundary() {
        let wire = encode(0x00, 0x81, &[0x07, 0x01, END]);
        let esc_pos = wire.iter().position(|&b| b == ESC).unwrap();

        let mut dec = FrameDecoder::new();
        assert!(dec.decode(&wire[..=esc_pos]).is_empty());
        let frames = dec.decode(&wire[esc_pos + 1..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data(), &[END]);
    }

    #[test]
    fn decode_bad_checksum_dropped() {
        let mut wire = encode(0x00, 0x81, &ECHO_PAYLOAD);
        let cs = wire.len() - 2;
        wire[cs] ^= 0x01;
        let mut dec = FrameDecoder::new();
        assert!(dec.decode(&wire).is_empty());
        assert_eq!(dec.buffered(), 0);
    }

    #[test]
    fn decode_recovers_after_bad_frame() {
        let mut wire = encode(0x00, 0x81, &ECHO_PAYLOAD);
        wire[3] ^= 0x04;
        wire.extend(encode(0x00, 0x82, &ECHO_PAYLOAD));

        let mut dec = FrameDecoder::new();
        let frames = dec.decode(&wire);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].target(), 0x82);
    }

    #[test]
    fn decode_every_single_bit_flip_is_dropped() {
        // No byte of this frame is one bit away from END or ESC, so every
        // flip changes content and never the framing, which the additive
        // checksum cannot promise to catch.
        let wire = encode(0x00, 0x81, &ECHO_PAYLOAD);
        let body_len = wire.len() - 1;
        for i in 0..body_len {
            for bit in 0..8 {
                let mut corrupted = wire.clone();
                corrupted[i] ^= 1 << bit;
                let mut dec = FrameDecoder::new();
                assert!(
                    dec.decode(&corrupted).is_empty(),
                    "flip of bit {bit} in byte {i} was accepted"
                );
            }
        }
    }

    #[test]
    fn decode_invalid_escape_dropped() {
        let mut dec = FrameDecoder::new();
        let frames = dec.decode(&[0x00, 0x81, ESC, 0x01, 0x7E, END]);
        assert!(frames.is_empty());
    }

    #[test]
    fn decode_short_candidate_dropped() {
        let mut dec = FrameDecoder::new();
        // Two bytes whose "checksum" would match: 0x00 then !0x00.
        assert!(dec.decode(&[0x00, 0xFF, END]).is_empty());
    }

    #[test]
    fn decode_empty_candidates_skipped() {
        let mut dec = FrameDecoder::new();
        let mut wire = vec![END, END];
        wire.extend(encode(0x81, 0x00, &ECHO_PAYLOAD));
        wire.push(END);
        let frames = dec.decode(&wire);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn reset_discards_partial_frame() {
        let wire = encode(0x00, 0x81, &ECHO_PAYLOAD);
        let mut dec = FrameDecoder::new();
        dec.decode(&wire[..4]);
        dec.reset();
        assert_eq!(dec.buffered(), 0);
        // The tail alone does not form a valid frame.
        assert!(dec.decode(&wire[4..]).is_empty());
    }
}
