//! Bit-exact binary framing over AEAD (C3).
//!
//! Two wire layouts, chosen per session and never mixed (§4.5):
//!
//! - [`EncryptedFrame`]: `gen(1) ‖ iv(12) ‖ body(>=16)`, minimum 29 bytes.
//! - [`EncryptedFrameWithSeq`]: `gen(1) ‖ seq(4) ‖ iv(12) ‖ body(>=16)`,
//!   minimum 33 bytes, for sessions that opt into replay protection.
//!
//! Anything shorter than the chosen layout's minimum is treated as an
//! unencrypted, pass-through frame rather than a parse error: the codec's
//! consumers must tolerate mixed streams of encrypted and plaintext frames.

use crate::aead::{NONCE_SIZE, TAG_SIZE};
use crate::error::{CoreError, Result};
use crate::types::{Gen, Seq};

/// Minimum length of a plain [`EncryptedFrame`] on the wire.
pub const MIN_FRAME_LEN: usize = 1 + NONCE_SIZE + TAG_SIZE;
/// Minimum length of an [`EncryptedFrameWithSeq`] on the wire.
pub const MIN_FRAME_WITH_SEQ_LEN: usize = 1 + 4 + NONCE_SIZE + TAG_SIZE;

/// Which wire layout a session has committed to.
///
/// A session fixes this for its lifetime (§4.5 Open Question); the frame
/// processor is constructed with one variant and never switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLayout {
    /// `gen ‖ iv ‖ ct_tag`, no sequence number.
    Plain,
    /// `gen ‖ seq ‖ iv ‖ ct_tag`, replay protection enabled.
    WithSequence,
}

/// A parsed plain frame: `gen ‖ iv ‖ body`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedFrame {
    pub generation: Gen,
    pub iv: [u8; NONCE_SIZE],
    pub body: Vec<u8>,
}

impl EncryptedFrame {
    /// Deterministic concatenation: `gen ‖ iv ‖ body`. Allocates exactly
    /// `1 + NONCE_SIZE + body.len()` bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + NONCE_SIZE + self.body.len());
        out.push(self.generation.0);
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.body);
        out
    }

    /// Parse a plain frame. Fails if shorter than [`MIN_FRAME_LEN`].
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MIN_FRAME_LEN {
            return Err(CoreError::InvalidFrame("frame shorter than minimum length"));
        }
        let generation = Gen(bytes[0]);
        let mut iv = [0u8; NONCE_SIZE];
        iv.copy_from_slice(&bytes[1..1 + NONCE_SIZE]);
        let body = bytes[1 + NONCE_SIZE..].to_vec();
        Ok(Self { generation, iv, body })
    }
}

/// A parsed replay-carrying frame: `gen ‖ seq ‖ iv ‖ body`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedFrameWithSeq {
    pub generation: Gen,
    pub sequence: Seq,
    pub iv: [u8; NONCE_SIZE],
    pub body: Vec<u8>,
}

impl EncryptedFrameWithSeq {
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + 4 + NONCE_SIZE + self.body.len());
        out.push(self.generation.0);
        out.extend_from_slice(&self.sequence.0.to_be_bytes());
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.body);
        out
    }

    /// Parse a replay-carrying frame. Fails if shorter than
    /// [`MIN_FRAME_WITH_SEQ_LEN`].
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MIN_FRAME_WITH_SEQ_LEN {
            return Err(CoreError::InvalidFrame("frame shorter than minimum length"));
        }
        let generation = Gen(bytes[0]);
        let sequence = Seq(u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]));
        let mut iv = [0u8; NONCE_SIZE];
        iv.copy_from_slice(&bytes[5..5 + NONCE_SIZE]);
        let body = bytes[5 + NONCE_SIZE..].to_vec();
        Ok(Self {
            generation,
            sequence,
            iv,
            body,
        })
    }
}

/// Read `bytes[0]` as a generation without doing a full parse. Fails on an
/// empty buffer; this is shared by both layouts since the generation byte
/// sits at offset 0 in either.
pub fn peek_generation(bytes: &[u8]) -> Result<Gen> {
    bytes
        .first()
        .map(|b| Gen(*b))
        .ok_or(CoreError::InvalidFrame("empty buffer"))
}

/// Heuristic classification for the plain layout: `len >= MIN_FRAME_LEN`.
///
/// Length alone cannot distinguish unencrypted from encrypted frames; this
/// is intentional (§4.3) — consumers pair it with `peek_generation` plus a
/// key-store lookup to decide whether the frame is really theirs.
pub fn is_encrypted(bytes: &[u8]) -> bool {
    bytes.len() >= MIN_FRAME_LEN
}

/// Same heuristic for the replay-carrying layout.
pub fn is_encrypted_with_seq(bytes: &[u8]) -> bool {
    bytes.len() >= MIN_FRAME_WITH_SEQ_LEN
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> EncryptedFrame {
        EncryptedFrame {
            generation: Gen(7),
            iv: [9u8; NONCE_SIZE],
            body: vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16],
        }
    }

    #[test]
    fn roundtrip() {
        let frame = sample_frame();
        let bytes = frame.serialize();
        let parsed = EncryptedFrame::parse(&bytes).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn peek_generation_matches_parsed() {
        let frame = sample_frame();
        let bytes = frame.serialize();
        assert_eq!(peek_generation(&bytes).unwrap(), frame.generation);
    }

    #[test]
    fn rejects_short_buffers() {
        assert!(EncryptedFrame::parse(&[0u8; MIN_FRAME_LEN - 1]).is_err());
        assert!(EncryptedFrame::parse(&[0u8; MIN_FRAME_LEN]).is_ok());
    }

    #[test]
    fn is_encrypted_matches_minimum_length() {
        assert!(!is_encrypted(&[0u8; MIN_FRAME_LEN - 1]));
        assert!(is_encrypted(&[0u8; MIN_FRAME_LEN]));
    }

    #[test]
    fn peek_generation_rejects_empty() {
        assert!(peek_generation(&[]).is_err());
    }

    #[test]
    fn with_seq_roundtrip() {
        let frame = EncryptedFrameWithSeq {
            generation: Gen(3),
            sequence: Seq(123456),
            iv: [5u8; NONCE_SIZE],
            body: vec![0xAA; 16],
        };
        let bytes = frame.serialize();
        assert!(is_encrypted_with_seq(&bytes));
        let parsed = EncryptedFrameWithSeq::parse(&bytes).unwrap();
        assert_eq!(parsed, frame);
        assert_eq!(peek_generation(&bytes).unwrap(), frame.generation);
    }

    #[test]
    fn with_seq_rejects_short_buffers() {
        assert!(EncryptedFrameWithSeq::parse(&[0u8; MIN_FRAME_WITH_SEQ_LEN - 1]).is_err());
        assert!(EncryptedFrameWithSeq::parse(&[0u8; MIN_FRAME_WITH_SEQ_LEN]).is_ok());
    }

    #[test]
    fn hello_aead_scenario_frame_shape() {
        // §8 scenario 1: "hello" (5 bytes) + 1 + 12 + 16 = 34 bytes, byte 0 = 7.
        let frame = EncryptedFrame {
            generation: Gen(7),
            iv: [0u8; NONCE_SIZE],
            body: vec![0u8; 5 + TAG_SIZE],
        };
        let bytes = frame.serialize();
        assert_eq!(bytes.len(), 34);
        assert_eq!(bytes[0], 7);
    }
}
