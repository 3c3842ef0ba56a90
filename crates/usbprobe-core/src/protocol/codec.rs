//! Bulk frame construction and checksum variants.
//!
//! A bulk OUT frame is always [`FRAME_LEN`] bytes: the command bytes, an
//! optional checksum trailer, then zero padding.

use std::fmt;

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

use super::constants::FRAME_LEN;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Malformed candidate: {len} bytes do not fit a {max}-byte frame")]
    MalformedCandidate { len: usize, max: usize },
}

/// A zero-padded bulk OUT frame.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BulkPayload([u8; FRAME_LEN]);

impl BulkPayload {
    pub const LEN: usize = FRAME_LEN;

    /// Right-pad `data` with zeros to a full frame.
    pub fn padded(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() > FRAME_LEN {
            return Err(CodecError::MalformedCandidate {
                len: data.len(),
                max: FRAME_LEN,
            });
        }
        let mut frame = [0u8; FRAME_LEN];
        frame[..data.len()].copy_from_slice(data);
        Ok(Self(frame))
    }

    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }

    /// Short hex prefix used in logs.
    pub fn short_hex(&self) -> String {
        let head: String = self.0.iter().take(6).map(|b| format!("{b:02X}")).collect();
        format!("{head}...")
    }
}

impl fmt::Debug for BulkPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BulkPayload(")?;
        for b in &self.0 {
            write!(f, "{b:02X}")?;
        }
        write!(f, ")")
    }
}

/// How a base command is turned into a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameVariant {
    /// Command bytes only.
    Raw,
    /// Command followed by a big-endian 16-bit additive checksum.
    Additive16,
    /// Command followed by a single running-XOR byte.
    Xor8,
}

impl FrameVariant {
    /// Expansion order used by the fuzzer.
    pub const ALL: [FrameVariant; 3] = [
        FrameVariant::Raw,
        FrameVariant::Additive16,
        FrameVariant::Xor8,
    ];
}

impl fmt::Display for FrameVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameVariant::Raw => write!(f, "raw"),
            FrameVariant::Additive16 => write!(f, "sum16"),
            FrameVariant::Xor8 => write!(f, "xor8"),
        }
    }
}

/// Sum of all bytes modulo 65536.
pub fn additive_checksum16(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)))
}

/// Running XOR of all bytes.
pub fn xor_checksum8(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc ^ b)
}

/// Build one frame variant of `base`.
pub fn encode(base: &[u8], variant: FrameVariant) -> Result<BulkPayload, CodecError> {
    let trailer = match variant {
        FrameVariant::Raw => 0,
        FrameVariant::Additive16 => 2,
        FrameVariant::Xor8 => 1,
    };
    let len = base.len() + trailer;
    if len > FRAME_LEN {
        return Err(CodecError::MalformedCandidate {
            len,
            max: FRAME_LEN,
        });
    }

    let mut frame = [0u8; FRAME_LEN];
    frame[..base.len()].copy_from_slice(base);
    match variant {
        FrameVariant::Raw => {}
        FrameVariant::Additive16 => {
            BigEndian::write_u16(&mut frame[base.len()..len], additive_checksum16(base))
        }
        FrameVariant::Xor8 => frame[base.len()] = xor_checksum8(base),
    }
    Ok(BulkPayload(frame))
}

/// Expand `base` into every variant, in [`FrameVariant::ALL`] order.
pub fn expand(base: &[u8]) -> Result<Vec<(FrameVariant, BulkPayload)>, CodecError> {
    FrameVariant::ALL
        .iter()
        .map(|&variant| Ok((variant, encode(base, variant)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_additive_checksum_frame() {
        let base = [0x55, 0xAA, 0x01, 0x00];
        let sum = additive_checksum16(&base);
        assert_eq!(sum, 0x0100);

        let frame = encode(&base, FrameVariant::Additive16).unwrap();
        let bytes = frame.as_bytes();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[..4], &base);
        assert_eq!(&bytes[4..6], &[0x01, 0x00]);
        assert!(bytes[6..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_additive_checksum_wraps() {
        let base = [0xFF; 300];
        assert_eq!(additive_checksum16(&base), ((0xFFu32 * 300) & 0xFFFF) as u16);
    }

    #[test]
    fn test_xor_frame() {
        let base = [0xAA, 0x55, 0x01, 0x00];
        assert_eq!(xor_checksum8(&base), 0xFE);

        let frame = encode(&base, FrameVariant::Xor8).unwrap();
        let bytes = frame.as_bytes();
        assert_eq!(bytes.len(), 16);
        assert_eq!(bytes[4], 0xFE);
        assert!(bytes[5..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_raw_frame_is_zero_padded() {
        let frame = encode(&[0xFC, 0x01], FrameVariant::Raw).unwrap();
        assert_eq!(frame.as_bytes()[..2], [0xFC, 0x01]);
        assert!(frame.as_bytes()[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_expand_order() {
        let variants: Vec<FrameVariant> = expand(&[1, 2, 3, 4])
            .unwrap()
            .into_iter()
            .map(|(v, _)| v)
            .collect();
        assert_eq!(variants, FrameVariant::ALL.to_vec());
    }

    #[test]
    fn test_checksum_fills_last_bytes_of_frame() {
        let base = [0x01; 14];
        let frame = encode(&base, FrameVariant::Additive16).unwrap();
        assert_eq!(&frame.as_bytes()[14..], &[0x00, 0x0E]);

        let full = [0x02; 16];
        assert!(encode(&full, FrameVariant::Raw).is_ok());
        assert!(matches!(
            encode(&full, FrameVariant::Xor8),
            Err(CodecError::MalformedCandidate { len: 17, max: 16 })
        ));
    }

    #[test]
    fn test_oversized_candidate_rejected() {
        // 15 bytes fit raw but not with a 2-byte checksum.
        let base = [0x11; 15];
        assert!(encode(&base, FrameVariant::Raw).is_ok());
        assert!(encode(&base, FrameVariant::Xor8).is_ok());
        assert!(matches!(
            encode(&base, FrameVariant::Additive16),
            Err(CodecError::MalformedCandidate { len: 17, max: 16 })
        ));
    }
}
