//! Status word snapshots.
//!
//! The status word is opaque: it is compared, never decoded.

use std::fmt;

use super::constants::STATUS_LEN;

/// One 8-byte snapshot from the status control read.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StatusWord([u8; STATUS_LEN]);

impl StatusWord {
    pub const LEN: usize = STATUS_LEN;

    pub const fn new(bytes: [u8; STATUS_LEN]) -> Self {
        Self(bytes)
    }

    /// Build a snapshot from a control read.
    ///
    /// Short reads are zero-padded and long reads truncated so that two
    /// snapshots are always comparable byte for byte.
    pub fn from_slice(data: &[u8]) -> Self {
        let mut bytes = [0u8; STATUS_LEN];
        for (dst, src) in bytes.iter_mut().zip(data) {
            *dst = *src;
        }
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; STATUS_LEN] {
        &self.0
    }

    /// Byte-wise inequality.
    pub fn changed(&self, other: &StatusWord) -> bool {
        self.0 != other.0
    }
}

impl fmt::Debug for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StatusWord({self})")
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{b:02X}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changed_is_irreflexive() {
        let a = StatusWord::new([0x04, 0, 0, 0, 0, 0, 0, 0]);
        assert!(!a.changed(&a));
    }

    #[test]
    fn test_changed_is_symmetric() {
        let samples = [
            StatusWord::new([0; 8]),
            StatusWord::new([0x04, 0, 0, 0, 0, 0, 0, 0]),
            StatusWord::new([0, 0, 0, 0, 0, 0, 0, 0x01]),
            StatusWord::new([0xFF; 8]),
        ];
        for a in &samples {
            for b in &samples {
                assert_eq!(a.changed(b), b.changed(a));
            }
        }
    }

    #[test]
    fn test_from_slice_pads_and_truncates() {
        let short = StatusWord::from_slice(&[1, 2]);
        assert_eq!(short.as_bytes(), &[1, 2, 0, 0, 0, 0, 0, 0]);

        let long = StatusWord::from_slice(&[9; 12]);
        assert_eq!(long.as_bytes(), &[9; 8]);
    }

    #[test]
    fn test_display() {
        let s = StatusWord::new([0x00, 0x04, 0xAB, 0, 0, 0, 0, 0xFF]);
        assert_eq!(s.to_string(), "00 04 AB 00 00 00 00 FF");
    }
}
