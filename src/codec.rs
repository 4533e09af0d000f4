//! Splitting and merging integers into fixed-width byte sequences.
//!
//! The memory store keeps bytes in natural (big-endian) order while the AXI
//! wire carries the lowest address in the least significant byte, so the same
//! helpers are used in both directions.

use crate::error::{BfmError, BfmResult};

/// Largest value width handled by a single signal or beat.
pub const MAX_BYTES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Big,
    Little,
}

/// Mask with the low `bits` bits set.
pub fn value_mask(bits: u32) -> u128 {
    if bits >= 128 {
        u128::MAX
    } else {
        (1u128 << bits) - 1
    }
}

/// Returns true if `value` can be represented in `size` bytes.
pub fn fits(value: u128, size: usize) -> bool {
    size >= MAX_BYTES || value <= value_mask(size as u32 * 8)
}

/// Zero-padded `size`-byte representation of `value`.
pub fn to_bytes(value: u128, size: usize, endian: Endian) -> Vec<u8> {
    assert!(size <= MAX_BYTES, "byte width {} exceeds {}", size, MAX_BYTES);
    assert!(
        fits(value, size),
        "value {:#x} does not fit in {} bytes",
        value,
        size
    );

    let be = value.to_be_bytes();
    let mut bytes = be[MAX_BYTES - size..].to_vec();
    if endian == Endian::Little {
        bytes.reverse();
    }
    bytes
}

/// Inverse of [`to_bytes`].
pub fn from_bytes(bytes: &[u8], endian: Endian) -> u128 {
    assert!(
        bytes.len() <= MAX_BYTES,
        "byte width {} exceeds {}",
        bytes.len(),
        MAX_BYTES
    );

    let fold = |acc: u128, b: &u8| (acc << 8) | *b as u128;
    match endian {
        Endian::Big => bytes.iter().fold(0, fold),
        Endian::Little => bytes.iter().rev().fold(0, fold),
    }
}

/// Reverses the byte order of a `size`-byte value.
pub fn reverse_bytes(value: u128, size: usize) -> u128 {
    from_bytes(&to_bytes(value, size, Endian::Big), Endian::Little)
}

/// Keep mask selecting the lowest `n` bytes of a beat.
pub fn keep_for_bytes(n: usize) -> u128 {
    value_mask(n as u32)
}

/// Keep mask with every byte of a `bit_width`-bit beat enabled.
pub fn full_keep(bit_width: u32) -> u128 {
    keep_for_bytes((bit_width / 8) as usize)
}

/// Number of valid bytes described by a contiguous keep mask.
pub fn bytes_in_keep(keep: u128) -> usize {
    keep.trailing_ones() as usize
}

/// Checks that a data path width is a whole number of bytes that fits a beat.
pub fn validate_width(bit_width: u32) -> BfmResult<()> {
    if bit_width == 0 || bit_width % 8 != 0 || bit_width as usize > MAX_BYTES * 8 {
        return Err(BfmError::InvalidWidth { bit_width });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_bytes_pads_to_width() {
        assert_eq!(to_bytes(0x1234, 4, Endian::Big), vec![0x00, 0x00, 0x12, 0x34]);
        assert_eq!(to_bytes(0x1234, 4, Endian::Little), vec![0x34, 0x12, 0x00, 0x00]);
        assert_eq!(to_bytes(0, 0, Endian::Big), Vec::<u8>::new());
    }

    #[test]
    fn test_from_bytes() {
        assert_eq!(from_bytes(&[0xDE, 0xAD, 0xBE, 0xEF], Endian::Big), 0xDEADBEEF);
        assert_eq!(from_bytes(&[0xEF, 0xBE, 0xAD, 0xDE], Endian::Little), 0xDEADBEEF);
    }

    #[test]
    fn test_reverse_bytes() {
        assert_eq!(reverse_bytes(0x11223344, 4), 0x44332211);
        assert_eq!(reverse_bytes(0x11, 2), 0x1100);
        assert_eq!(reverse_bytes(u128::MAX, 16), u128::MAX);
    }

    #[test]
    fn test_keep_masks() {
        assert_eq!(full_keep(64), 0xFF);
        assert_eq!(full_keep(16), 0x3);
        assert_eq!(full_keep(128), 0xFFFF);
        assert_eq!(keep_for_bytes(3), 0x7);
        assert_eq!(bytes_in_keep(0x7), 3);
        assert_eq!(bytes_in_keep(0), 0);
    }

    #[test]
    fn test_validate_width() {
        assert!(validate_width(32).is_ok());
        assert!(validate_width(128).is_ok());
        assert!(validate_width(0).is_err());
        assert!(validate_width(12).is_err());
        assert!(validate_width(256).is_err());
    }

    #[test]
    #[should_panic(expected = "does not fit")]
    fn test_overflowing_value_is_rejected() {
        to_bytes(0x1_0000, 2, Endian::Big);
    }
}
