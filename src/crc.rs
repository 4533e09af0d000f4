//! CRC16 (CCITT polynomial 0x1021, initial value 0, no reflection).

const POLY: u16 = 0x1021;

const fn table_entry(index: u16) -> u16 {
    let mut crc = 0u16;
    let mut c = index << 8;
    let mut bit = 0;
    while bit < 8 {
        if (crc ^ c) & 0x8000 != 0 {
            crc = (crc << 1) ^ POLY;
        } else {
            crc <<= 1;
        }
        c <<= 1;
        bit += 1;
    }
    crc
}

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = table_entry(i as u16);
        i += 1;
    }
    table
}

static TABLE: [u16; 256] = build_table();

fn update(crc: u16, byte: u8) -> u16 {
    let index = ((crc >> 8) ^ byte as u16) & 0xFF;
    (crc << 8) ^ TABLE[index as usize]
}

pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0, |crc, &byte| update(crc, byte))
}

/// CRC16 of `key` serialized big-endian in the fewest bytes (at least one).
pub fn crc16_key(key: u128) -> u16 {
    let bits = 128 - key.leading_zeros() as usize;
    let len = bits.div_ceil(8).max(1);
    crc16(&key.to_be_bytes()[16 - len..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_value() {
        assert_eq!(crc16(b"123456789"), 0x31C3);
        assert_eq!(crc16(&[]), 0);
    }

    #[test]
    fn test_table() {
        assert_eq!(TABLE[0], 0x0000);
        assert_eq!(TABLE[1], 0x1021);
        assert_eq!(TABLE[255], 0x1EF0);
    }

    #[test]
    fn test_key_serialization() {
        assert_eq!(crc16_key(0), crc16(&[0x00]));
        assert_eq!(crc16_key(0x1), crc16(&[0x01]));
        assert_eq!(crc16_key(0x123), crc16(&[0x01, 0x23]));
        assert_eq!(crc16_key(0xDEADBEEF), crc16(&[0xDE, 0xAD, 0xBE, 0xEF]));
    }

    #[test]
    fn test_single_bit_flips_change_checksum() {
        let key: u128 = 0x0123_4567_89AB_CDEF_0011_2233_4455_6677;
        let reference = crc16_key(key);
        for bit in 0..120 {
            assert_ne!(crc16_key(key ^ (1 << bit)), reference, "bit {}", bit);
        }
    }
}
