//! Dallas/Maxim CRC-8 (reflected polynomial 0x8C, init 0x00, no final xor).

const POLY: u8 = 0x8c;

const TABLE: [u8; 256] = build_table();

const fn build_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x01 != 0 { (crc >> 1) ^ POLY } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

pub fn calculate(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |crc, b| TABLE[(crc ^ b) as usize])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_head_matches_maxim() {
        assert_eq!(&TABLE[..8], &[0x00, 0x5e, 0xbc, 0xe2, 0x61, 0x3f, 0xdd, 0x83]);
    }

    #[test]
    fn check_value() {
        assert_eq!(calculate(b"123456789"), 0xa1);
    }

    #[test]
    fn empty_input_is_zero() {
        assert_eq!(calculate(&[]), 0x00);
    }
}
