/// CRC-16/CCITT as used by SBF: polynomial 0x1021, zero initial value, no
/// reflection, no final xor.
pub fn crc16_ccitt(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in bytes {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_xmodem_check_value() {
        assert_eq!(crc16_ccitt(b"123456789"), 0x31c3);
    }

    #[test]
    fn empty_input_is_zero() {
        assert_eq!(crc16_ccitt(&[]), 0);
    }
}
