//! CRC-32 (IEEE 802.3, reflected polynomial `0xEDB88320`) as used by GPT.

pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = crc_any::CRC::crc32();
    crc.digest(data);

    crc.get_crc() as u32
}

#[cfg(test)]
mod tests {
    use super::crc32;

    #[test]
    fn empty_buffer() {
        assert_eq!(crc32(&[]), 0);
    }

    #[test]
    fn check_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn deterministic_and_sensitive() {
        let mut data = vec![0x5a; 16384];
        let first = crc32(&data);
        assert_eq!(first, crc32(&data));

        data[8191] ^= 1;
        assert_ne!(first, crc32(&data));
    }
}
