/// 16-bit CRC (CCITT polynomial) over a buffer, seeded from the session key.
///
/// Both halves of the 32-bit session key are folded into the initial register
/// so that two sessions with different keys disagree on every checksum.
pub fn keyed_checksum(bytes: &[u8], session_key: u32) -> u16 {
    const POLY: u16 = 0x1021;

    let mut crc: u16 = ((session_key >> 16) as u16) ^ (session_key as u16) ^ 0xFFFF;
    for &byte in bytes {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ POLY;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}
