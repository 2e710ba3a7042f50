/// Reversible byte-obfuscation keyed by the session key.
///
/// Each byte is XORed with a keystream generated by a xorshift register seeded
/// from the key. XOR with the same keystream is its own inverse, so applying
/// the transform twice restores the original bytes. This is obfuscation, not
/// encryption.
pub fn obfuscate(bytes: &mut [u8], session_key: u32) {
    // xorshift needs a non-zero seed
    let mut state = session_key | 1;
    for byte in bytes.iter_mut() {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        *byte ^= state as u8;
    }
}

/// Reverses `obfuscate` (the transform is self-inverse)
pub fn deobfuscate(bytes: &mut [u8], session_key: u32) {
    obfuscate(bytes, session_key);
}
