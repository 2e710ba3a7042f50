use thiserror::Error;

/// Errors that can occur while reading, framing, or unframing wire bytes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// A checked read ran past the end of the buffer
    #[error("Buffer too short: needed {needed} bytes at offset {offset}, {remaining} remain")]
    ShortBuffer {
        needed: usize,
        offset: usize,
        remaining: usize,
    },

    /// Datagram is too small to carry its header and trailing checksum
    #[error("Datagram of {size} bytes is too short for header and checksum")]
    TruncatedDatagram { size: usize },

    /// Trailing checksum did not match (SECURITY: the datagram cannot be trusted)
    #[error("Checksum mismatch: computed {computed:#06x}, received {received:#06x}")]
    ChecksumMismatch { computed: u16, received: u16 },

    /// Control code not recognized (possibly a malformed or malicious packet)
    #[error("Unknown control code {code:#06x}")]
    UnknownControlCode { code: u16 },

    /// A combined sub-packet announced more bytes than remain in the buffer
    #[error("Combined sub-packet length {length} exceeds remaining {remaining} bytes")]
    BadSubPacketLength { length: usize, remaining: usize },

    /// A sub-packet was too large for the combined framing to express
    #[error("Sub-packet of {length} bytes exceeds the combined framing limit")]
    SubPacketTooLarge { length: usize },

    /// Decompression failed (possibly a malformed or malicious payload)
    #[error("Failed to decompress payload of {payload_size} bytes")]
    DecompressionFailed { payload_size: usize },

    /// Compression failed
    #[error("Failed to compress payload of {payload_size} bytes")]
    CompressionFailed { payload_size: usize },
}
