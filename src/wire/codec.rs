use super::{
    checksum::keyed_checksum,
    decoder::Decoder,
    encoder::Encoder,
    error::WireError,
    obfuscate::{deobfuscate, obfuscate},
};

/// Serializes protocol packets to datagrams and back.
///
/// Outbound, for a non-handshake packet: the body (everything after the
/// opcode) is optionally compressed, then optionally obfuscated with the
/// session key, and a 16-bit checksum over the whole buffer plus the key is
/// appended. Handshake packets travel untouched, since the key that would
/// protect them is negotiated by them.
///
/// Inbound the steps run in reverse, and the checksum is validated before any
/// byte of the payload is interpreted.
pub struct WireCodec {
    session_key: u32,
    compressed: bool,
    obfuscated: bool,
    header_len: usize,
    encoder: Encoder,
    decoder: Decoder,
}

impl WireCodec {
    /// `header_len` is the width of the leading opcode field: 2 for the
    /// current protocol variant, 1 for the legacy bit-field variant.
    pub fn new(header_len: usize) -> Result<Self, WireError> {
        Ok(Self {
            session_key: 0,
            compressed: false,
            obfuscated: false,
            header_len,
            encoder: Encoder::new()?,
            decoder: Decoder::new()?,
        })
    }

    /// Installs the negotiated session key and format flags at handshake time
    pub fn rekey(&mut self, session_key: u32, compressed: bool, obfuscated: bool) {
        self.session_key = session_key;
        self.compressed = compressed;
        self.obfuscated = obfuscated;
    }

    pub fn session_key(&self) -> u32 {
        self.session_key
    }

    /// Turns a serialized packet into a finished datagram
    pub fn frame(&mut self, packet_bytes: &[u8], is_handshake: bool) -> Result<Vec<u8>, WireError> {
        if is_handshake {
            return Ok(packet_bytes.to_vec());
        }
        if packet_bytes.len() < self.header_len {
            return Err(WireError::ShortBuffer {
                needed: self.header_len,
                offset: 0,
                remaining: packet_bytes.len(),
            });
        }

        let (header, body) = packet_bytes.split_at(self.header_len);
        let mut out = Vec::with_capacity(packet_bytes.len() + 2);
        out.extend_from_slice(header);
        if self.compressed {
            out.extend_from_slice(self.encoder.encode(body)?);
        } else {
            out.extend_from_slice(body);
        }
        if self.obfuscated {
            obfuscate(&mut out[self.header_len..], self.session_key);
        }

        let checksum = keyed_checksum(&out, self.session_key);
        out.extend_from_slice(&checksum.to_be_bytes());
        Ok(out)
    }

    /// Validates and strips the datagram envelope, returning the serialized
    /// packet bytes. A checksum mismatch is fatal to the session; the caller
    /// handles that escalation.
    pub fn unframe(&mut self, datagram: &[u8], is_handshake: bool) -> Result<Vec<u8>, WireError> {
        if is_handshake {
            return Ok(datagram.to_vec());
        }
        if datagram.len() < self.header_len + 2 {
            return Err(WireError::TruncatedDatagram {
                size: datagram.len(),
            });
        }

        let (protected, trailer) = datagram.split_at(datagram.len() - 2);
        let received = u16::from_be_bytes([trailer[0], trailer[1]]);
        let computed = keyed_checksum(protected, self.session_key);
        if received != computed {
            return Err(WireError::ChecksumMismatch { computed, received });
        }

        let mut body = protected[self.header_len..].to_vec();
        if self.obfuscated {
            deobfuscate(&mut body, self.session_key);
        }

        let mut out = Vec::with_capacity(datagram.len());
        out.extend_from_slice(&protected[..self.header_len]);
        if self.compressed {
            out.extend_from_slice(self.decoder.decode(&body)?);
        } else {
            out.extend_from_slice(&body);
        }
        Ok(out)
    }
}
