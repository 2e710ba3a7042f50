use crate::wire::error::WireError;

/// Wire-level opcodes for the transport's own packets. Application opcodes
/// live inside Data/RawData payloads and are never interpreted here.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ControlCode {
    /// Opens a session: session id + proposed max datagram size
    SessionRequest,
    /// Answers a session open: negotiated size, session key, format flags
    SessionResponse,
    /// Several sub-packets combined into one datagram
    Combined,
    /// Teardown notice, carries a reason code
    Disconnect,
    /// Keeps an idle session from hitting the peer's idle timeout
    KeepAlive,
    /// One sequenced application packet
    Data,
    /// One sequenced piece of an oversized application message
    Fragment,
    /// Signals a sequenced packet arrived out of expected order
    OutOfOrderAck,
    /// Cumulative acknowledgment up through the carried sequence number
    Ack,
    /// Unsequenced, best-effort application packet
    RawData,
}

impl ControlCode {
    pub fn as_u16(self) -> u16 {
        match self {
            ControlCode::SessionRequest => 0x0001,
            ControlCode::SessionResponse => 0x0002,
            ControlCode::Combined => 0x0003,
            ControlCode::Disconnect => 0x0005,
            ControlCode::KeepAlive => 0x0006,
            ControlCode::Data => 0x0009,
            ControlCode::Fragment => 0x000D,
            ControlCode::OutOfOrderAck => 0x0011,
            ControlCode::Ack => 0x0015,
            ControlCode::RawData => 0x0019,
        }
    }

    pub fn from_u16(code: u16) -> Result<Self, WireError> {
        match code {
            0x0001 => Ok(ControlCode::SessionRequest),
            0x0002 => Ok(ControlCode::SessionResponse),
            0x0003 => Ok(ControlCode::Combined),
            0x0005 => Ok(ControlCode::Disconnect),
            0x0006 => Ok(ControlCode::KeepAlive),
            0x0009 => Ok(ControlCode::Data),
            0x000D => Ok(ControlCode::Fragment),
            0x0011 => Ok(ControlCode::OutOfOrderAck),
            0x0015 => Ok(ControlCode::Ack),
            0x0019 => Ok(ControlCode::RawData),
            // SECURITY: unrecognized codes come from malformed or malicious
            // packets and must not panic
            _ => Err(WireError::UnknownControlCode { code }),
        }
    }

    /// Handshake packets skip compression, obfuscation, and the checksum
    pub fn is_handshake(self) -> bool {
        matches!(self, ControlCode::SessionRequest | ControlCode::SessionResponse)
    }

    /// Sequenced packets carry a big-endian sequence number in the first two
    /// payload bytes
    pub fn is_sequenced(self) -> bool {
        matches!(self, ControlCode::Data | ControlCode::Fragment)
    }

    /// Single-byte header used by the legacy protocol variant. Bit 7 marks
    /// sequenced data, bit 6 distinguishes a fragment; control packets use
    /// their plain code in the low bits.
    pub fn to_legacy_byte(self) -> u8 {
        match self {
            ControlCode::Data => 0x80,
            ControlCode::Fragment => 0x80 | 0x40,
            other => other.as_u16() as u8,
        }
    }

    pub fn from_legacy_byte(byte: u8) -> Result<Self, WireError> {
        if byte & 0x80 != 0 {
            if byte & 0x40 != 0 {
                return Ok(ControlCode::Fragment);
            }
            return Ok(ControlCode::Data);
        }
        Self::from_u16(byte as u16)
    }
}
