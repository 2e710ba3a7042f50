use crate::{
    protocol::{control_code::ControlCode, stream_type::StreamType},
    wire::{error::WireError, reader::PacketReader, writer::PacketWriter},
};

/// Marker byte in combined framing for a two-byte sub-packet length
const EXTENDED_LENGTH_MARKER: u8 = 0xFF;

/// A wire-level unit: a control code plus raw body bytes. For sequenced codes
/// the first two body bytes are the big-endian sequence number.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtocolPacket {
    pub code: ControlCode,
    pub payload: Vec<u8>,
}

impl ProtocolPacket {
    pub fn new(code: ControlCode, payload: Vec<u8>) -> Self {
        Self { code, payload }
    }

    /// Reads the sequence number out of a sequenced packet's payload
    pub fn sequence(&self) -> Result<u16, WireError> {
        PacketReader::new(&self.payload).read_u16()
    }

    /// Overwrites the sequence field. The payload must have been built with
    /// the two-byte placeholder in front.
    pub fn set_sequence(&mut self, sequence: u16) -> Result<(), WireError> {
        if self.payload.len() < 2 {
            return Err(WireError::ShortBuffer {
                needed: 2,
                offset: 0,
                remaining: self.payload.len(),
            });
        }
        self.payload[0..2].copy_from_slice(&sequence.to_be_bytes());
        Ok(())
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut writer = PacketWriter::with_capacity(2 + self.payload.len());
        writer.write_u16(self.code.as_u16());
        writer.write_bytes(&self.payload);
        writer.into_bytes()
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, WireError> {
        let mut reader = PacketReader::new(bytes);
        let code = ControlCode::from_u16(reader.read_u16()?)?;
        Ok(Self {
            code,
            payload: reader.read_to_end().to_vec(),
        })
    }

    /// Serialized size on the wire, before the codec adds its trailer
    pub fn wire_len(&self) -> usize {
        2 + self.payload.len()
    }
}

/// An opaque application message: an opcode plus a byte payload, meaningful
/// only to collaborators outside this transport core.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApplicationPacket {
    pub opcode: u16,
    pub payload: Vec<u8>,
}

/// Serializes an application packet body: opcode of the stream's width, then
/// the payload bytes.
pub fn write_app_packet(writer: &mut PacketWriter, opcode: u16, payload: &[u8], stream: StreamType) {
    match stream.opcode_width() {
        1 => writer.write_u8(opcode as u8),
        _ => writer.write_u16(opcode),
    }
    writer.write_bytes(payload);
}

/// Parses an application packet body per the stream's opcode width
pub fn read_app_packet(bytes: &[u8], stream: StreamType) -> Result<ApplicationPacket, WireError> {
    let mut reader = PacketReader::new(bytes);
    let opcode = match stream.opcode_width() {
        1 => reader.read_u8()? as u16,
        _ => reader.read_u16()?,
    };
    Ok(ApplicationPacket {
        opcode,
        payload: reader.read_to_end().to_vec(),
    })
}

/// Bytes a sub-packet's length prefix occupies inside a combined buffer
pub fn sub_packet_frame_len(sub_len: usize) -> usize {
    if sub_len < EXTENDED_LENGTH_MARKER as usize {
        1 + sub_len
    } else {
        3 + sub_len
    }
}

/// Appends one sub-packet with its length prefix: a single byte for lengths
/// 0-254, or the 0xFF marker followed by a big-endian u16.
pub fn write_sub_packet(writer: &mut PacketWriter, bytes: &[u8]) -> Result<(), WireError> {
    if bytes.len() < EXTENDED_LENGTH_MARKER as usize {
        writer.write_u8(bytes.len() as u8);
    } else if bytes.len() <= u16::MAX as usize {
        writer.write_u8(EXTENDED_LENGTH_MARKER);
        writer.write_u16(bytes.len() as u16);
    } else {
        return Err(WireError::SubPacketTooLarge { length: bytes.len() });
    }
    writer.write_bytes(bytes);
    Ok(())
}

/// Splits a combined-packet payload into its raw sub-packet frames
pub fn split_combined(payload: &[u8]) -> Result<Vec<&[u8]>, WireError> {
    let mut reader = PacketReader::new(payload);
    let mut frames = Vec::new();
    while reader.remaining() > 0 {
        let first = reader.read_u8()?;
        let length = if first == EXTENDED_LENGTH_MARKER {
            reader.read_u16()? as usize
        } else {
            first as usize
        };
        if length > reader.remaining() {
            return Err(WireError::BadSubPacketLength {
                length,
                remaining: reader.remaining(),
            });
        }
        frames.push(reader.read_bytes(length)?);
    }
    Ok(frames)
}

/// Splits a combined-packet payload back into parsed sub-packets
pub fn parse_combined(payload: &[u8]) -> Result<Vec<ProtocolPacket>, WireError> {
    let mut packets = Vec::new();
    for frame in split_combined(payload)? {
        packets.push(ProtocolPacket::parse(frame)?);
    }
    Ok(packets)
}

/// Session-open request body
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionRequest {
    pub session_id: u32,
    pub max_length: u32,
}

impl SessionRequest {
    pub fn write(&self, writer: &mut PacketWriter) {
        writer.write_u32(self.session_id);
        writer.write_u32(self.max_length);
    }

    pub fn read(reader: &mut PacketReader) -> Result<Self, WireError> {
        Ok(Self {
            session_id: reader.read_u32()?,
            max_length: reader.read_u32()?,
        })
    }
}

/// Session-open response body
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionResponse {
    pub session_id: u32,
    pub session_key: u32,
    pub compressed: bool,
    pub obfuscated: bool,
    pub max_length: u32,
}

impl SessionResponse {
    pub fn write(&self, writer: &mut PacketWriter) {
        writer.write_u32(self.session_id);
        writer.write_u32(self.session_key);
        writer.write_u8(self.compressed as u8);
        writer.write_u8(self.obfuscated as u8);
        writer.write_u32(self.max_length);
    }

    pub fn read(reader: &mut PacketReader) -> Result<Self, WireError> {
        Ok(Self {
            session_id: reader.read_u32()?,
            session_key: reader.read_u32()?,
            compressed: reader.read_u8()? != 0,
            obfuscated: reader.read_u8()? != 0,
            max_length: reader.read_u32()?,
        })
    }
}

/// Why a disconnect notice was sent
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DisconnectReason {
    Unknown,
    /// The application asked for an orderly close
    Application,
    /// The idle timeout fired
    Timeout,
    /// The peer broke the handshake rules
    ProtocolViolation,
    /// A datagram failed checksum validation
    CorruptPacket,
    /// The peer initiated the teardown
    OtherSideTerminated,
}

impl DisconnectReason {
    pub fn as_u16(self) -> u16 {
        match self {
            DisconnectReason::Unknown => 0,
            DisconnectReason::Application => 1,
            DisconnectReason::Timeout => 2,
            DisconnectReason::ProtocolViolation => 3,
            DisconnectReason::CorruptPacket => 4,
            DisconnectReason::OtherSideTerminated => 5,
        }
    }

    /// Unrecognized reason codes collapse to Unknown rather than erroring;
    /// the session is coming down either way.
    pub fn from_u16(code: u16) -> Self {
        match code {
            1 => DisconnectReason::Application,
            2 => DisconnectReason::Timeout,
            3 => DisconnectReason::ProtocolViolation,
            4 => DisconnectReason::CorruptPacket,
            5 => DisconnectReason::OtherSideTerminated,
            _ => DisconnectReason::Unknown,
        }
    }
}

/// Disconnect notice body
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Disconnect {
    pub session_id: u32,
    pub reason: DisconnectReason,
}

impl Disconnect {
    pub fn write(&self, writer: &mut PacketWriter) {
        writer.write_u32(self.session_id);
        writer.write_u16(self.reason.as_u16());
    }

    pub fn read(reader: &mut PacketReader) -> Result<Self, WireError> {
        Ok(Self {
            session_id: reader.read_u32()?,
            reason: DisconnectReason::from_u16(reader.read_u16()?),
        })
    }
}
