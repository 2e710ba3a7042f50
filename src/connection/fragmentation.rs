use crate::{
    connection::error::FragmentError,
    wire::{reader::PacketReader, writer::PacketWriter},
};

/// Bytes reserved per datagram for the wire envelope around a sequenced
/// payload (opcode, sequence number, checksum, and slack). A logical message
/// larger than `max_size - FRAGMENT_RESERVE` must be fragmented.
pub const FRAGMENT_RESERVE: usize = 8;

/// Largest application payload a single sequenced packet may carry
pub fn fragment_threshold(max_size: u32) -> usize {
    (max_size as usize).saturating_sub(FRAGMENT_RESERVE)
}

/// Splits an oversized application message into fragment payloads, each
/// already carrying the two-byte sequence placeholder. The leading fragment
/// carries a big-endian u32 total length; trailing fragments are bare chunks.
pub fn split_message(app_bytes: &[u8], max_size: u32) -> Vec<Vec<u8>> {
    let usable = fragment_threshold(max_size).max(FRAGMENT_RESERVE);
    let mut fragments = Vec::new();

    let first_chunk_len = usable.saturating_sub(4).min(app_bytes.len());
    let mut writer = PacketWriter::with_capacity(2 + 4 + first_chunk_len);
    writer.write_u16(0); // sequence placeholder
    writer.write_u32(app_bytes.len() as u32);
    writer.write_bytes(&app_bytes[..first_chunk_len]);
    fragments.push(writer.into_bytes());

    let mut offset = first_chunk_len;
    while offset < app_bytes.len() {
        let chunk_len = usable.min(app_bytes.len() - offset);
        let mut writer = PacketWriter::with_capacity(2 + chunk_len);
        writer.write_u16(0); // sequence placeholder
        writer.write_bytes(&app_bytes[offset..offset + chunk_len]);
        fragments.push(writer.into_bytes());
        offset += chunk_len;
    }

    fragments
}

/// Collects the chunks of one in-flight multi-fragment message. Only one of
/// these exists per session at a time; it is destroyed the instant the final
/// fragment arrives.
#[derive(Debug)]
pub struct ReassemblyBuffer {
    announced: usize,
    buffer: Vec<u8>,
}

impl ReassemblyBuffer {
    /// Opens a buffer from the leading fragment's chunk (total-length prefix
    /// included). `limit` guards against hostile length announcements.
    pub fn open(lead_chunk: &[u8], limit: usize) -> Result<Self, FragmentError> {
        let mut reader = PacketReader::new(lead_chunk);
        let announced = reader
            .read_u32()
            .map_err(|_| FragmentError::ShortLeadFragment {
                actual: lead_chunk.len(),
            })? as usize;

        if announced > limit {
            return Err(FragmentError::AnnouncedLengthTooLarge { announced, limit });
        }

        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(announced)
            .map_err(|_| FragmentError::AllocationFailed { bytes: announced })?;

        let mut reassembly = Self { announced, buffer };
        reassembly.push(reader.read_to_end())?;
        Ok(reassembly)
    }

    /// Appends a trailing fragment's chunk at the current offset
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), FragmentError> {
        if self.buffer.len() + chunk.len() > self.announced {
            return Err(FragmentError::Overflow {
                offset: self.buffer.len(),
                chunk: chunk.len(),
                announced: self.announced,
            });
        }
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.buffer.len() == self.announced
    }

    pub fn announced(&self) -> usize {
        self.announced
    }

    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    pub fn take(self) -> Vec<u8> {
        self.buffer
    }
}
