use super::error::WireError;

/// A cursor over received bytes where every read is bounds-checked. Reads that
/// would run past the end fail cleanly with `WireError::ShortBuffer` instead
/// of touching memory past the buffer.
pub struct PacketReader<'a> {
    buffer: &'a [u8],
    cursor: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, cursor: 0 }
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.cursor
    }

    fn check(&self, needed: usize) -> Result<(), WireError> {
        if self.remaining() < needed {
            return Err(WireError::ShortBuffer {
                needed,
                offset: self.cursor,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        self.check(1)?;
        let value = self.buffer[self.cursor];
        self.cursor += 1;
        Ok(value)
    }

    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        self.check(2)?;
        let value = u16::from_be_bytes([self.buffer[self.cursor], self.buffer[self.cursor + 1]]);
        self.cursor += 2;
        Ok(value)
    }

    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        self.check(4)?;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.buffer[self.cursor..self.cursor + 4]);
        self.cursor += 4;
        Ok(u32::from_be_bytes(bytes))
    }

    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8], WireError> {
        self.check(length)?;
        let slice = &self.buffer[self.cursor..self.cursor + length];
        self.cursor += length;
        Ok(slice)
    }

    /// Consumes and returns everything left in the buffer
    pub fn read_to_end(&mut self) -> &'a [u8] {
        let slice = &self.buffer[self.cursor..];
        self.cursor = self.buffer.len();
        slice
    }
}

#[cfg(test)]
mod reader_tests {
    use super::{PacketReader, WireError};

    #[test]
    fn reads_big_endian_fields() {
        let bytes = [0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0x03];
        let mut reader = PacketReader::new(&bytes);
        assert_eq!(reader.read_u8().unwrap(), 1);
        assert_eq!(reader.read_u16().unwrap(), 2);
        assert_eq!(reader.read_u32().unwrap(), 3);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn short_read_fails_cleanly() {
        let bytes = [0x00];
        let mut reader = PacketReader::new(&bytes);
        let result = reader.read_u16();
        assert_eq!(
            result,
            Err(WireError::ShortBuffer {
                needed: 2,
                offset: 0,
                remaining: 1,
            })
        );
        // cursor is untouched by a failed read
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn read_to_end_consumes_rest() {
        let bytes = [0xAA, 0xBB, 0xCC];
        let mut reader = PacketReader::new(&bytes);
        reader.read_u8().unwrap();
        assert_eq!(reader.read_to_end(), &[0xBB, 0xCC]);
        assert_eq!(reader.remaining(), 0);
    }
}
