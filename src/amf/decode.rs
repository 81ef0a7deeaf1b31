// AMF decoder

use byteorder::{BigEndian, ByteOrder};

use crate::error::{RtmpError, RtmpResult};

/// Cursor for AMF decoding
pub struct AmfDecodingCursor {
    /// Current position
    pos: usize,

    // Length
    len: usize,
}

impl AmfDecodingCursor {
    /// Creates a cursor over a buffer
    pub fn new(buffer: &[u8]) -> AmfDecodingCursor {
        AmfDecodingCursor {
            pos: 0,
            len: buffer.len(),
        }
    }

    /// Reads bytes
    pub fn read<'a>(&mut self, buffer: &'a [u8], n: usize) -> RtmpResult<&'a [u8]> {
        if self.pos + n > self.len {
            return Err(RtmpError::protocol("AMF value truncated"));
        }

        let pos = self.pos;
        self.pos += n;

        let r: &'a [u8] = &buffer[pos..(pos + n)];

        Ok(r)
    }

    /// Reads bytes, without changing the cursor
    pub fn look<'a>(&self, buffer: &'a [u8], n: usize) -> RtmpResult<&'a [u8]> {
        if self.pos + n > self.len {
            return Err(RtmpError::protocol("AMF value truncated"));
        }

        let r: &'a [u8] = &buffer[self.pos..(self.pos + n)];

        Ok(r)
    }

    /// Skips bytes
    pub fn skip(&mut self, n: usize) -> RtmpResult<()> {
        if self.pos + n > self.len {
            return Err(RtmpError::protocol("AMF value truncated"));
        }

        self.pos += n;

        Ok(())
    }

    /// Returns true if the cursor is at the end
    pub fn ended(&self) -> bool {
        self.pos >= self.len
    }

    /// Reads a single byte
    pub fn read_u8(&mut self, buffer: &[u8]) -> RtmpResult<u8> {
        let b = self.read(buffer, 1)?;
        Ok(b[0])
    }

    /// Reads a big-endian 16 bit integer
    pub fn read_u16_be(&mut self, buffer: &[u8]) -> RtmpResult<u16> {
        let b = self.read(buffer, 2)?;
        Ok(BigEndian::read_u16(b))
    }

    /// Reads a big-endian 32 bit integer
    pub fn read_u32_be(&mut self, buffer: &[u8]) -> RtmpResult<u32> {
        let b = self.read(buffer, 4)?;
        Ok(BigEndian::read_u32(b))
    }

    /// Reads a big-endian 64 bit float
    pub fn read_f64_be(&mut self, buffer: &[u8]) -> RtmpResult<f64> {
        let b = self.read(buffer, 8)?;
        Ok(BigEndian::read_f64(b))
    }

    /// Reads an UTF-8 string prefixed by a 16 bit length
    pub fn read_short_string(&mut self, buffer: &[u8]) -> RtmpResult<String> {
        let str_len = self.read_u16_be(buffer)? as usize;
        let str_bytes = self.read(buffer, str_len)?;
        Ok(String::from_utf8_lossy(str_bytes).into_owned())
    }

    /// Reads an UTF-8 string prefixed by a 32 bit length
    pub fn read_long_string(&mut self, buffer: &[u8]) -> RtmpResult<String> {
        let str_len = self.read_u32_be(buffer)? as usize;
        let str_bytes = self.read(buffer, str_len)?;
        Ok(String::from_utf8_lossy(str_bytes).into_owned())
    }
}
