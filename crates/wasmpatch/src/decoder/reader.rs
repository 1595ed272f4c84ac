//! Bounds-checked cursor over a WebAssembly binary.

use crate::error::{DecodeError, DecodeErrorKind};

pub type Result<T> = std::result::Result<T, DecodeError>;

/// Binary reader with position tracking.
///
/// `base` is the absolute offset of `data[0]` in the original input, so
/// errors raised by a sub-reader still point into the whole file.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            base: 0,
        }
    }

    /// Absolute offset of the next byte to be read.
    pub fn offset(&self) -> usize {
        self.base + self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn error(&self, kind: DecodeErrorKind) -> DecodeError {
        DecodeError::new(kind, self.offset())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or_else(|| self.error(DecodeErrorKind::UnexpectedEof))?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(self.error(DecodeErrorKind::UnexpectedEof));
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    /// Consumes everything left in this reader.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let bytes = &self.data[self.pos..];
        self.pos = self.data.len();
        bytes
    }

    /// Little-endian fixed-width u32 (header version, f32 immediates).
    pub fn read_fixed_u32(&mut self) -> Result<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.read_unsigned(32).map(|v| v as u32)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.read_signed(32).map(|v| v as i32)
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.read_signed(64)
    }

    /// Unsigned LEB128 of at most `ceil(bits / 7)` bytes. The last permitted
    /// byte must not set the continuation bit nor any bit beyond `bits`.
    fn read_unsigned(&mut self, bits: u32) -> Result<u64> {
        let start = self.offset();
        let max_bytes = bits.div_ceil(7);
        let mut result = 0u64;
        let mut shift = 0u32;
        for i in 0..max_bytes {
            let byte = self.read_u8()?;
            if i == max_bytes - 1 {
                if byte & 0x80 != 0 {
                    return Err(DecodeError::new(
                        DecodeErrorKind::MalformedInteger { bits },
                        start,
                    ));
                }
                let unused = 0x7f & !((1u8 << (bits - shift)) - 1);
                if byte & unused != 0 {
                    return Err(DecodeError::new(
                        DecodeErrorKind::IntegerTooLarge { bits },
                        start,
                    ));
                }
            }
            result |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        Ok(result)
    }

    /// Signed LEB128 with the same length rule; on the last permitted byte the
    /// bits above the value's sign bit must all repeat the sign.
    fn read_signed(&mut self, bits: u32) -> Result<i64> {
        let start = self.offset();
        let max_bytes = bits.div_ceil(7);
        let mut result = 0i64;
        let mut shift = 0u32;
        let mut byte;
        let mut i = 0;
        loop {
            byte = self.read_u8()?;
            if i == max_bytes - 1 {
                if byte & 0x80 != 0 {
                    return Err(DecodeError::new(
                        DecodeErrorKind::MalformedInteger { bits },
                        start,
                    ));
                }
                let sign_and_unused = (0x7fu8 << (bits - shift - 1)) & 0x7f;
                let high = byte & sign_and_unused;
                if high != 0 && high != sign_and_unused {
                    return Err(DecodeError::new(
                        DecodeErrorKind::IntegerTooLarge { bits },
                        start,
                    ));
                }
            }
            result |= i64::from(byte & 0x7f) << shift;
            shift += 7;
            i += 1;
            if byte & 0x80 == 0 {
                break;
            }
        }
        if shift < 64 && byte & 0x40 != 0 {
            result |= !0i64 << shift;
        }
        Ok(result)
    }

    /// Reads a vector count, rejecting counts that could not possibly fit in
    /// the bytes left (every element takes at least one byte).
    pub fn read_count(&mut self) -> Result<u32> {
        let start = self.offset();
        let count = self.read_u32()?;
        if count as usize > self.remaining() {
            return Err(DecodeError::new(
                DecodeErrorKind::CountTooLarge {
                    count,
                    remaining: self.remaining(),
                },
                start,
            ));
        }
        Ok(count)
    }

    /// Reads a count-prefixed vector, decoding each element with `f`.
    pub fn read_vec<T>(&mut self, mut f: impl FnMut(&mut Self) -> Result<T>) -> Result<Vec<T>> {
        let count = self.read_count()?;
        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            items.push(f(self)?);
        }
        Ok(items)
    }

    /// Length-prefixed byte string.
    pub fn read_byte_vec(&mut self) -> Result<&'a [u8]> {
        let len = self.read_count()?;
        self.read_bytes(len as usize)
    }

    /// Length-prefixed UTF-8 string.
    pub fn read_name(&mut self) -> Result<String> {
        let start = self.offset();
        let bytes = self.read_byte_vec()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| DecodeError::new(DecodeErrorKind::InvalidUtf8, start))
    }

    /// Splits off the next `len` bytes as an independent reader.
    pub fn sub_reader(&mut self, len: u32) -> Result<Reader<'a>> {
        if len as usize > self.remaining() {
            return Err(self.error(DecodeErrorKind::LengthOverrun {
                declared: len,
                remaining: self.remaining(),
            }));
        }
        let base = self.offset();
        let data = self.read_bytes(len as usize)?;
        Ok(Reader { data, pos: 0, base })
    }

    /// Fails unless every byte of this reader has been consumed.
    pub fn finish(&self) -> Result<()> {
        if !self.is_empty() {
            return Err(DecodeError::new(
                DecodeErrorKind::SizeMismatch {
                    declared: self.data.len(),
                    consumed: self.pos,
                },
                self.base,
            ));
        }
        Ok(())
    }
}
