//! Growable output buffer with minimal LEB128 writers.

use crate::error::EncodeError;

#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, byte: u8) {
        self.buf.push(byte);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_u32(&mut self, mut value: u32) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.buf.push(byte);
                return;
            }
            self.buf.push(byte | 0x80);
        }
    }

    pub fn write_i32(&mut self, value: i32) {
        // A sign-extended i32 has the same minimal encoding.
        self.write_i64(i64::from(value));
    }

    pub fn write_i64(&mut self, mut value: i64) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            let sign_clear = byte & 0x40 == 0;
            if (value == 0 && sign_clear) || (value == -1 && !sign_clear) {
                self.buf.push(byte);
                return;
            }
            self.buf.push(byte | 0x80);
        }
    }

    /// Writes a length or count, failing if it cannot be represented.
    pub fn write_len(&mut self, len: usize, what: &'static str) -> Result<(), EncodeError> {
        let len = u32::try_from(len).map_err(|_| EncodeError::TooLarge { what, len })?;
        self.write_u32(len);
        Ok(())
    }

    pub fn write_byte_vec(&mut self, bytes: &[u8], what: &'static str) -> Result<(), EncodeError> {
        self.write_len(bytes.len(), what)?;
        self.write_bytes(bytes);
        Ok(())
    }

    pub fn write_name(&mut self, name: &str) -> Result<(), EncodeError> {
        self.write_byte_vec(name.as_bytes(), "name")
    }

    /// Count-prefixed vector.
    pub fn write_vec<T>(
        &mut self,
        items: &[T],
        what: &'static str,
        mut f: impl FnMut(&mut Self, &T) -> Result<(), EncodeError>,
    ) -> Result<(), EncodeError> {
        self.write_len(items.len(), what)?;
        for item in items {
            f(self, item)?;
        }
        Ok(())
    }
}
