//! Big-endian primitive writer.

use crate::error::{CodecError, CodecResult};
use crate::MAX_LENGTH;

/// Appends big-endian primitives to a caller-owned buffer.
///
/// The buffer is borrowed, not owned, so one scratch `Vec<u8>` can be
/// cleared and reused across many encode calls without hidden global state.
///
/// # Example
///
/// ```
/// use walden_codec::{Reader, Writer};
///
/// let mut buf = Vec::new();
/// let mut out = Writer::new(&mut buf);
/// out.put_i32(7);
/// out.put_str("seven").unwrap();
///
/// let mut input = Reader::new(&buf);
/// assert_eq!(input.get_i32().unwrap(), 7);
/// assert_eq!(input.get_str().unwrap(), "seven");
/// ```
#[derive(Debug)]
pub struct Writer<'a> {
    buf: &'a mut Vec<u8>,
}

impl<'a> Writer<'a> {
    /// Wraps `buf`; new bytes are appended after its current contents.
    pub fn new(buf: &'a mut Vec<u8>) -> Self {
        Self { buf }
    }

    /// Number of bytes in the underlying buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the underlying buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Writes one byte.
    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    /// Writes a boolean as a single 0/1 byte.
    pub fn put_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    /// Writes a big-endian `u16`.
    pub fn put_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Writes a big-endian `i16`.
    pub fn put_i16(&mut self, value: i16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Writes a big-endian `u32`.
    pub fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Writes a big-endian `i32`.
    pub fn put_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Writes a big-endian `u64`.
    pub fn put_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Writes a big-endian `i64`.
    pub fn put_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Writes an `f64` as its IEEE-754 bit pattern.
    pub fn put_f64(&mut self, value: f64) {
        self.put_u64(value.to_bits());
    }

    /// Writes bytes verbatim, without a length prefix.
    pub fn put_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Writes a collection length as a `u32`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::LengthOverflow`] above [`MAX_LENGTH`].
    pub fn put_len(&mut self, len: usize) -> CodecResult<()> {
        let len = checked_len(len)?;
        self.put_u32(len);
        Ok(())
    }

    /// Writes a `u32` length prefix followed by the bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::LengthOverflow`] above [`MAX_LENGTH`].
    pub fn put_bytes(&mut self, bytes: &[u8]) -> CodecResult<()> {
        self.put_len(bytes.len())?;
        self.put_raw(bytes);
        Ok(())
    }

    /// Writes a string as its UTF-8 byte length followed by the bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::LengthOverflow`] above [`MAX_LENGTH`].
    pub fn put_str(&mut self, value: &str) -> CodecResult<()> {
        self.put_bytes(value.as_bytes())
    }

    /// Writes a presence flag, then the string if present.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::LengthOverflow`] above [`MAX_LENGTH`].
    pub fn put_opt_str(&mut self, value: Option<&str>) -> CodecResult<()> {
        self.put_option(value, |out, s| out.put_str(s))
    }

    /// Writes a presence flag, then the value through `put` if present.
    ///
    /// # Errors
    ///
    /// Propagates errors from `put`.
    pub fn put_option<T, F>(&mut self, value: Option<T>, put: F) -> CodecResult<()>
    where
        F: FnOnce(&mut Self, T) -> CodecResult<()>,
    {
        match value {
            Some(value) => {
                self.put_bool(true);
                put(self, value)
            }
            None => {
                self.put_bool(false);
                Ok(())
            }
        }
    }
}

fn checked_len(len: usize) -> CodecResult<u32> {
    let len = len as u64;
    if len > MAX_LENGTH {
        return Err(CodecError::LengthOverflow {
            length: len,
            max: MAX_LENGTH,
        });
    }
    // MAX_LENGTH fits in u32
    Ok(len as u32)
}
