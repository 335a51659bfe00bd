//! Big-endian primitive reader.

use crate::error::{CodecError, CodecResult};
use crate::MAX_LENGTH;

/// Reads big-endian primitives from a byte slice.
///
/// Every getter fails with [`CodecError::UnexpectedEof`] instead of
/// panicking when the input runs out, and length prefixes are checked
/// against both [`MAX_LENGTH`] and the bytes actually remaining, so a
/// corrupted length can never trigger a huge allocation.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Creates a reader positioned at the start of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current read position.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Number of unread bytes.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Whether all bytes have been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Fails unless every byte has been consumed.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::TrailingBytes`] if input remains.
    pub fn finish(&self) -> CodecResult<()> {
        match self.remaining() {
            0 => Ok(()),
            remaining => Err(CodecError::TrailingBytes { remaining }),
        }
    }

    /// Reads `len` bytes verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnexpectedEof`] if fewer bytes remain.
    pub fn get_raw(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(CodecError::UnexpectedEof);
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn get_array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.get_raw(N)?);
        Ok(out)
    }

    /// Reads one byte.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnexpectedEof`] at end of input.
    pub fn get_u8(&mut self) -> CodecResult<u8> {
        Ok(self.get_array::<1>()?[0])
    }

    /// Reads a 0/1 boolean byte.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidStructure`] for any other byte value.
    pub fn get_bool(&mut self) -> CodecResult<bool> {
        match self.get_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::invalid_structure(format!(
                "boolean byte must be 0 or 1, found {other}"
            ))),
        }
    }

    /// Reads a big-endian `u16`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnexpectedEof`] at end of input.
    pub fn get_u16(&mut self) -> CodecResult<u16> {
        Ok(u16::from_be_bytes(self.get_array()?))
    }

    /// Reads a big-endian `i16`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnexpectedEof`] at end of input.
    pub fn get_i16(&mut self) -> CodecResult<i16> {
        Ok(i16::from_be_bytes(self.get_array()?))
    }

    /// Reads a big-endian `u32`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnexpectedEof`] at end of input.
    pub fn get_u32(&mut self) -> CodecResult<u32> {
        Ok(u32::from_be_bytes(self.get_array()?))
    }

    /// Reads a big-endian `i32`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnexpectedEof`] at end of input.
    pub fn get_i32(&mut self) -> CodecResult<i32> {
        Ok(i32::from_be_bytes(self.get_array()?))
    }

    /// Reads a big-endian `u64`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnexpectedEof`] at end of input.
    pub fn get_u64(&mut self) -> CodecResult<u64> {
        Ok(u64::from_be_bytes(self.get_array()?))
    }

    /// Reads a big-endian `i64`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnexpectedEof`] at end of input.
    pub fn get_i64(&mut self) -> CodecResult<i64> {
        Ok(i64::from_be_bytes(self.get_array()?))
    }

    /// Reads an `f64` from its IEEE-754 bit pattern.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnexpectedEof`] at end of input.
    pub fn get_f64(&mut self) -> CodecResult<f64> {
        Ok(f64::from_bits(self.get_u64()?))
    }

    /// Reads a collection length written by [`crate::Writer::put_len`].
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::LengthOverflow`] above [`MAX_LENGTH`].
    pub fn get_len(&mut self) -> CodecResult<usize> {
        let len = u64::from(self.get_u32()?);
        if len > MAX_LENGTH {
            return Err(CodecError::LengthOverflow {
                length: len,
                max: MAX_LENGTH,
            });
        }
        Ok(len as usize)
    }

    /// Reads a length-prefixed byte string.
    ///
    /// # Errors
    ///
    /// Returns an error if the length is too large or the input too short.
    pub fn get_bytes(&mut self) -> CodecResult<&'a [u8]> {
        let len = self.get_len()?;
        self.get_raw(len)
    }

    /// Reads a length-prefixed UTF-8 string.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidUtf8`] for malformed text.
    pub fn get_str(&mut self) -> CodecResult<String> {
        let bytes = self.get_bytes()?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8)
    }

    /// Reads a presence flag and, if set, a string.
    ///
    /// # Errors
    ///
    /// Returns an error for a bad flag or a malformed string.
    pub fn get_opt_str(&mut self) -> CodecResult<Option<String>> {
        self.get_option(Self::get_str)
    }

    /// Reads a presence flag and, if set, a value through `get`.
    ///
    /// # Errors
    ///
    /// Returns an error for a bad flag or propagates errors from `get`.
    pub fn get_option<T, F>(&mut self, get: F) -> CodecResult<Option<T>>
    where
        F: FnOnce(&mut Self) -> CodecResult<T>,
    {
        if self.get_bool()? {
            get(self).map(Some)
        } else {
            Ok(None)
        }
    }
}
