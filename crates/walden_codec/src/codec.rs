//! The `Codec` trait and codecs for common value types.

use crate::error::CodecResult;
use crate::reader::Reader;
use crate::writer::Writer;
use std::sync::Arc;

/// Encodes and decodes values of one type.
///
/// Codecs for identifiers, aggregate state and events are composed into the
/// payload codecs that `walden_core` registers under serde ids. A codec
/// must decode exactly what it encoded:
/// `decode(encode(x)) == x` for every value it accepts.
pub trait Codec<T>: Send + Sync {
    /// Appends the encoding of `value` to `out`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be represented.
    fn encode(&self, value: &T, out: &mut Writer<'_>) -> CodecResult<()>;

    /// Reads one value from `input`.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is truncated or malformed.
    fn decode(&self, input: &mut Reader<'_>) -> CodecResult<T>;
}

impl<T, C: Codec<T> + ?Sized> Codec<T> for Arc<C> {
    fn encode(&self, value: &T, out: &mut Writer<'_>) -> CodecResult<()> {
        (**self).encode(value, out)
    }

    fn decode(&self, input: &mut Reader<'_>) -> CodecResult<T> {
        (**self).decode(input)
    }
}

impl<T, C: Codec<T> + ?Sized> Codec<T> for Box<C> {
    fn encode(&self, value: &T, out: &mut Writer<'_>) -> CodecResult<()> {
        (**self).encode(value, out)
    }

    fn decode(&self, input: &mut Reader<'_>) -> CodecResult<T> {
        (**self).decode(input)
    }
}

/// Encodes a value into a fresh buffer.
///
/// # Errors
///
/// Propagates the codec's encoding error.
pub fn encode_to_vec<T, C: Codec<T> + ?Sized>(codec: &C, value: &T) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::new();
    codec.encode(value, &mut Writer::new(&mut buf))?;
    Ok(buf)
}

/// Decodes a value that must occupy all of `bytes`.
///
/// # Errors
///
/// Propagates decoding errors and rejects trailing bytes.
pub fn decode_exact<T, C: Codec<T> + ?Sized>(codec: &C, bytes: &[u8]) -> CodecResult<T> {
    let mut input = Reader::new(bytes);
    let value = codec.decode(&mut input)?;
    input.finish()?;
    Ok(value)
}

/// Length-prefixed UTF-8 strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringCodec;

impl Codec<String> for StringCodec {
    fn encode(&self, value: &String, out: &mut Writer<'_>) -> CodecResult<()> {
        out.put_str(value)
    }

    fn decode(&self, input: &mut Reader<'_>) -> CodecResult<String> {
        input.get_str()
    }
}

/// Big-endian `i64`.
#[derive(Debug, Clone, Copy, Default)]
pub struct I64Codec;

impl Codec<i64> for I64Codec {
    fn encode(&self, value: &i64, out: &mut Writer<'_>) -> CodecResult<()> {
        out.put_i64(*value);
        Ok(())
    }

    fn decode(&self, input: &mut Reader<'_>) -> CodecResult<i64> {
        input.get_i64()
    }
}

/// Big-endian `u64`.
#[derive(Debug, Clone, Copy, Default)]
pub struct U64Codec;

impl Codec<u64> for U64Codec {
    fn encode(&self, value: &u64, out: &mut Writer<'_>) -> CodecResult<()> {
        out.put_u64(*value);
        Ok(())
    }

    fn decode(&self, input: &mut Reader<'_>) -> CodecResult<u64> {
        input.get_u64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CodecError;

    #[test]
    fn string_codec() {
        let bytes = encode_to_vec(&StringCodec, &"hello".to_string()).unwrap();
        assert_eq!(decode_exact(&StringCodec, &bytes).unwrap(), "hello");
    }

    #[test]
    fn decode_exact_rejects_trailing_bytes() {
        let mut bytes = encode_to_vec(&I64Codec, &-5).unwrap();
        bytes.push(0);
        assert_eq!(
            decode_exact(&I64Codec, &bytes),
            Err(CodecError::TrailingBytes { remaining: 1 })
        );
    }

    #[test]
    fn shared_codec_objects() {
        let codec: Arc<dyn Codec<u64>> = Arc::new(U64Codec);
        let bytes = encode_to_vec(&codec, &u64::MAX).unwrap();
        assert_eq!(bytes, [0xFF; 8]);
        assert_eq!(decode_exact(&codec, &bytes).unwrap(), u64::MAX);
    }
}
