//! A codec for any serde type, carried as an embedded CBOR document.

use crate::codec::Codec;
use crate::error::{CodecError, CodecResult};
use crate::reader::Reader;
use crate::writer::Writer;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;

/// Encodes `T` with ciborium and stores the result as a length-prefixed
/// byte string.
///
/// Hand-written codecs are more compact and keep the wire format under
/// explicit control; this one trades that for zero boilerplate on types
/// that already derive `Serialize`/`Deserialize`. Renaming or reordering
/// serde fields changes what old records decode to, the same as with any
/// other codec.
///
/// # Example
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use walden_codec::{decode_exact, encode_to_vec, CborCodec};
///
/// #[derive(Debug, PartialEq, Serialize, Deserialize)]
/// struct Note { text: String, pinned: bool }
///
/// let codec = CborCodec::<Note>::new();
/// let note = Note { text: "hi".into(), pinned: true };
/// let bytes = encode_to_vec(&codec, &note).unwrap();
/// assert_eq!(decode_exact(&codec, &bytes).unwrap(), note);
/// ```
pub struct CborCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> CborCodec<T> {
    /// Creates the codec.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for CborCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for CborCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for CborCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CborCodec")
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> Codec<T> for CborCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T, out: &mut Writer<'_>) -> CodecResult<()> {
        let mut document = Vec::new();
        ciborium::into_writer(value, &mut document)
            .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
        out.put_bytes(&document)
    }

    fn decode(&self, input: &mut Reader<'_>) -> CodecResult<T> {
        let document = input.get_bytes()?;
        ciborium::from_reader(document).map_err(|e| CodecError::decoding_failed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_exact, encode_to_vec};
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Waypoint {
        name: String,
        elevation: Option<i32>,
        tags: BTreeMap<String, String>,
    }

    #[test]
    fn serde_type_round_trip() {
        let codec = CborCodec::<Waypoint>::new();
        let mut tags = BTreeMap::new();
        tags.insert("kind".to_string(), "summit".to_string());
        let value = Waypoint {
            name: "Halti".into(),
            elevation: Some(1324),
            tags,
        };

        let bytes = encode_to_vec(&codec, &value).unwrap();
        assert_eq!(decode_exact(&codec, &bytes).unwrap(), value);
    }

    #[test]
    fn garbage_document_is_a_decoding_error() {
        let codec = CborCodec::<Waypoint>::new();
        let bytes = [0, 0, 0, 2, 0xFF, 0xFF];
        assert!(matches!(
            decode_exact(&codec, &bytes),
            Err(CodecError::DecodingFailed { .. })
        ));
    }
}
