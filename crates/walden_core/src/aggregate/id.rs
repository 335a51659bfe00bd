//! Random aggregate identifiers.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use walden_codec::{Codec, CodecError, CodecResult, Reader, Writer};

/// Length of a [`NanoId`] in characters.
pub const NANO_ID_LENGTH: usize = 21;

/// Characters a [`NanoId`] is drawn from.
pub const NANO_ID_ALPHABET: &[u8; 64] =
    b"_-0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// A string that is not a valid [`NanoId`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid nano id {value:?}: {reason}")]
pub struct InvalidNanoId {
    /// The rejected input.
    pub value: String,
    /// What is wrong with it.
    pub reason: &'static str,
}

/// A 21-character random identifier.
///
/// Drawn uniformly from a 64-symbol URL-safe alphabet, which gives 126
/// random bits. Immutable once created and validated on every parse.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NanoId([u8; NANO_ID_LENGTH]);

impl NanoId {
    /// Generates a new random id.
    #[must_use]
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let mut bytes = [0u8; NANO_ID_LENGTH];
        for byte in &mut bytes {
            *byte = NANO_ID_ALPHABET[rng.gen_range(0..NANO_ID_ALPHABET.len())];
        }
        Self(bytes)
    }

    /// Validates and wraps `value`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidNanoId`] for the wrong length or a character
    /// outside [`NANO_ID_ALPHABET`].
    pub fn parse(value: &str) -> Result<Self, InvalidNanoId> {
        Self::from_slice(value.as_bytes()).map_err(|reason| InvalidNanoId {
            value: value.to_string(),
            reason,
        })
    }

    fn from_slice(bytes: &[u8]) -> Result<Self, &'static str> {
        let bytes: [u8; NANO_ID_LENGTH] = bytes
            .try_into()
            .map_err(|_| "expected 21 characters")?;
        if !bytes.iter().all(|b| NANO_ID_ALPHABET.contains(b)) {
            return Err("character outside the nano id alphabet");
        }
        Ok(Self(bytes))
    }

    /// The id as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        // only ASCII alphabet bytes are ever stored
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl fmt::Debug for NanoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NanoId({})", self.as_str())
    }
}

impl fmt::Display for NanoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NanoId {
    type Err = InvalidNanoId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for NanoId {
    type Error = InvalidNanoId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NanoId> for String {
    fn from(id: NanoId) -> Self {
        id.as_str().to_string()
    }
}

/// Writes a [`NanoId`] as its 21 raw bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NanoIdCodec;

impl Codec<NanoId> for NanoIdCodec {
    fn encode(&self, value: &NanoId, out: &mut Writer<'_>) -> CodecResult<()> {
        out.put_raw(&value.0);
        Ok(())
    }

    fn decode(&self, input: &mut Reader<'_>) -> CodecResult<NanoId> {
        NanoId::from_slice(input.get_raw(NANO_ID_LENGTH)?).map_err(CodecError::invalid_structure)
    }
}

/// Declares a newtype identifier backed by a [`NanoId`].
///
/// The type gets `random`, `as_str`, `Display`, `FromStr`, serde support
/// and a [`NanoIdCodec`] implementation, so it can be used directly as an
/// [`AggregateKind::Id`](crate::aggregate::AggregateKind::Id).
///
/// ```
/// walden_core::nano_identifier! {
///     /// Identifies a weather station.
///     pub struct StationId;
/// }
///
/// let id = StationId::random();
/// assert_eq!(id.as_str().parse::<StationId>().unwrap(), id);
/// ```
#[macro_export]
macro_rules! nano_identifier {
    ($(#[$meta:meta])* $vis:vis struct $name:ident;) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        $vis struct $name($crate::aggregate::NanoId);

        impl $name {
            /// Generates a new random id.
            #[must_use]
            pub fn random() -> Self {
                Self($crate::aggregate::NanoId::random())
            }

            /// The id as text.
            #[must_use]
            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0.as_str())
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.0.as_str())
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = $crate::aggregate::InvalidNanoId;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                $crate::aggregate::NanoId::parse(s).map(Self)
            }
        }

        impl $crate::serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> ::std::result::Result<S::Ok, S::Error>
            where
                S: $crate::serde::Serializer,
            {
                $crate::serde::Serialize::serialize(&self.0, serializer)
            }
        }

        impl<'de> $crate::serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> ::std::result::Result<Self, D::Error>
            where
                D: $crate::serde::Deserializer<'de>,
            {
                <$crate::aggregate::NanoId as $crate::serde::Deserialize<'de>>::deserialize(
                    deserializer,
                )
                .map(Self)
            }
        }

        impl ::std::convert::From<$crate::aggregate::NanoId> for $name {
            fn from(id: $crate::aggregate::NanoId) -> Self {
                Self(id)
            }
        }

        impl $crate::walden_codec::Codec<$name> for $crate::aggregate::NanoIdCodec {
            fn encode(
                &self,
                value: &$name,
                out: &mut $crate::walden_codec::Writer<'_>,
            ) -> $crate::walden_codec::CodecResult<()> {
                $crate::walden_codec::Codec::<$crate::aggregate::NanoId>::encode(self, &value.0, out)
            }

            fn decode(
                &self,
                input: &mut $crate::walden_codec::Reader<'_>,
            ) -> $crate::walden_codec::CodecResult<$name> {
                $crate::walden_codec::Codec::<$crate::aggregate::NanoId>::decode(self, input)
                    .map($name)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use walden_codec::{decode_exact, encode_to_vec};

    #[test]
    fn random_ids_are_valid_and_distinct() {
        let a = NanoId::random();
        let b = NanoId::random();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), NANO_ID_LENGTH);
        assert_eq!(NanoId::parse(a.as_str()).unwrap(), a);
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(NanoId::parse("").is_err());
        assert!(NanoId::parse("short").is_err());
        assert!(NanoId::parse("0123456789abcdefghij!").is_err());
        assert!(NanoId::parse("0123456789abcdefghijkl").is_err());
        let err = NanoId::parse("0123456789abcdefghij ").unwrap_err();
        assert_eq!(err.reason, "character outside the nano id alphabet");
    }

    #[test]
    fn codec_round_trip_and_validation() {
        let id = NanoId::random();
        let bytes = encode_to_vec(&NanoIdCodec, &id).unwrap();
        assert_eq!(bytes.len(), NANO_ID_LENGTH);
        let decoded: NanoId = decode_exact(&NanoIdCodec, &bytes).unwrap();
        assert_eq!(decoded, id);

        let mut corrupt = bytes;
        corrupt[0] = b'~';
        assert!(decode_exact::<NanoId, _>(&NanoIdCodec, &corrupt).is_err());
    }

    #[test]
    fn serde_uses_the_text_form() {
        let id = NanoId::parse("abcdefghij_-ABCDEFGHI").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"abcdefghij_-ABCDEFGHI\"");
        assert_eq!(serde_json::from_str::<NanoId>(&json).unwrap(), id);
        assert!(serde_json::from_str::<NanoId>("\"nope\"").is_err());
    }

    crate::nano_identifier! {
        /// Test id.
        struct ProbeId;
    }

    #[test]
    fn declared_identifier() {
        let id = ProbeId::random();
        assert_eq!(id.to_string().parse::<ProbeId>().unwrap(), id);
        assert!(format!("{id:?}").starts_with("ProbeId("));
        let bytes = encode_to_vec(&NanoIdCodec, &id).unwrap();
        assert_eq!(decode_exact::<ProbeId, _>(&NanoIdCodec, &bytes).unwrap(), id);
    }

    proptest! {
        #[test]
        fn alphabet_strings_parse(s in "[_0-9a-zA-Z-]{21}") {
            let id = NanoId::parse(&s).unwrap();
            prop_assert_eq!(id.as_str(), s.as_str());
        }
    }
}
