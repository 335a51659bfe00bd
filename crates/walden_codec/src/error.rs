//! Error types for the codec crate.

use crate::header::SerdeId;
use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during encoding or decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode a value.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode a value.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// Invalid UTF-8 string.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// Unexpected end of input.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// Input continued after the value was fully decoded.
    #[error("{remaining} trailing byte(s) after decoded value")]
    TrailingBytes {
        /// Number of bytes left unread.
        remaining: usize,
    },

    /// Invalid structure, such as a bad presence flag.
    #[error("invalid structure: {message}")]
    InvalidStructure {
        /// Description of the structural error.
        message: String,
    },

    /// A length or element count exceeds the allowed maximum.
    #[error("length {length} exceeds maximum {max}")]
    LengthOverflow {
        /// The declared length.
        length: u64,
        /// The allowed maximum.
        max: u64,
    },

    /// The codec header names a different serde id.
    #[error("serde id mismatch: expected {expected}, found {found}")]
    SerdeIdMismatch {
        /// The id the codec owns.
        expected: SerdeId,
        /// The id found in the header.
        found: SerdeId,
    },

    /// The codec header carries a sub-type the codec does not know.
    #[error("unknown sub-type {sub_type} for serde id {serde_id}")]
    UnknownSubType {
        /// The codec's serde id.
        serde_id: SerdeId,
        /// The unrecognized sub-type.
        sub_type: u16,
    },
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }

    /// Create an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }
}
