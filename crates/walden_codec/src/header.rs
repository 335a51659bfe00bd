//! The header every log payload starts with.
//!
//! ```text
//! | serde id (4) | sub-type (2) | reserved (2) |
//! ```
//!
//! The serde id selects the codec on read. The sub-type lets one codec
//! carry a closed family of variants under a single id; plain codecs
//! write 0.

use crate::error::{CodecError, CodecResult};
use crate::reader::Reader;
use crate::writer::Writer;
use std::fmt;

/// Encoded size of a codec header.
pub const HEADER_LEN: usize = 8;

/// Application-assigned codec identifier.
///
/// Ids are written into every payload and must never be reused for a
/// different wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SerdeId(pub u32);

impl SerdeId {
    /// Creates a serde id.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the id `offset` places after this one.
    ///
    /// Used for groups of related codecs allocated from one base id.
    #[must_use]
    pub const fn offset(self, offset: u32) -> Self {
        Self(self.0 + offset)
    }
}

impl fmt::Display for SerdeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "serde:{}", self.0)
    }
}

/// A decoded codec header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecHeader {
    /// Codec that wrote the payload.
    pub serde_id: SerdeId,
    /// Variant discriminator, 0 for single-type codecs.
    pub sub_type: u16,
}

/// Writes a codec header.
pub fn write_header(out: &mut Writer<'_>, serde_id: SerdeId, sub_type: u16) {
    out.put_u32(serde_id.as_u32());
    out.put_u16(sub_type);
    out.put_u16(0);
}

/// Reads a codec header.
///
/// # Errors
///
/// Returns an error if the input is too short or the reserved bits are set.
pub fn read_header(input: &mut Reader<'_>) -> CodecResult<CodecHeader> {
    let serde_id = SerdeId(input.get_u32()?);
    let sub_type = input.get_u16()?;
    let reserved = input.get_u16()?;
    if reserved != 0 {
        return Err(CodecError::invalid_structure(format!(
            "reserved header bits set: {reserved:#06x}"
        )));
    }
    Ok(CodecHeader { serde_id, sub_type })
}

/// Returns the serde id at the start of `payload` without consuming it.
///
/// # Errors
///
/// Returns [`CodecError::UnexpectedEof`] if the payload is shorter than a header id.
pub fn peek_serde_id(payload: &[u8]) -> CodecResult<SerdeId> {
    Reader::new(payload).get_u32().map(SerdeId)
}

/// Reads a header and checks it belongs to `expected`, returning the sub-type.
///
/// # Errors
///
/// Returns [`CodecError::SerdeIdMismatch`] if another codec wrote the payload.
pub fn verify_header(input: &mut Reader<'_>, expected: SerdeId) -> CodecResult<u16> {
    let header = read_header(input)?;
    if header.serde_id != expected {
        return Err(CodecError::SerdeIdMismatch {
            expected,
            found: header.serde_id,
        });
    }
    Ok(header.sub_type)
}

/// Like [`verify_header`], additionally requiring sub-type 0.
///
/// # Errors
///
/// Returns [`CodecError::UnknownSubType`] for a non-zero sub-type.
pub fn verify_plain_header(input: &mut Reader<'_>, expected: SerdeId) -> CodecResult<()> {
    match verify_header(input, expected)? {
        0 => Ok(()),
        sub_type => Err(CodecError::UnknownSubType {
            serde_id: expected,
            sub_type,
        }),
    }
}
