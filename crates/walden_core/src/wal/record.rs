//! Record framing and checksums.

use crate::error::{CoreError, CoreResult};
use crate::types::RecordNumber;

/// Magic number opening every record ("WAL0").
pub const RECORD_MAGIC: u32 = 0x5741_4C30;

/// magic (4) + checksum (8) + type id (4) + payload length (4)
pub const HEADER_SIZE: usize = 20;

/// record number (8)
pub const TRAILER_SIZE: usize = 8;

/// Bytes a record occupies on disk beyond its payload.
pub const RECORD_OVERHEAD: usize = HEADER_SIZE + TRAILER_SIZE;

/// A record read back from a log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Position of the record in the log.
    pub record_number: RecordNumber,
    /// Serde id of the codec that wrote the payload.
    pub type_id: u32,
    /// Encoded entry.
    pub payload: Vec<u8>,
}

impl LogRecord {
    /// Bytes the record occupies on disk.
    #[must_use]
    pub fn size_on_disk(&self) -> u64 {
        (RECORD_OVERHEAD + self.payload.len()) as u64
    }
}

/// Fixed-size record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RecordHeader {
    pub checksum: u64,
    pub type_id: u32,
    pub payload_len: u32,
}

impl RecordHeader {
    /// Parses a header, rejecting anything that does not start with the magic.
    pub(crate) fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_SIZE || read_u32(bytes, 0) != RECORD_MAGIC {
            return None;
        }
        Some(Self {
            checksum: read_u64(bytes, 4),
            type_id: read_u32(bytes, 12),
            payload_len: read_u32(bytes, 16),
        })
    }
}

/// Computes the checksum stored in a record header.
///
/// CRC32 over type id, payload length, payload and record number, widened
/// to 64 bits. The upper 32 bits of a valid stored checksum are zero.
#[must_use]
pub fn compute_checksum(type_id: u32, payload: &[u8], record_number: RecordNumber) -> u64 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&type_id.to_be_bytes());
    hasher.update(&(payload.len() as u32).to_be_bytes());
    hasher.update(payload);
    hasher.update(&record_number.as_u64().to_be_bytes());
    u64::from(hasher.finalize())
}

/// Appends one framed record to `out`.
///
/// # Errors
///
/// Returns `InvalidOperation` if the payload length does not fit the header.
pub fn encode_record(
    out: &mut Vec<u8>,
    type_id: u32,
    payload: &[u8],
    record_number: RecordNumber,
) -> CoreResult<()> {
    let len = u32::try_from(payload.len()).map_err(|_| {
        CoreError::invalid_operation(format!("payload of {} bytes is too large", payload.len()))
    })?;
    out.reserve(RECORD_OVERHEAD + payload.len());
    out.extend_from_slice(&RECORD_MAGIC.to_be_bytes());
    out.extend_from_slice(&compute_checksum(type_id, payload, record_number).to_be_bytes());
    out.extend_from_slice(&type_id.to_be_bytes());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(payload);
    out.extend_from_slice(&record_number.as_u64().to_be_bytes());
    Ok(())
}

pub(crate) fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    u32::from_be_bytes(raw)
}

pub(crate) fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    u64::from_be_bytes(raw)
}
