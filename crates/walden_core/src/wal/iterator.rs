//! Streaming record iterator.
//!
//! Reads records one by one through a bounded buffer, so replaying a large
//! log never loads the whole file into memory.

use crate::error::{CoreError, CoreResult};
use crate::types::RecordNumber;
use crate::wal::record::{
    compute_checksum, read_u64, LogRecord, RecordHeader, HEADER_SIZE, RECORD_MAGIC,
    RECORD_OVERHEAD, TRAILER_SIZE,
};
use walden_storage::StorageBackend;

/// Read buffer size for streaming iteration.
const READ_BUFFER_SIZE: usize = 64 * 1024; // 64 KB

/// A streaming iterator over the records of one log file.
///
/// Yields `(offset, record)` pairs. Iteration stops cleanly at an
/// incomplete record at the end of the file; [`has_torn_tail`] reports
/// whether that happened and [`valid_end`] where the last complete record
/// ends.
///
/// # Error Handling
///
/// - Bad magic, an oversized length or a checksum mismatch is corruption
/// - A record number that does not follow its predecessor is corruption
/// - An incomplete record followed by a complete valid one is corruption
/// - A length running past the end over a complete record is corruption
/// - An incomplete record or a run of zero bytes at the end is a torn tail
///
/// [`has_torn_tail`]: RecordIterator::has_torn_tail
/// [`valid_end`]: RecordIterator::valid_end
pub struct RecordIterator<'a> {
    backend: &'a dyn StorageBackend,
    total_size: u64,
    /// Start of the next record.
    offset: u64,
    buffer: Vec<u8>,
    buffer_start: u64,
    max_payload_size: u32,
    last_record_number: Option<RecordNumber>,
    torn_tail: bool,
    finished: bool,
}

impl<'a> RecordIterator<'a> {
    /// Creates an iterator positioned at the start of the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be determined.
    pub fn new(backend: &'a dyn StorageBackend, max_payload_size: u32) -> CoreResult<Self> {
        let total_size = backend.size()?;
        Ok(Self {
            backend,
            total_size,
            offset: 0,
            buffer: Vec::new(),
            buffer_start: 0,
            max_payload_size,
            last_record_number: None,
            torn_tail: false,
            finished: false,
        })
    }

    /// Offset just past the last complete record read so far.
    #[must_use]
    pub fn valid_end(&self) -> u64 {
        self.offset
    }

    /// Record number of the last complete record read so far.
    #[must_use]
    pub fn last_record_number(&self) -> Option<RecordNumber> {
        self.last_record_number
    }

    /// Whether iteration stopped at an incomplete trailing record.
    #[must_use]
    pub fn has_torn_tail(&self) -> bool {
        self.torn_tail
    }

    /// Returns `len` bytes at `at`, or `None` if the file ends first.
    fn bytes(&mut self, at: u64, len: usize) -> CoreResult<Option<&[u8]>> {
        let Some(end) = at.checked_add(len as u64) else {
            return Ok(None);
        };
        if end > self.total_size {
            return Ok(None);
        }
        let buffered_end = self.buffer_start + self.buffer.len() as u64;
        if at < self.buffer_start || end > buffered_end {
            let available = (self.total_size - at) as usize;
            let read_len = len.max(READ_BUFFER_SIZE).min(available);
            self.buffer = self.backend.read_at(at, read_len)?;
            self.buffer_start = at;
        }
        let from = (at - self.buffer_start) as usize;
        Ok(Some(&self.buffer[from..from + len]))
    }

    fn read_next(&mut self) -> CoreResult<Option<(u64, LogRecord)>> {
        let start = self.offset;
        if start >= self.total_size {
            return Ok(None);
        }

        let max_payload_size = self.max_payload_size;
        let header = match self.bytes(start, HEADER_SIZE)? {
            None => return self.end_at_tail(start),
            Some(bytes) => RecordHeader::parse(bytes),
        };
        let Some(header) = header else {
            if self.zero_filled_from(start)? {
                return self.end_at_tail(start);
            }
            return Err(CoreError::corruption(format!(
                "bad record magic at offset {start}"
            )));
        };
        if header.payload_len > max_payload_size {
            return Err(CoreError::corruption(format!(
                "record at offset {start} declares {} payload bytes, limit is {max_payload_size}",
                header.payload_len
            )));
        }

        let payload_len = header.payload_len as usize;
        let (payload, record_number) =
            match self.bytes(start + HEADER_SIZE as u64, payload_len + TRAILER_SIZE)? {
                None => return self.end_past_eof(start, header),
                Some(body) => (
                    body[..payload_len].to_vec(),
                    RecordNumber(read_u64(body, payload_len)),
                ),
            };

        let actual = compute_checksum(header.type_id, &payload, record_number);
        if actual != header.checksum {
            return Err(CoreError::ChecksumMismatch {
                record_number,
                offset: start,
                expected: header.checksum,
                actual,
            });
        }
        if let Some(previous) = self.last_record_number {
            if record_number != previous.next() {
                return Err(CoreError::corruption(format!(
                    "record at offset {start} is {record_number}, expected {}",
                    previous.next()
                )));
            }
        }

        self.last_record_number = Some(record_number);
        self.offset = start + (RECORD_OVERHEAD + payload_len) as u64;
        Ok(Some((
            start,
            LogRecord {
                record_number,
                type_id: header.type_id,
                payload,
            },
        )))
    }

    /// Stops at an incomplete record unless valid data follows it.
    fn end_at_tail(&mut self, start: u64) -> CoreResult<Option<(u64, LogRecord)>> {
        if self.valid_record_after(start)? {
            return Err(CoreError::corruption(format!(
                "incomplete record at offset {start} is followed by valid records"
            )));
        }
        self.torn_tail = true;
        Ok(None)
    }

    /// Handles a record whose declared payload runs past the end of file.
    ///
    /// A committed record whose length field was damaged looks exactly like
    /// a torn one. It is told apart by finding its real trailer: a record
    /// number that follows the previous record, at a position where the
    /// header checksum matches the bytes before it.
    fn end_past_eof(
        &mut self,
        start: u64,
        header: RecordHeader,
    ) -> CoreResult<Option<(u64, LogRecord)>> {
        if let Some(len) = self.damaged_length(start, header)? {
            return Err(CoreError::corruption(format!(
                "record at offset {start} declares {} payload bytes but its \
                 checksum matches a {len}-byte payload",
                header.payload_len
            )));
        }
        self.end_at_tail(start)
    }

    fn damaged_length(&self, start: u64, header: RecordHeader) -> CoreResult<Option<usize>> {
        let from = start + HEADER_SIZE as u64;
        if from + TRAILER_SIZE as u64 > self.total_size {
            return Ok(None);
        }
        let rest = self
            .backend
            .read_at(from, (self.total_size - from) as usize)?;
        let expected = self.last_record_number.map(RecordNumber::next);
        let longest = (rest.len() - TRAILER_SIZE).min(self.max_payload_size as usize);
        let found = (0..=longest).find(|&len| {
            let record_number = RecordNumber(read_u64(&rest, len));
            let plausible = match expected {
                Some(expected) => record_number == expected,
                None => record_number.as_u64() != 0,
            };
            plausible
                && compute_checksum(header.type_id, &rest[..len], record_number)
                    == header.checksum
        });
        Ok(found)
    }

    fn zero_filled_from(&self, start: u64) -> CoreResult<bool> {
        let rest = self
            .backend
            .read_at(start, (self.total_size - start) as usize)?;
        Ok(rest.iter().all(|&b| b == 0))
    }

    fn valid_record_after(&self, start: u64) -> CoreResult<bool> {
        let from = start + 1;
        if from + RECORD_OVERHEAD as u64 > self.total_size {
            return Ok(false);
        }
        let rest = self
            .backend
            .read_at(from, (self.total_size - from) as usize)?;
        let magic = RECORD_MAGIC.to_be_bytes();
        let found = (0..=rest.len() - RECORD_OVERHEAD)
            .filter(|&at| rest[at..at + 4] == magic)
            .any(|at| complete_record_at(&rest[at..], self.max_payload_size));
        Ok(found)
    }
}

fn complete_record_at(bytes: &[u8], max_payload_size: u32) -> bool {
    let Some(header) = RecordHeader::parse(bytes) else {
        return false;
    };
    if header.payload_len > max_payload_size {
        return false;
    }
    let len = header.payload_len as usize;
    if bytes.len() < RECORD_OVERHEAD + len {
        return false;
    }
    let payload = &bytes[HEADER_SIZE..HEADER_SIZE + len];
    let record_number = RecordNumber(read_u64(bytes, HEADER_SIZE + len));
    compute_checksum(header.type_id, payload, record_number) == header.checksum
}

impl Iterator for RecordIterator<'_> {
    type Item = CoreResult<(u64, LogRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_next() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
