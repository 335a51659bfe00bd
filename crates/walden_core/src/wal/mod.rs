//! Log files: record framing, streaming replay and appending.
//!
//! Every log and snapshot file is a plain sequence of records. Nothing
//! precedes the first record and nothing follows the last.
//!
//! ## Record Format
//!
//! ```text
//! | magic (4) | checksum (8) | type id (4) | length (4) | payload (N) | record number (8) |
//! ```
//!
//! All integers are big-endian. The magic is `0x57414C30` ("WAL0"). The
//! checksum is CRC32 over type id, length, payload and record number,
//! stored in the low 32 bits of the 8-byte field.
//!
//! ## Recovery Policy
//!
//! ### Tolerated Conditions (treat as clean end-of-file)
//!
//! - **Truncated record**: the file ends inside a header, payload or trailer
//! - **Zero-filled tail**: only zero bytes remain where a record should start
//!
//! Both are what a crash in the middle of an append leaves behind. Replay
//! stops before them; opening the file for writing truncates them away.
//!
//! ### Fatal Conditions (abort with error)
//!
//! - **Checksum mismatch** → `Err(ChecksumMismatch)`
//! - **Invalid magic**, **implausible length** → `Err(Corruption)`
//! - **Record number gap**: not exactly one more than the previous record
//! - **Hidden records**: an incomplete record followed by a complete one
//! - **Damaged length**: a length running past the end of file over a
//!   record whose checksum still matches at its real length
//!
//! Only the final record of a file can be torn, because a single writer
//! appends and every earlier record was complete when the next one began.
//!
//! ## Invariants
//!
//! - Files are **append-only**; records are never modified after write
//! - Record numbers are **contiguous** within and across files
//! - Checksum failures are **fatal**; no heuristic repair is attempted

mod file;
pub(crate) mod flusher;
mod iterator;
mod record;

pub use file::{FileReplay, LogFileOptions, ReadOnlyLogFile, WritableLogFile};
pub use iterator::RecordIterator;
pub use record::{compute_checksum, encode_record, LogRecord, RECORD_MAGIC, RECORD_OVERHEAD};
