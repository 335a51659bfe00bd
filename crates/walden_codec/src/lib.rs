//! # Walden Codec
//!
//! Binary codecs for the payloads stored in Walden log files.
//!
//! ## Wire conventions
//!
//! - All integers are big-endian
//! - Strings are a `u32` byte length followed by UTF-8 bytes
//! - Optional values are a one-byte presence flag followed by the value
//! - Lengths and element counts are capped at [`MAX_LENGTH`]
//! - Every log payload begins with an 8-byte [header](header) naming its codec
//!
//! ## Usage
//!
//! ```
//! use walden_codec::{Reader, Writer, SerdeId, write_header, verify_plain_header};
//!
//! let id = SerdeId::new(42);
//! let mut buf = Vec::new();
//! let mut out = Writer::new(&mut buf);
//! write_header(&mut out, id, 0);
//! out.put_opt_str(Some("note")).unwrap();
//!
//! let mut input = Reader::new(&buf);
//! verify_plain_header(&mut input, id).unwrap();
//! assert_eq!(input.get_opt_str().unwrap().as_deref(), Some("note"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod codec;
mod error;
pub mod header;
mod reader;
mod writer;

pub use cbor::CborCodec;
pub use codec::{decode_exact, encode_to_vec, Codec, I64Codec, StringCodec, U64Codec};
pub use error::{CodecError, CodecResult};
pub use header::{
    peek_serde_id, read_header, verify_header, verify_plain_header, write_header, CodecHeader,
    SerdeId, HEADER_LEN,
};
pub use reader::Reader;
pub use writer::Writer;

/// Maximum byte length of a string or byte string, and maximum element count.
///
/// Bounds allocations driven by untrusted length prefixes.
pub const MAX_LENGTH: u64 = 256 * 1024 * 1024;
