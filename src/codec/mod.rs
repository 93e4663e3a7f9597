//! Binary Codec
//!
//! Typed reader and writer cursors over abstract byte streams.
//!
//! # Components
//!
//! - `StreamReader` / `StreamWriter`: the byte-stream capabilities a connection
//!   (or an in-memory buffer) provides
//! - `BinaryReader` / `BinaryWriter`: fixed width values in native layout,
//!   base-128 varints, size prefixed strings and blobs
//! - `Primitive`: the fixed width values the cursors can move
//!
//! Varints carry 7 payload bits per byte, least significant group first, with the
//! high bit set on every byte but the last.

pub use primary_types::Primitive;
pub use reader::BinaryReader;
pub use stream::{StreamReader, StreamWriter};
pub use writer::BinaryWriter;

mod primary_types;
mod reader;
mod stream;
mod writer;

/// Longest encoding of a 64-bit varint.
pub const MAX_VARINT_LEN: usize = 10;
