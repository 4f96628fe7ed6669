//! COW Image Library
//!
//! Reads copy-on-write snapshot images: validates the header, scans the
//! operation stream up to an optional checkpoint and indexes XOR payloads by
//! logical block.

pub mod parser;
pub mod writer;
pub mod output;

pub use parser::{
    open_image, parse, read_header, CowHeader, CowOperation, DataIndex, ErrorClass, FormatLimits,
    OpKind, ParseError, ParseResult, ScanStats,
};
pub use writer::{CowWriter, WriterOptions};
