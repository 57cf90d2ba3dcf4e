//! Range resolution and the decrypting streaming reader.
//!
//! This module provides:
//! - `Range` header parsing and clamping against a file size
//! - The fragment entry walk feeding the cipher its global offset
//! - `FileStreamer`, the lazy multi-fragment decrypting byte stream
//! - `ResponsePlan`, the header set for 200/206 responses

mod error;
mod range;
mod reader;

pub use error::StreamError;
pub use range::{
    ByteRange, Entry, ResolvedRange, ResponsePlan, parse_range_header, resolve_entry,
    resolve_range,
};
pub use reader::FileStreamer;

#[cfg(test)]
pub(crate) use reader::testing;
