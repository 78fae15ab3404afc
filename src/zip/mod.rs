//! ZIP archive reading and writing.
//!
//! - [`structures`]: on-disk records (EOCD, ZIP64 records, file headers)
//! - [`parser`]: central directory parsing over a [`ReadAt`](crate::io::ReadAt) source
//! - [`extractor`]: entry decoding (STORED, DEFLATE, ZipCrypto, CRC check)
//! - [`writer`]: in-memory encoder used by the build pipeline
//!
//! ## Limitations
//!
//! - No AES encryption
//! - No multi-disk archives
//! - Writing never emits ZIP64 records

mod crypto;
mod extractor;
mod parser;
mod structures;
mod writer;

pub use extractor::ZipExtractor;
pub use parser::ZipParser;
pub use structures::*;
pub use writer::{WriteOptions, ZipWriter};
