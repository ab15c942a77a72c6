//! ZIP archive parsing and extraction.
//!
//! ## Architecture
//!
//! - [`structures`]: Data structures representing ZIP format elements (EOCD, file headers, etc.)
//! - [`parser`]: Low-level parsing of ZIP structures from raw bytes
//! - [`extractor`]: Extraction of entries to memory or disk
//!
//! The End of Central Directory record is read first (from the end of the
//! file), then the Central Directory, then each entry's local header and data.
//!
//! ## Supported Features
//!
//! - Standard ZIP format (PKZIP APPNOTE 6.3.x compatible)
//! - ZIP64 extensions for files > 4GB
//! - STORED, DEFLATE, BZIP2 and LZMA compression methods, with CRC-32 verification
//! - Archives with data prepended (self-extractors, shell stubs)
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support
//! - No Zstandard, XZ, or other compression methods

mod error;
mod extractor;
mod parser;
mod structures;

pub use error::InvalidArchive;
pub use extractor::ZipExtractor;
pub use parser::ZipParser;
pub use structures::*;
