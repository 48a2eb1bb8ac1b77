//! ZIP archive packing, parsing and extraction.
//!
//! ## Architecture
//!
//! - [`structures`]: ZIP format records (EOCD, file headers, ...) with their
//!   parse and serialize routines
//! - [`parser`]: reads the Central Directory from any [`ReadAt`](crate::io::ReadAt) source
//! - [`extractor`]: streams entry payloads out to files
//! - [`writer`]: appends deflated entries and seals the Central Directory
//! - [`walk`]: lazy traversal of the tree being packed
//! - [`manager`]: the [`ArchiveManager`] pack/unpack operations built on the above
//!
//! ## Supported Features
//!
//! - Standard ZIP format (PKZIP APPNOTE 6.3.x compatible)
//! - ZIP64 extensions for archives and files > 4GB, on read and write
//! - STORED and DEFLATE on read; DEFLATE at the fastest level on write
//! - Unix permission bits and DOS timestamps
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support
//! - No BZIP2, LZMA, or other compression methods
//! - Symbolic links and empty directories are not stored

mod extractor;
mod manager;
mod parser;
mod structures;
mod walk;
mod writer;

pub use extractor::ZipExtractor;
pub use manager::{ArchiveManager, ZipArchiveManager, entry_output_path};
pub use structures::*;
pub use walk::{SourceFile, SourceFiles};
pub use writer::{EntryMetadata, ZipWriter};
