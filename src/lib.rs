//! # ziputil
//!
//! Pack directory trees into deflate-compressed ZIP archives, unpack them
//! again, and move files over HTTP.
//!
//! ## Features
//!
//! - Pack a directory into a ZIP archive, optionally under its own base name
//! - Unpack a ZIP archive, refusing entries that would escape the destination
//! - Support for ZIP64 format (archives larger than 4GB)
//! - Download a URL to a file, or upload a file as a multipart form, with an
//!   optional API key header
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use ziputil::{ArchiveManager, HttpTransfer, ZipArchiveManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let archives = ZipArchiveManager::new();
//!     archives.pack(Path::new("build"), Path::new("build.zip"), true).await?;
//!
//!     let http = HttpTransfer::new()?;
//!     http.upload("https://example.com/artifacts", Path::new("build.zip"), "").await?;
//!
//!     archives.unpack(Path::new("build.zip"), Path::new("restored")).await?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod io;
pub mod zip;

pub use cli::{Cli, Command};
pub use io::{HttpTransfer, LocalFileReader, ReadAt};
pub use zip::{ArchiveManager, ZipArchiveManager, ZipExtractor, ZipFileEntry};
