use flate2::Crc;
use flate2::write::DeflateDecoder;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::io::ReadAt;
use anyhow::{Context, Result, bail};

use super::parser::ZipParser;
use super::structures::{CompressionMethod, ZipFileEntry};

/// Compressed bytes fetched from the reader per step.
const CHUNK_SIZE: u64 = 64 * 1024;

/// Mode for extracted files when the archive carries none.
#[cfg(unix)]
const DEFAULT_FILE_MODE: u32 = 0o644;

/// ZIP file extractor
pub struct ZipExtractor<R: ReadAt> {
    parser: ZipParser<R>,
}

impl<R: ReadAt> ZipExtractor<R> {
    pub fn new(reader: Arc<R>) -> Self {
        Self {
            parser: ZipParser::new(reader),
        }
    }

    /// List all files in the archive
    pub async fn list_files(&self) -> Result<Vec<ZipFileEntry>> {
        self.parser.list_files().await
    }

    /// Stream an entry's decompressed payload into `out`.
    ///
    /// The payload is read in chunks, so memory use does not grow with the
    /// entry size. Size and CRC-32 are checked against the Central Directory
    /// once the stream ends. Returns the number of bytes written.
    pub async fn copy_to<W>(&self, entry: &ZipFileEntry, out: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send,
    {
        ensure_supported(entry)?;
        let mut decoder = match entry.compression_method {
            CompressionMethod::Deflate => Some(DeflateDecoder::new(Vec::new())),
            _ => None,
        };

        let mut offset = self.parser.get_data_offset(entry).await?;
        let mut remaining = entry.compressed_size;
        let mut crc = Crc::new();
        let mut written = 0u64;
        let mut buf = vec![0u8; CHUNK_SIZE.min(remaining) as usize];

        while remaining > 0 {
            let n = CHUNK_SIZE.min(remaining) as usize;
            self.parser
                .reader()
                .read_exact_at(offset, &mut buf[..n])
                .await?;
            offset += n as u64;
            remaining -= n as u64;

            match decoder.as_mut() {
                Some(decoder) => {
                    decoder
                        .write_all(&buf[..n])
                        .with_context(|| format!("Corrupt deflate stream in {}", entry.file_name))?;
                    let inflated = std::mem::take(decoder.get_mut());
                    crc.update(&inflated);
                    out.write_all(&inflated).await?;
                    written += inflated.len() as u64;
                }
                None => {
                    crc.update(&buf[..n]);
                    out.write_all(&buf[..n]).await?;
                    written += n as u64;
                }
            }
        }

        if let Some(mut decoder) = decoder {
            decoder
                .try_finish()
                .with_context(|| format!("Corrupt deflate stream in {}", entry.file_name))?;
            let inflated = std::mem::take(decoder.get_mut());
            crc.update(&inflated);
            out.write_all(&inflated).await?;
            written += inflated.len() as u64;
        }
        out.flush().await?;

        if written != entry.uncompressed_size {
            bail!(
                "Size mismatch for {}: expected {} bytes, got {}",
                entry.file_name,
                entry.uncompressed_size,
                written
            );
        }
        if crc.sum() != entry.crc32 {
            bail!(
                "CRC mismatch for {}: expected {:08x}, got {:08x}",
                entry.file_name,
                entry.crc32,
                crc.sum()
            );
        }

        Ok(written)
    }

    /// Extract file to disk
    ///
    /// Creates missing parent directories, truncates any existing file, and
    /// applies the entry's Unix mode (on new files) and modification time.
    pub async fn extract_to_file(&self, entry: &ZipFileEntry, output_path: &Path) -> Result<u64> {
        ensure_supported(entry)?;

        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(entry.unix_mode().map_or(DEFAULT_FILE_MODE, |m| m & 0o7777));

        let mut file = options
            .open(output_path)
            .await
            .with_context(|| format!("Failed to create {}", output_path.display()))?;

        let written = self.copy_to(entry, &mut file).await?;

        if let Some(modified) = entry.modified() {
            let file = file.into_std().await;
            if let Err(e) = file.set_modified(modified) {
                debug!(path = %output_path.display(), error = %e, "could not set modification time");
            }
        }

        Ok(written)
    }
}

fn ensure_supported(entry: &ZipFileEntry) -> Result<()> {
    if entry.is_encrypted() {
        bail!("{} is encrypted, which is not supported", entry.file_name);
    }
    if let CompressionMethod::Unknown(id) = entry.compression_method {
        bail!(
            "Unsupported compression method {} for {} (only STORED and DEFLATE are supported)",
            id,
            entry.file_name
        );
    }
    Ok(())
}
