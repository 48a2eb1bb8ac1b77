//! ZIP archive writer.
//!
//! Entries are appended one at a time: a Local File Header with zeroed CRC
//! and sizes, then the deflated payload, then a seek back to patch the
//! header once the real values are known. [`ZipWriter::finish`] appends the
//! Central Directory and End of Central Directory records, switching to the
//! ZIP64 records when counts, sizes or offsets outgrow the classic fields.

use byteorder::{LittleEndian, WriteBytesExt};
use flate2::write::DeflateEncoder;
use flate2::{Compression, CrcReader};
use std::fs::Metadata;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::time::SystemTime;

use anyhow::{Result, bail};

use super::structures::*;

/// Mode recorded for entries whose source carries no Unix permissions.
const DEFAULT_ENTRY_MODE: u32 = 0o100644;

/// Per-entry attributes taken from the source file.
#[derive(Debug, Clone)]
pub struct EntryMetadata {
    /// Expected payload size; decides up front whether the local header
    /// needs room for ZIP64 sizes.
    pub size: u64,
    /// Full `st_mode`, including the file type bits.
    pub mode: u32,
    pub modified: Option<SystemTime>,
}

impl Default for EntryMetadata {
    fn default() -> Self {
        Self {
            size: 0,
            mode: DEFAULT_ENTRY_MODE,
            modified: None,
        }
    }
}

impl From<&Metadata> for EntryMetadata {
    fn from(meta: &Metadata) -> Self {
        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            meta.permissions().mode()
        };
        #[cfg(not(unix))]
        let mode = if meta.permissions().readonly() {
            0o100444
        } else {
            DEFAULT_ENTRY_MODE
        };

        Self {
            size: meta.len(),
            mode,
            modified: meta.modified().ok(),
        }
    }
}

/// Streaming ZIP writer over any seekable sink.
pub struct ZipWriter<W: Write + Seek> {
    inner: W,
    entries: Vec<ZipFileEntry>,
    level: Compression,
}

impl<W: Write + Seek> ZipWriter<W> {
    /// Writer that deflates at the fastest level.
    pub fn new(inner: W) -> Self {
        Self::with_level(inner, Compression::fast())
    }

    pub fn with_level(inner: W, level: Compression) -> Self {
        Self {
            inner,
            entries: Vec::new(),
            level,
        }
    }

    /// Entries written so far, in archive order.
    pub fn entries(&self) -> &[ZipFileEntry] {
        &self.entries
    }

    /// Append a deflated entry named `name`, reading its payload from `reader`.
    ///
    /// Returns the number of uncompressed bytes stored.
    pub fn add_file<R: Read>(
        &mut self,
        name: &str,
        meta: &EntryMetadata,
        reader: R,
    ) -> Result<u64> {
        if name.len() > u16::MAX as usize {
            bail!("Entry name too long: {} bytes", name.len());
        }

        let lfh_offset = self.inner.stream_position()?;
        let (last_mod_time, last_mod_date) = meta
            .modified
            .map(dos_datetime)
            .unwrap_or((0, (1 << 5) | 1));
        let zip64 = meta.size >= ZIP64_MARKER_U32 as u64;

        LocalFileHeader {
            flags: FLAG_UTF8,
            compression_method: CompressionMethod::Deflate,
            last_mod_time,
            last_mod_date,
            file_name: name,
            zip64,
        }
        .write_to(&mut self.inner)?;

        let data_start = self.inner.stream_position()?;
        let mut source = CrcReader::new(reader);
        let mut encoder = DeflateEncoder::new(&mut self.inner, self.level);
        let uncompressed_size = io::copy(&mut source, &mut encoder)?;
        encoder.finish()?;
        let crc32 = source.crc().sum();

        let data_end = self.inner.stream_position()?;
        let compressed_size = data_end - data_start;

        if !zip64
            && (uncompressed_size >= ZIP64_MARKER_U32 as u64
                || compressed_size >= ZIP64_MARKER_U32 as u64)
        {
            bail!("{} grew past 4 GiB while being archived", name);
        }

        self.inner.seek(SeekFrom::Start(lfh_offset + LFH_CRC_OFFSET))?;
        self.inner.write_u32::<LittleEndian>(crc32)?;
        if zip64 {
            // Sizes live in the reserved extra field after the name
            let extra_sizes = lfh_offset + LFH_SIZE as u64 + name.len() as u64 + 4;
            self.inner.seek(SeekFrom::Start(extra_sizes))?;
            self.inner.write_u64::<LittleEndian>(uncompressed_size)?;
            self.inner.write_u64::<LittleEndian>(compressed_size)?;
        } else {
            self.inner.write_u32::<LittleEndian>(compressed_size as u32)?;
            self.inner.write_u32::<LittleEndian>(uncompressed_size as u32)?;
        }
        self.inner.seek(SeekFrom::Start(data_end))?;

        self.entries.push(ZipFileEntry {
            file_name: name.to_string(),
            version_made_by: (HOST_UNIX << 8) | VERSION_ZIP64,
            flags: FLAG_UTF8,
            compression_method: CompressionMethod::Deflate,
            compressed_size,
            uncompressed_size,
            crc32,
            lfh_offset,
            last_mod_time,
            last_mod_date,
            external_attrs: meta.mode << 16,
            is_directory: false,
        });

        Ok(uncompressed_size)
    }

    /// Write the Central Directory and EOCD, flush, and hand back the sink.
    pub fn finish(mut self) -> Result<W> {
        let cd_offset = self.inner.stream_position()?;
        for entry in &self.entries {
            entry.write_central_header(&mut self.inner)?;
        }
        let cd_end = self.inner.stream_position()?;
        let cd_size = cd_end - cd_offset;
        let total_entries = self.entries.len() as u64;

        let eocd = EndOfCentralDirectory::new(total_entries, cd_size, cd_offset);
        if eocd.is_zip64() {
            Zip64EOCD::new(total_entries, cd_size, cd_offset).write_to(&mut self.inner)?;
            Zip64EOCDLocator {
                disk_with_eocd64: 0,
                eocd64_offset: cd_end,
                total_disks: 1,
            }
            .write_to(&mut self.inner)?;
        }
        eocd.write_to(&mut self.inner)?;

        self.inner.flush()?;
        Ok(self.inner)
    }
}
