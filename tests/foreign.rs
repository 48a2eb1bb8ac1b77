//! Unpacking archives laid out the way other zip tools write them: MS-DOS
//! host, data descriptors, explicit directory entries, STORED payloads and
//! an archive comment.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use byteorder::{LittleEndian, WriteBytesExt};
use flate2::Compression;
use flate2::write::DeflateEncoder;
use tempfile::tempdir;
use ziputil::{ArchiveManager, LocalFileReader, ZipArchiveManager, ZipExtractor};

const STORED: u16 = 0;
const DEFLATE: u16 = 8;
const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
const DOS_DIRECTORY: u32 = 0x10;
// 2020-01-01 12:00:00
const DOS_TIME: u16 = 12 << 11;
const DOS_DATE: u16 = ((2020 - 1980) << 9) | (1 << 5) | 1;

struct RawEntry {
    name: &'static str,
    method: u16,
    flags: u16,
    external_attrs: u32,
    content: Vec<u8>,
}

impl RawEntry {
    fn dir(name: &'static str) -> Self {
        Self {
            name,
            method: STORED,
            flags: 0,
            external_attrs: DOS_DIRECTORY,
            content: Vec::new(),
        }
    }

    fn file(name: &'static str, method: u16, content: &[u8]) -> Self {
        Self {
            name,
            method,
            flags: FLAG_DATA_DESCRIPTOR,
            external_attrs: 0x20,
            content: content.to_vec(),
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self.method {
            DEFLATE => {
                let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&self.content).unwrap();
                encoder.finish().unwrap()
            }
            // Anything else is stored as-is; unknown methods never get read
            _ => self.content.clone(),
        }
    }

    fn crc(&self) -> u32 {
        let mut crc = flate2::Crc::new();
        crc.update(&self.content);
        crc.sum()
    }
}

/// Serialize `entries` as a streaming writer would: zeroed sizes in the
/// local header followed by a data descriptor, then the central directory.
fn build_archive(entries: &[RawEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut offsets = Vec::new();
    let mut payload_sizes = Vec::new();

    for entry in entries {
        let payload = entry.payload();
        let streamed = entry.flags & FLAG_DATA_DESCRIPTOR != 0;
        offsets.push(out.len() as u32);
        payload_sizes.push(payload.len() as u32);

        out.extend_from_slice(b"PK\x03\x04");
        out.write_u16::<LittleEndian>(20).unwrap();
        out.write_u16::<LittleEndian>(entry.flags).unwrap();
        out.write_u16::<LittleEndian>(entry.method).unwrap();
        out.write_u16::<LittleEndian>(DOS_TIME).unwrap();
        out.write_u16::<LittleEndian>(DOS_DATE).unwrap();
        if streamed {
            out.extend_from_slice(&[0; 12]);
        } else {
            out.write_u32::<LittleEndian>(entry.crc()).unwrap();
            out.write_u32::<LittleEndian>(payload.len() as u32).unwrap();
            out.write_u32::<LittleEndian>(entry.content.len() as u32).unwrap();
        }
        out.write_u16::<LittleEndian>(entry.name.len() as u16).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.extend_from_slice(entry.name.as_bytes());
        out.extend_from_slice(&payload);

        if streamed {
            out.extend_from_slice(b"PK\x07\x08");
            out.write_u32::<LittleEndian>(entry.crc()).unwrap();
            out.write_u32::<LittleEndian>(payload.len() as u32).unwrap();
            out.write_u32::<LittleEndian>(entry.content.len() as u32).unwrap();
        }
    }

    let cd_offset = out.len() as u32;
    for (i, entry) in entries.iter().enumerate() {
        out.extend_from_slice(b"PK\x01\x02");
        // MS-DOS host, no Unix mode bits
        out.write_u16::<LittleEndian>(20).unwrap();
        out.write_u16::<LittleEndian>(20).unwrap();
        out.write_u16::<LittleEndian>(entry.flags).unwrap();
        out.write_u16::<LittleEndian>(entry.method).unwrap();
        out.write_u16::<LittleEndian>(DOS_TIME).unwrap();
        out.write_u16::<LittleEndian>(DOS_DATE).unwrap();
        out.write_u32::<LittleEndian>(entry.crc()).unwrap();
        out.write_u32::<LittleEndian>(payload_sizes[i]).unwrap();
        out.write_u32::<LittleEndian>(entry.content.len() as u32).unwrap();
        out.write_u16::<LittleEndian>(entry.name.len() as u16).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap(); // extra
        out.write_u16::<LittleEndian>(0).unwrap(); // comment
        out.write_u16::<LittleEndian>(0).unwrap(); // disk start
        out.write_u16::<LittleEndian>(0).unwrap(); // internal attrs
        out.write_u32::<LittleEndian>(entry.external_attrs).unwrap();
        out.write_u32::<LittleEndian>(offsets[i]).unwrap();
        out.extend_from_slice(entry.name.as_bytes());
    }
    let cd_size = out.len() as u32 - cd_offset;

    let comment = b"built by hand";
    out.extend_from_slice(b"PK\x05\x06");
    out.write_u16::<LittleEndian>(0).unwrap();
    out.write_u16::<LittleEndian>(0).unwrap();
    out.write_u16::<LittleEndian>(entries.len() as u16).unwrap();
    out.write_u16::<LittleEndian>(entries.len() as u16).unwrap();
    out.write_u32::<LittleEndian>(cd_size).unwrap();
    out.write_u32::<LittleEndian>(cd_offset).unwrap();
    out.write_u16::<LittleEndian>(comment.len() as u16).unwrap();
    out.extend_from_slice(comment);
    out
}

fn write_archive(dir: &Path, entries: &[RawEntry]) -> std::path::PathBuf {
    let path = dir.join("foreign.zip");
    fs::write(&path, build_archive(entries)).unwrap();
    path
}

#[tokio::test]
async fn unpacks_directory_stored_and_deflated_entries() {
    let dir = tempdir().unwrap();
    let text = b"stored bytes, kept verbatim".to_vec();
    let prose = b"deflated prose ".repeat(200);
    let archive = write_archive(
        dir.path(),
        &[
            RawEntry::dir("d/"),
            RawEntry::dir("d/empty/"),
            RawEntry::file("d/stored.txt", STORED, &text),
            RawEntry::file("d/deflated.txt", DEFLATE, &prose),
        ],
    );
    let dst = dir.path().join("dst");

    ZipArchiveManager::new().unpack(&archive, &dst).await.unwrap();

    assert!(dst.join("d").is_dir());
    assert!(dst.join("d/empty").is_dir());
    assert_eq!(fs::read_dir(dst.join("d/empty")).unwrap().count(), 0);
    assert_eq!(fs::read(dst.join("d/stored.txt")).unwrap(), text);
    assert_eq!(fs::read(dst.join("d/deflated.txt")).unwrap(), prose);
}

#[tokio::test]
async fn lists_foreign_entries_with_their_methods() {
    let dir = tempdir().unwrap();
    let archive = write_archive(
        dir.path(),
        &[
            RawEntry::dir("d/"),
            RawEntry::file("d/stored.txt", STORED, b"abc"),
        ],
    );

    let extractor = ZipExtractor::new(Arc::new(LocalFileReader::new(&archive).unwrap()));
    let entries = extractor.list_files().await.unwrap();

    assert_eq!(entries.len(), 2);
    assert!(entries[0].is_directory);
    assert!(!entries[1].is_directory);
    assert_eq!(entries[1].uncompressed_size, 3);
    assert_eq!(entries[1].compressed_size, 3);
    assert_eq!(entries[1].unix_mode(), None);
    assert_eq!(entries[1].mod_date(), (2020, 1, 1));

    let mut out = Vec::new();
    extractor.copy_to(&entries[1], &mut out).await.unwrap();
    assert_eq!(out, b"abc");
}

#[tokio::test]
async fn unsupported_method_is_named_in_the_error() {
    let dir = tempdir().unwrap();
    let archive = write_archive(
        dir.path(),
        &[RawEntry::file("bz.txt", 12, b"not really bzip2")],
    );
    let dst = dir.path().join("dst");

    let err = ZipArchiveManager::new()
        .unpack(&archive, &dst)
        .await
        .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("compression method 12"), "{message}");
    assert!(!dst.join("bz.txt").exists());
}

#[tokio::test]
async fn encrypted_entries_are_refused() {
    let dir = tempdir().unwrap();
    let mut entry = RawEntry::file("secret.txt", STORED, b"ciphertext");
    entry.flags |= 1;
    let archive = write_archive(dir.path(), &[entry]);
    let dst = dir.path().join("dst");

    let err = ZipArchiveManager::new()
        .unpack(&archive, &dst)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("encrypted"), "{err}");
    assert!(!dst.join("secret.txt").exists());
}

#[tokio::test]
async fn leading_slash_names_extract_inside_destination() {
    let dir = tempdir().unwrap();
    let archive = write_archive(
        dir.path(),
        &[
            RawEntry::file("/a.txt", DEFLATE, b"hello"),
            RawEntry::file("/sub/b.txt", STORED, b"world"),
        ],
    );
    let dst = dir.path().join("dst");

    ZipArchiveManager::new().unpack(&archive, &dst).await.unwrap();

    assert_eq!(fs::read_to_string(dst.join("a.txt")).unwrap(), "hello");
    assert_eq!(fs::read_to_string(dst.join("sub/b.txt")).unwrap(), "world");
}
