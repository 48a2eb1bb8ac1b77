use async_trait::async_trait;
use flate2::Compression;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};

use crate::io::LocalFileReader;
use anyhow::{Context, Result, bail};

use super::extractor::ZipExtractor;
use super::walk::SourceFiles;
use super::writer::{EntryMetadata, ZipWriter};

/// Packs directory trees into archives and unpacks them again.
#[async_trait]
pub trait ArchiveManager: Send + Sync {
    /// Pack the regular files under `src` into a new archive at `dest`.
    ///
    /// With `include_base_dir`, entry names start with the base name of
    /// `src`; otherwise they are relative to `src`.
    async fn pack(&self, src: &Path, dest: &Path, include_base_dir: bool) -> Result<()>;

    /// Unpack the archive at `src` under the directory `dest`.
    async fn unpack(&self, src: &Path, dest: &Path) -> Result<()>;
}

/// [`ArchiveManager`] for deflate-compressed zip archives.
#[derive(Debug, Clone, Copy)]
pub struct ZipArchiveManager {
    level: Compression,
}

impl ZipArchiveManager {
    /// Manager that compresses at the fastest deflate level.
    pub fn new() -> Self {
        Self {
            level: Compression::fast(),
        }
    }

    pub fn with_level(level: Compression) -> Self {
        Self { level }
    }
}

impl Default for ZipArchiveManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArchiveManager for ZipArchiveManager {
    async fn pack(&self, src: &Path, dest: &Path, include_base_dir: bool) -> Result<()> {
        let src = src.to_path_buf();
        let dest = dest.to_path_buf();
        let level = self.level;
        tokio::task::spawn_blocking(move || pack_tree(&src, &dest, include_base_dir, level))
            .await?
    }

    async fn unpack(&self, src: &Path, dest: &Path) -> Result<()> {
        let reader = Arc::new(LocalFileReader::new(src)?);
        let extractor = ZipExtractor::new(reader);
        let entries = extractor.list_files().await?;

        fs::create_dir_all(dest)
            .await
            .with_context(|| format!("Failed to create {}", dest.display()))?;

        let mut files = 0usize;
        let mut bytes = 0u64;
        for entry in &entries {
            let output_path = entry_output_path(dest, &entry.file_name)?;
            ensure_no_symlinks(dest, &output_path, &entry.file_name).await?;

            if entry.is_directory {
                fs::create_dir_all(&output_path)
                    .await
                    .with_context(|| format!("Failed to create {}", output_path.display()))?;
                continue;
            }

            debug!(entry = %entry.file_name, path = %output_path.display(), "extracting");
            bytes += extractor.extract_to_file(entry, &output_path).await?;
            files += 1;
        }

        info!(
            archive = %src.display(),
            dest = %dest.display(),
            files,
            bytes,
            "unpacked archive"
        );
        Ok(())
    }
}

fn pack_tree(src: &Path, dest: &Path, include_base_dir: bool, level: Compression) -> Result<()> {
    let file = File::create(dest).with_context(|| format!("Failed to create {}", dest.display()))?;
    let mut writer = ZipWriter::with_level(BufWriter::new(file), level);
    // The archive may be created inside the tree it packs
    let dest_abs = dest.canonicalize().ok();

    let mut bytes = 0u64;
    for source in SourceFiles::new(src, include_base_dir)? {
        let source = source?;
        if is_same_file(&source.path, dest_abs.as_deref()) {
            debug!(path = %source.path.display(), "skipping the archive being written");
            continue;
        }
        let input = File::open(&source.path)
            .with_context(|| format!("Failed to open {}", source.path.display()))?;

        debug!(entry = %source.name, path = %source.path.display(), "adding");
        bytes += writer
            .add_file(&source.name, &EntryMetadata::from(&source.metadata), input)
            .with_context(|| format!("Failed to archive {}", source.path.display()))?;
    }

    let files = writer.entries().len();
    writer
        .finish()?
        .into_inner()
        .map_err(|e| e.into_error())
        .with_context(|| format!("Failed to write {}", dest.display()))?;

    info!(
        src = %src.display(),
        archive = %dest.display(),
        files,
        bytes,
        "packed archive"
    );
    Ok(())
}

/// Refuse to write through a symlink that already exists between `dest`
/// and `output_path`, including `output_path` itself.
async fn ensure_no_symlinks(dest: &Path, output_path: &Path, name: &str) -> Result<()> {
    let Ok(relative) = output_path.strip_prefix(dest) else {
        return Ok(());
    };

    let mut current = dest.to_path_buf();
    for part in relative.components() {
        current.push(part);
        match fs::symlink_metadata(&current).await {
            Ok(meta) if meta.file_type().is_symlink() => {
                bail!(
                    "Refusing to extract {}: {} is a symbolic link",
                    name,
                    current.display()
                );
            }
            Ok(_) => {}
            // Nothing below a missing component can exist yet
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => break,
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to inspect {}", current.display()));
            }
        }
    }
    Ok(())
}

fn is_same_file(path: &Path, dest_abs: Option<&Path>) -> bool {
    match dest_abs {
        Some(dest_abs) if path.file_name() == dest_abs.file_name() => {
            path.canonicalize().is_ok_and(|p| p == dest_abs)
        }
        _ => false,
    }
}

/// Resolve an entry name under `dest`, refusing names that would escape it.
///
/// A leading `/` is dropped, so `/a.txt` lands at `dest/a.txt`. Drive
/// prefixes and `..` segments are rejected rather than sanitized.
///
/// Only the name is checked here. Symlinks already present under `dest`
/// are caught by the unpack loop before anything is written through them.
pub fn entry_output_path(dest: &Path, name: &str) -> Result<PathBuf> {
    let mut output = dest.to_path_buf();
    let mut depth = 0usize;

    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => {
                output.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::RootDir => {
                debug!(entry = %name, "stripping leading slash");
            }
            Component::ParentDir | Component::Prefix(_) => {
                bail!("Refusing to extract {}: path escapes the destination", name);
            }
        }
    }

    if depth == 0 {
        bail!("Refusing to extract entry with empty path {:?}", name);
    }
    Ok(output)
}
