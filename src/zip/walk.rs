//! Source tree traversal for packing.
//!
//! [`SourceFiles`] walks a directory depth-first and yields only the
//! regular files beneath it, each paired with its metadata and the name it
//! will carry inside the archive. The root, directories, symbolic links and
//! special files are filtered out before they reach the caller.

use std::fs::Metadata;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use anyhow::{Context, Result, anyhow, bail};

/// A regular file found under the source root.
#[derive(Debug)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Archive entry name: relative, `/`-separated.
    pub name: String,
    pub metadata: Metadata,
}

/// Lazy iterator over the regular files of a source tree.
pub struct SourceFiles {
    walker: walkdir::IntoIter,
    root: PathBuf,
    base: Option<String>,
}

impl SourceFiles {
    /// Start a walk at `root`, which must be an existing directory.
    ///
    /// With `include_base_dir`, every entry name is prefixed with the base
    /// name of `root`.
    pub fn new(root: &Path, include_base_dir: bool) -> Result<Self> {
        let meta = std::fs::metadata(root)
            .with_context(|| format!("Failed to read {}", root.display()))?;
        if !meta.is_dir() {
            bail!("{} is not a directory", root.display());
        }

        let base = if include_base_dir {
            Some(base_name(root)?)
        } else {
            None
        };

        let walker = WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();

        Ok(Self {
            walker,
            root: root.to_path_buf(),
            base,
        })
    }
}

impl Iterator for SourceFiles {
    type Item = Result<SourceFile>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e.into())),
            };

            let file_type = entry.file_type();
            if file_type.is_dir() {
                continue;
            }
            if !file_type.is_file() {
                debug!(path = %entry.path().display(), "skipping non-regular file");
                continue;
            }

            let item = entry
                .metadata()
                .map_err(anyhow::Error::from)
                .and_then(|metadata| {
                    let name = entry_name(&self.root, entry.path(), self.base.as_deref())?;
                    Ok(SourceFile {
                        path: entry.path().to_path_buf(),
                        name,
                        metadata,
                    })
                });
            return Some(item);
        }
    }
}

/// Archive name of `path` relative to `root`, optionally under `base`.
pub fn entry_name(root: &Path, path: &Path, base: Option<&str>) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .with_context(|| format!("{} is not under {}", path.display(), root.display()))?;

    let mut segments: Vec<&str> = base.into_iter().collect();
    for component in relative.components() {
        match component {
            Component::Normal(part) => segments.push(
                part.to_str()
                    .ok_or_else(|| anyhow!("Path is not valid UTF-8: {}", path.display()))?,
            ),
            Component::CurDir => {}
            _ => bail!("Unexpected component in {}", path.display()),
        }
    }

    if segments.is_empty() {
        bail!("Empty entry name for {}", path.display());
    }
    Ok(segments.join("/"))
}

fn base_name(root: &Path) -> Result<String> {
    // `.` and `..` have no file name of their own
    let name = match root.file_name() {
        Some(name) => name.to_os_string(),
        None => root
            .canonicalize()
            .with_context(|| format!("Failed to resolve {}", root.display()))?
            .file_name()
            .ok_or_else(|| anyhow!("{} has no base name", root.display()))?
            .to_os_string(),
    };
    name.into_string()
        .map_err(|_| anyhow!("Path is not valid UTF-8: {}", root.display()))
}
