//! Packs a directory tree into a gzip-compressed tar stream.
//!
//! Only regular files are recorded. Each entry is named by its path relative
//! to the root, without a leading separator, and carries the file's size,
//! permission bits and modification time.

use std::fs::{File, Metadata};
use std::io::{self, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("unable to walk {}: {source}", root.display())]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("unable to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to write archive entry {}: {source}", name.display())]
    Append {
        name: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to finish archive: {0}")]
    Finish(#[source] io::Error),
}

/// One regular file found beneath the archive root.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Root-relative name, normal components only.
    pub name: PathBuf,
    pub path: PathBuf,
    pub size: u64,
    pub mode: u32,
    pub mtime: u64,
}

impl ArchiveEntry {
    fn from_metadata(name: PathBuf, path: PathBuf, metadata: &Metadata) -> Self {
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs());
        ArchiveEntry {
            name,
            path,
            size: metadata.len(),
            mode: permission_bits(metadata),
            mtime,
        }
    }

    fn header(&self) -> tar::Header {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(self.size);
        header.set_mode(self.mode);
        header.set_mtime(self.mtime);
        header
    }
}

#[cfg(unix)]
fn permission_bits(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(metadata: &Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// Name an archive entry by its path relative to `root`.
///
/// Only normal components survive, so the name never starts with a separator
/// even when `root` is `/` or carries a trailing slash.
pub fn entry_name(root: &Path, path: &Path) -> Option<PathBuf> {
    let relative = pathdiff::diff_paths(path, root)?;
    let mut name = PathBuf::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => name.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => return None,
        }
    }
    if name.as_os_str().is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Lazily walks `root` depth first, yielding every regular file once.
pub fn entries(root: &Path) -> Entries {
    Entries {
        root: root.to_path_buf(),
        walk: WalkDir::new(root).follow_links(false).into_iter(),
    }
}

pub struct Entries {
    root: PathBuf,
    walk: walkdir::IntoIter,
}

impl Iterator for Entries {
    type Item = Result<ArchiveEntry, ArchiveError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walk.next()? {
                Ok(entry) => entry,
                Err(source) => {
                    return Some(Err(ArchiveError::Walk {
                        root: self.root.clone(),
                        source,
                    }))
                }
            };

            let file_type = entry.file_type();
            if file_type.is_dir() {
                continue;
            }
            if !file_type.is_file() {
                log::debug!("skipping non-regular file {}", entry.path().display());
                continue;
            }

            let Some(name) = entry_name(&self.root, entry.path()) else {
                continue;
            };
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(source) => {
                    return Some(Err(ArchiveError::Walk {
                        root: self.root.clone(),
                        source,
                    }))
                }
            };
            return Some(Ok(ArchiveEntry::from_metadata(
                name,
                entry.into_path(),
                &metadata,
            )));
        }
    }
}

/// Streams every regular file under `root` into `sink` as tar inside gzip.
///
/// The tar layer is finished first so its trailer reaches the compressor,
/// then the compressor writes its footer, and finally the sink is handed
/// back for the caller to flush and close.
pub fn write_archive<W: Write>(root: &Path, sink: W) -> Result<W, ArchiveError> {
    let encoder = GzEncoder::new(sink, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for entry in entries(root) {
        let entry = entry?;
        log::trace!("adding {} ({} bytes)", entry.name.display(), entry.size);

        let file = File::open(&entry.path).map_err(|source| ArchiveError::Read {
            path: entry.path.clone(),
            source,
        })?;
        let mut header = entry.header();
        builder
            .append_data(&mut header, &entry.name, file)
            .map_err(|source| ArchiveError::Append {
                name: entry.name.clone(),
                source,
            })?;
    }

    let encoder = builder.into_inner().map_err(ArchiveError::Finish)?;
    encoder.finish().map_err(ArchiveError::Finish)
}

/// Packs `root` into the file at `output`, which must already be open for writing.
pub fn pack_directory(root: &Path, output: File) -> Result<(), ArchiveError> {
    let sink = write_archive(root, BufWriter::new(output))?;
    let file = sink
        .into_inner()
        .map_err(|e| ArchiveError::Finish(e.into_error()))?;
    file.sync_all().map_err(ArchiveError::Finish)
}
