//! Read-only view over a compressed layer archive.

use crate::constants::WHITEOUT_PREFIX;
use flate2::read::GzDecoder;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};

/// What a tar entry represents, before any policy is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    Regular,
    /// `.wh.*` marker deleting a path from a lower layer
    Whiteout,
    /// Symlinks, hard links, devices and anything else not materialised
    Other,
}

impl EntryKind {
    pub fn classify(path: &Path, entry_type: EntryType) -> Self {
        let is_whiteout = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with(WHITEOUT_PREFIX))
            .unwrap_or(false);
        if is_whiteout {
            return EntryKind::Whiteout;
        }
        match entry_type {
            EntryType::Directory => EntryKind::Directory,
            EntryType::Regular | EntryType::Continuous => EntryKind::Regular,
            _ => EntryKind::Other,
        }
    }
}

/// Entry header data the unpack policy works from
#[derive(Debug, Clone)]
pub struct EntryHeader {
    /// Path as stored in the archive
    pub path: PathBuf,
    pub kind: EntryKind,
    pub mode: u32,
    pub size: u64,
}

impl EntryHeader {
    /// True when the stored path climbs above the archive root at any point
    pub fn has_parent_traversal(&self) -> bool {
        self.path
            .components()
            .any(|c| matches!(c, Component::ParentDir))
    }
}

/// Gzip-compressed tar stream
pub struct LayerArchive<R: Read> {
    inner: Archive<GzDecoder<R>>,
}

impl<R: Read> LayerArchive<R> {
    pub fn new(compressed: R) -> Self {
        Self {
            inner: Archive::new(GzDecoder::new(compressed)),
        }
    }

    /// Visit each entry in archive order. The visitor may read the entry body.
    pub fn for_each_entry<F>(&mut self, mut visit: F) -> io::Result<()>
    where
        F: FnMut(&EntryHeader, &mut dyn Read) -> io::Result<()>,
    {
        for entry in self.inner.entries()? {
            let mut entry = entry?;
            let path = entry.path()?.into_owned();
            let header = entry.header();
            let kind = EntryKind::classify(&path, header.entry_type());
            // Skipped kinds may carry empty numeric fields
            let (mode, size) = match kind {
                EntryKind::Directory | EntryKind::Regular => (header.mode()?, header.size()?),
                EntryKind::Whiteout | EntryKind::Other => (
                    header.mode().unwrap_or(0),
                    header.size().unwrap_or(0),
                ),
            };
            let info = EntryHeader {
                kind,
                mode,
                size,
                path,
            };
            visit(&info, &mut entry)?;
        }
        Ok(())
    }
}
