//! Per-entry policy for materialising a layer onto a root filesystem.

use crate::constants::EXTRACTED_DIR_MODE;
use crate::error::{ExtenderError, Result};
use crate::ignore::IgnorePathSet;
use crate::layers::archive::{EntryHeader, EntryKind, LayerArchive};
use crate::log_entry_skipped;
use std::fmt;
use std::fs::{self, DirBuilder, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

/// What to do when a regular file from a layer already exists under the target root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExistingFiles {
    /// Leave the existing file untouched
    #[default]
    Skip,
    /// Replace the existing file's content and mode
    Overwrite,
}

impl FromStr for ExistingFiles {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(ExistingFiles::Skip),
            "overwrite" => Ok(ExistingFiles::Overwrite),
            other => Err(format!(
                "unknown mode '{}', expected 'skip' or 'overwrite'",
                other
            )),
        }
    }
}

impl fmt::Display for ExistingFiles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExistingFiles::Skip => write!(f, "skip"),
            ExistingFiles::Overwrite => write!(f, "overwrite"),
        }
    }
}

/// Counters for one unpacked layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnpackStats {
    pub dirs_created: usize,
    pub files_written: usize,
    pub existing_skipped: usize,
    /// Ignored, whiteout, traversal and unsupported entries
    pub entries_skipped: usize,
}

impl UnpackStats {
    pub fn merge(&mut self, other: &UnpackStats) {
        self.dirs_created += other.dirs_created;
        self.files_written += other.files_written;
        self.existing_skipped += other.existing_skipped;
        self.entries_skipped += other.entries_skipped;
    }
}

pub struct Unpacker<'a> {
    target_root: &'a Path,
    ignore: &'a IgnorePathSet,
    existing: ExistingFiles,
}

impl<'a> Unpacker<'a> {
    pub fn new(target_root: &'a Path, ignore: &'a IgnorePathSet, existing: ExistingFiles) -> Self {
        Self {
            target_root,
            ignore,
            existing,
        }
    }

    /// Unpack one gzip tar stream. `source` names the archive in errors.
    pub fn unpack<R: Read>(&self, compressed: R, source: &Path) -> Result<UnpackStats> {
        let mut stats = UnpackStats::default();
        let mut failed_at: Option<PathBuf> = None;

        let outcome = LayerArchive::new(compressed).for_each_entry(|entry, body| {
            self.apply(entry, body, &mut stats).map_err(|(path, e)| {
                failed_at = Some(path);
                e
            })
        });

        match outcome {
            Ok(()) => Ok(stats),
            Err(e) => {
                let path = failed_at.unwrap_or_else(|| source.to_path_buf());
                Err(ExtenderError::extraction(&path, e))
            }
        }
    }

    fn apply(
        &self,
        entry: &EntryHeader,
        body: &mut dyn Read,
        stats: &mut UnpackStats,
    ) -> std::result::Result<(), (PathBuf, io::Error)> {
        if entry.has_parent_traversal() {
            log_entry_skipped!(entry.path, "path traversal");
            stats.entries_skipped += 1;
            return Ok(());
        }
        if self.ignore.is_ignored(&entry.path) {
            log_entry_skipped!(entry.path, "ignored path");
            stats.entries_skipped += 1;
            return Ok(());
        }

        let relative: PathBuf = entry
            .path
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part),
                _ => None,
            })
            .collect();
        if relative.as_os_str().is_empty() {
            return Ok(());
        }
        let target = self.target_root.join(&relative);

        match entry.kind {
            EntryKind::Directory => {
                if fs::symlink_metadata(&target).is_err() {
                    create_dirs(&target).map_err(|e| (target.clone(), e))?;
                    stats.dirs_created += 1;
                }
                Ok(())
            }
            EntryKind::Regular => self
                .write_file(&target, entry.mode, body, stats)
                .map_err(|e| (target.clone(), e)),
            EntryKind::Whiteout => {
                log_entry_skipped!(entry.path, "whiteout");
                stats.entries_skipped += 1;
                Ok(())
            }
            EntryKind::Other => {
                tracing::info!(path = %entry.path.display(), "Unsupported entry type, skipping");
                stats.entries_skipped += 1;
                Ok(())
            }
        }
    }

    fn write_file(
        &self,
        target: &Path,
        mode: u32,
        body: &mut dyn Read,
        stats: &mut UnpackStats,
    ) -> io::Result<()> {
        let mode = mode & 0o7777;

        if let Ok(meta) = fs::symlink_metadata(target) {
            if self.existing == ExistingFiles::Skip || meta.is_dir() {
                log_entry_skipped!(target, "already exists");
                stats.existing_skipped += 1;
                return Ok(());
            }
        }

        if let Some(parent) = target.parent() {
            if fs::symlink_metadata(parent).is_err() {
                create_dirs(parent)?;
            }
        }

        let mut options = OpenOptions::new();
        options.write(true).mode(mode);
        match self.existing {
            ExistingFiles::Skip => options.create_new(true),
            ExistingFiles::Overwrite => options.create(true).truncate(true),
        };

        let mut file = match options.open(target) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                stats.existing_skipped += 1;
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        io::copy(body, &mut file)?;
        if self.existing == ExistingFiles::Overwrite {
            file.set_permissions(fs::Permissions::from_mode(mode))?;
        }
        stats.files_written += 1;
        Ok(())
    }
}

fn create_dirs(path: &Path) -> io::Result<()> {
    DirBuilder::new()
        .recursive(true)
        .mode(EXTRACTED_DIR_MODE)
        .create(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tar::{Builder, EntryType, Header};
    use tempfile::TempDir;

    enum Item<'a> {
        Dir(&'a str),
        File(&'a str, &'a [u8], u32),
        Symlink(&'a str, &'a str),
    }

    fn layer(items: &[Item]) -> Vec<u8> {
        let mut builder = Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for item in items {
            let mut header = Header::new_gnu();
            match item {
                Item::Dir(path) => {
                    header.set_entry_type(EntryType::Directory);
                    header.set_mode(0o700);
                    header.set_size(0);
                    header.set_cksum();
                    builder.append_data(&mut header, path, std::io::empty()).unwrap();
                }
                Item::File(path, data, mode) => {
                    header.set_mode(*mode);
                    header.set_size(data.len() as u64);
                    header.set_cksum();
                    builder.append_data(&mut header, path, *data).unwrap();
                }
                Item::Symlink(path, target) => {
                    header.set_entry_type(EntryType::Symlink);
                    header.set_size(0);
                    header.set_cksum();
                    builder.append_link(&mut header, path, target).unwrap();
                }
            }
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn unpack(root: &Path, ignore: &IgnorePathSet, mode: ExistingFiles, data: &[u8]) -> UnpackStats {
        Unpacker::new(root, ignore, mode)
            .unpack(data, Path::new("layer.tgz"))
            .unwrap()
    }

    #[test]
    fn test_existing_files_parsing() {
        assert_eq!("Skip".parse::<ExistingFiles>().unwrap(), ExistingFiles::Skip);
        assert_eq!(
            "overwrite".parse::<ExistingFiles>().unwrap(),
            ExistingFiles::Overwrite
        );
        assert!("merge".parse::<ExistingFiles>().is_err());
        assert_eq!(ExistingFiles::default(), ExistingFiles::Skip);
    }

    #[test]
    fn test_files_and_directories_materialised() {
        let root = TempDir::new().unwrap();
        let data = layer(&[
            Item::Dir("opt/tool/"),
            Item::File("opt/tool/run.sh", b"echo ok", 0o750),
            Item::File("etc/deep/nested/conf", b"k=v", 0o640),
        ]);
        let stats = unpack(root.path(), &IgnorePathSet::empty(), ExistingFiles::Skip, &data);

        assert_eq!(stats.files_written, 2);
        let script = root.path().join("opt/tool/run.sh");
        assert_eq!(fs::read(&script).unwrap(), b"echo ok");
        let mode = fs::metadata(&script).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode & 0o700, 0o700);
        assert_eq!(mode & 0o007, 0);
        assert!(root.path().join("etc/deep/nested/conf").is_file());
    }

    #[test]
    fn test_existing_file_is_kept_in_skip_mode() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("etc")).unwrap();
        fs::write(root.path().join("etc/hostname"), b"original").unwrap();

        let data = layer(&[Item::File("etc/hostname", b"replaced", 0o644)]);
        let stats = unpack(root.path(), &IgnorePathSet::empty(), ExistingFiles::Skip, &data);

        assert_eq!(stats.existing_skipped, 1);
        assert_eq!(fs::read(root.path().join("etc/hostname")).unwrap(), b"original");
    }

    #[test]
    fn test_existing_file_is_replaced_in_overwrite_mode() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("motd"), b"original").unwrap();

        let data = layer(&[Item::File("motd", b"replaced", 0o600)]);
        let stats = unpack(
            root.path(),
            &IgnorePathSet::empty(),
            ExistingFiles::Overwrite,
            &data,
        );

        assert_eq!(stats.files_written, 1);
        let path = root.path().join("motd");
        assert_eq!(fs::read(&path).unwrap(), b"replaced");
        assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn test_existing_directory_untouched() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("srv");
        fs::create_dir(&dir).unwrap();
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o711)).unwrap();

        let data = layer(&[Item::Dir("srv/")]);
        let stats = unpack(root.path(), &IgnorePathSet::empty(), ExistingFiles::Skip, &data);

        assert_eq!(stats.dirs_created, 0);
        assert_eq!(fs::metadata(&dir).unwrap().permissions().mode() & 0o777, 0o711);
    }

    #[test]
    fn test_skipped_entries() {
        let root = TempDir::new().unwrap();
        let ignore = IgnorePathSet::parse_list("/var/run");
        let data = layer(&[
            Item::File("var/run/app.pid", b"42", 0o644),
            Item::File("etc/.wh.motd", b"", 0o644),
            Item::Symlink("usr/bin/sh", "dash"),
            Item::File("usr/bin/dash", b"elf", 0o755),
        ]);
        let stats = unpack(root.path(), &ignore, ExistingFiles::Skip, &data);

        assert_eq!(stats.entries_skipped, 3);
        assert_eq!(stats.files_written, 1);
        assert!(!root.path().join("var/run/app.pid").exists());
        assert!(!root.path().join("etc/.wh.motd").exists());
        assert!(fs::symlink_metadata(root.path().join("usr/bin/sh")).is_err());
    }

    #[test]
    fn test_unpack_twice_is_idempotent() {
        let root = TempDir::new().unwrap();
        let data = layer(&[Item::Dir("app/"), Item::File("app/main", b"bin", 0o755)]);

        let first = unpack(root.path(), &IgnorePathSet::empty(), ExistingFiles::Skip, &data);
        let second = unpack(root.path(), &IgnorePathSet::empty(), ExistingFiles::Skip, &data);

        assert_eq!(first.files_written, 1);
        assert_eq!(second.files_written, 0);
        assert_eq!(second.existing_skipped, 1);
        assert_eq!(fs::read(root.path().join("app/main")).unwrap(), b"bin");
    }

    #[test]
    fn test_corrupt_archive_is_extraction_error() {
        let root = TempDir::new().unwrap();
        let err = Unpacker::new(root.path(), &IgnorePathSet::empty(), ExistingFiles::Skip)
            .unpack(&b"garbage"[..], Path::new("/kaniko/bad.tgz"))
            .unwrap_err();
        assert!(matches!(err, ExtenderError::Extraction { ref path, .. } if path == Path::new("/kaniko/bad.tgz")));
    }
}
