use crate::error::{ExtenderError, Result};
use std::fs::{self, DirBuilder};
use std::io;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorReport {
    pub dirs: usize,
    pub files: usize,
    pub symlinks: usize,
    pub failed: Vec<PathBuf>,
}

/// Recursively copy `src` into `dst`, keeping file and directory modes.
///
/// Entries that fail are logged and the walk carries on; the first failure is returned once
/// the walk is complete. Nothing is ever removed from `dst`.
pub fn mirror(src: &Path, dst: &Path) -> Result<MirrorReport> {
    let mut report = MirrorReport::default();
    let mut first_error: Option<ExtenderError> = None;

    let src_root = fs::canonicalize(src).map_err(|e| ExtenderError::cache_sync(src, e))?;
    let root_mode = fs::metadata(&src_root)
        .map_err(|e| ExtenderError::cache_sync(src, e))?
        .permissions()
        .mode();
    ensure_dir(dst, root_mode).map_err(|e| ExtenderError::cache_sync(dst, e))?;
    let dst_root = fs::canonicalize(dst).map_err(|e| ExtenderError::cache_sync(dst, e))?;

    let walker = WalkDir::new(&src_root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        // dst nested inside src must not be copied into itself
        .filter_entry(|entry| entry.path() != dst_root);

    for entry in walker {
        let outcome = match entry {
            Ok(entry) => {
                let rel = entry.path().strip_prefix(&src_root).unwrap_or(entry.path());
                let target = dst.join(rel);
                copy_entry(&entry, &target, &mut report).map_err(|e| (target, e))
            }
            Err(err) => {
                let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| src.to_path_buf());
                Err((path, io::Error::from(err)))
            }
        };

        if let Err((path, e)) = outcome {
            tracing::warn!(path = %path.display(), error = %e, "Failed to mirror entry");
            report.failed.push(path.clone());
            if first_error.is_none() {
                first_error = Some(ExtenderError::cache_sync(&path, e));
            }
        }
    }

    tracing::info!(
        src = %src.display(),
        dst = %dst.display(),
        dirs = report.dirs,
        files = report.files,
        failed = report.failed.len(),
        "Directory mirrored"
    );

    match first_error {
        Some(err) => Err(err),
        None => Ok(report),
    }
}

fn copy_entry(entry: &walkdir::DirEntry, target: &Path, report: &mut MirrorReport) -> io::Result<()> {
    let file_type = entry.file_type();

    if file_type.is_symlink() {
        let link = fs::read_link(entry.path())?;
        if fs::symlink_metadata(target).is_ok() {
            fs::remove_file(target)?;
        }
        std::os::unix::fs::symlink(&link, target)?;
        report.symlinks += 1;
        return Ok(());
    }

    if file_type.is_dir() {
        let mode = entry.metadata().map_err(io::Error::from)?.permissions().mode();
        ensure_dir(target, mode)?;
        report.dirs += 1;
    } else if file_type.is_file() {
        fs::copy(entry.path(), target)?;
        // Mode is read once the copy has finished
        let mode = fs::metadata(entry.path())?.permissions().mode();
        fs::set_permissions(target, fs::Permissions::from_mode(mode))?;
        report.files += 1;
    } else {
        tracing::debug!(path = %entry.path().display(), "Special file not mirrored");
    }
    Ok(())
}

fn ensure_dir(path: &Path, mode: u32) -> io::Result<()> {
    if !path.is_dir() {
        DirBuilder::new().recursive(true).mode(mode).create(path)?;
    }
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}
