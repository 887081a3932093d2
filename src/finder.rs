use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Every regular file under `root` whose base name is one of `names`, in walk order.
///
/// Used after extraction to confirm that files expected from the new layers are present.
/// Unreadable entries are logged and skipped.
pub fn find_files(root: &Path, names: &[String]) -> Vec<PathBuf> {
    if names.is_empty() {
        return Vec::new();
    }
    let wanted: BTreeSet<&str> = names.iter().map(String::as_str).collect();
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    let mut found = Vec::new();

    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::debug!(error = %err, "Skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if let Some(&matched) = wanted.get(name) {
            tracing::info!(path = %entry.path().display(), "File found");
            seen.insert(matched);
            found.push(entry.into_path());
        }
    }

    for missing in wanted.difference(&seen) {
        tracing::warn!(name = %missing, root = %root.display(), "File not found");
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_finds_regular_files_by_base_name() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("usr/bin")).unwrap();
        fs::create_dir_all(root.path().join("opt/curl")).unwrap();
        fs::write(root.path().join("usr/bin/curl"), b"elf").unwrap();
        fs::write(root.path().join("hello.txt"), b"hi").unwrap();

        let names = vec!["curl".to_string(), "hello.txt".to_string()];
        let found = find_files(root.path(), &names);

        // The `opt/curl` directory is not a regular file
        assert_eq!(
            found,
            vec![root.path().join("hello.txt"), root.path().join("usr/bin/curl")]
        );
    }

    #[test]
    fn test_no_names_or_no_match() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("a"), b"").unwrap();
        assert!(find_files(root.path(), &[]).is_empty());
        assert!(find_files(root.path(), &["b".to_string()]).is_empty());
    }

    #[test]
    fn test_missing_root_yields_nothing() {
        assert!(find_files(Path::new("/nonexistent/root"), &["x".to_string()]).is_empty());
    }
}
