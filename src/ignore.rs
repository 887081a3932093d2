use glob::Pattern;
use std::path::{Component, Path, PathBuf};

/// Path prefixes excluded from the build snapshot and from layer extraction.
///
/// Entries are matched against a path and every one of its ancestors, so a plain
/// entry such as `/var/run` acts as a prefix. Glob syntax is accepted as well.
#[derive(Debug, Clone, Default)]
pub struct IgnorePathSet {
    entries: Vec<String>,
    patterns: Vec<Pattern>,
}

impl IgnorePathSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a comma-separated list, as found in `IGNORE_PATHS`
    pub fn parse_list(content: &str) -> Self {
        Self::from_entries(content.split(','))
    }

    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::empty();
        for entry in entries {
            let entry = entry.as_ref().trim();
            if entry.is_empty() {
                continue;
            }
            let normalized = normalize(Path::new(entry));
            if let Ok(pattern) = Pattern::new(&normalized.to_string_lossy()) {
                set.entries.push(entry.to_string());
                set.patterns.push(pattern);
            } else {
                tracing::warn!(entry, "Ignoring malformed ignore path");
            }
        }
        set
    }

    /// Entries as configured, for forwarding to the image builder
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Returns true if `path` (absolute or relative to the root) falls under an entry
    pub fn is_ignored(&self, path: &Path) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        let path = normalize(path);
        for ancestor in path.ancestors() {
            let path_str = ancestor.to_string_lossy();
            if path_str.is_empty() {
                continue;
            }
            if self.patterns.iter().any(|p| p.matches(&path_str)) {
                return true;
            }
        }
        false
    }
}

/// Drops root, `.` and trailing separators so `/var/run/`, `var/run` and `./var/run` compare equal
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect()
}
