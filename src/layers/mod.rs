//! Layer persistence and extraction.
//!
//! Every layer of a built image is saved as `<buildDir>/<digest>.tgz`. Layers that belong to
//! the base stage are then excluded, and the remaining ones are unpacked onto the target root.

pub mod archive;
pub mod extract;
pub mod unpack;

pub use extract::LayerExtractor;
pub use unpack::{ExistingFiles, UnpackStats};

use crate::oci::{Digest, StageImage};
use std::collections::HashSet;
use std::path::PathBuf;

/// A layer archive persisted on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TarFileRecord {
    pub digest: Digest,
    pub path: PathBuf,
    pub size: u64,
}

/// Digests of layers that must never be unpacked
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    digests: HashSet<Digest>,
}

impl ExclusionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// All layers of the base stage plus the optional configured known-base digest
    pub fn for_base(stage: Option<&StageImage>, known_base: Option<&Digest>) -> Self {
        let mut set = Self::new();
        if let Some(stage) = stage {
            set.extend(stage.layers.iter().cloned());
        }
        if let Some(digest) = known_base {
            set.insert(digest.clone());
        }
        set
    }

    pub fn insert(&mut self, digest: Digest) -> bool {
        self.digests.insert(digest)
    }

    pub fn extend<I: IntoIterator<Item = Digest>>(&mut self, digests: I) {
        self.digests.extend(digests);
    }

    pub fn contains(&self, digest: &Digest) -> bool {
        self.digests.contains(digest)
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}

/// Outcome of extracting one image
#[derive(Debug, Clone, Default)]
pub struct ExtractionReport {
    /// Every persisted archive, in builder order
    pub records: Vec<TarFileRecord>,
    /// Layers unpacked onto the target root, in order
    pub unpacked: Vec<Digest>,
    pub excluded: Vec<Digest>,
    pub stats: UnpackStats,
    pub config_path: Option<PathBuf>,
    pub manifest_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(byte: u8) -> Digest {
        Digest::sha256_of(&[byte])
    }

    #[test]
    fn test_exclusion_covers_whole_stage_and_known_digest() {
        let stage = StageImage {
            name: "ubuntu:bionic".to_string(),
            layers: vec![digest(1), digest(2)],
        };
        let known = digest(9);
        let set = ExclusionSet::for_base(Some(&stage), Some(&known));

        assert_eq!(set.len(), 3);
        assert!(set.contains(&digest(1)));
        assert!(set.contains(&digest(2)));
        assert!(set.contains(&known));
        assert!(!set.contains(&digest(3)));
    }

    #[test]
    fn test_no_base_excludes_nothing() {
        assert!(ExclusionSet::for_base(None, None).is_empty());
    }
}
