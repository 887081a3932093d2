/// layer-extender error types and the fatal/advisory policy
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExtenderError>;

/// Main error type for layer-extender operations
#[derive(Debug, Error)]
pub enum ExtenderError {
    /// An environment variable held a value that could not be interpreted
    #[error("Configuration error in {var}: {reason}")]
    Config { var: String, reason: String },

    /// The build manifest is malformed or structurally invalid
    #[error("Manifest decode error in {}: {reason}", path.display())]
    ManifestDecode { path: PathBuf, reason: String },

    /// The image builder failed for a build unit
    #[error("Build failed for {unit}: {source:#}")]
    Build {
        unit: String,
        #[source]
        source: anyhow::Error,
    },

    /// Persisting or unpacking a layer archive failed
    #[error("Extraction error at {}: {source}", path.display())]
    Extraction {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The bytes persisted for a layer do not hash to its declared digest
    #[error("Layer integrity failure: expected {expected}, got {actual}")]
    LayerIntegrity { expected: String, actual: String },

    /// A single entry could not be mirrored into the cache directory
    #[error("Cache sync error at {}: {source}", path.display())]
    CacheSync {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ExtenderError {
    pub fn config(var: &str, reason: impl Into<String>) -> Self {
        Self::Config {
            var: var.to_string(),
            reason: reason.into(),
        }
    }

    pub fn manifest(path: &Path, reason: impl Into<String>) -> Self {
        Self::ManifestDecode {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn extraction(path: &Path, source: io::Error) -> Self {
        Self::Extraction {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn cache_sync(path: &Path, source: io::Error) -> Self {
        Self::CacheSync {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Whether an error must abort the run.
///
/// Anything that could leave the image or the target root partially extracted is fatal.
/// Cache mirroring is advisory: it is logged and the run carries on.
pub fn is_fatal(err: &ExtenderError) -> bool {
    match err {
        ExtenderError::Config { .. } => true,
        ExtenderError::ManifestDecode { .. } => true,
        ExtenderError::Build { .. } => true,
        ExtenderError::Extraction { .. } => true,
        ExtenderError::LayerIntegrity { .. } => true,
        ExtenderError::CacheSync { .. } => false,
        ExtenderError::Other(_) => true,
    }
}
