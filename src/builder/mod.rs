//! Image builder capability.
//!
//! The orchestrator only talks to [`ImageBuilder`]; [`command::CommandBuilder`] drives the
//! kaniko executor or buildah as a child process and reads the result back from an OCI layout.

pub mod command;

pub use command::CommandBuilder;

use crate::constants::{DEFAULT_BUILDAH_BINARY, DEFAULT_KANIKO_EXECUTOR};
use crate::oci::{ImageHandle, StageImage};
use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuilderKind {
    #[default]
    Kaniko,
    Buildah,
}

impl BuilderKind {
    pub fn default_binary(&self) -> &'static str {
        match self {
            BuilderKind::Kaniko => DEFAULT_KANIKO_EXECUTOR,
            BuilderKind::Buildah => DEFAULT_BUILDAH_BINARY,
        }
    }
}

impl FromStr for BuilderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kaniko" => Ok(BuilderKind::Kaniko),
            "buildah" => Ok(BuilderKind::Buildah),
            other => Err(format!(
                "unknown builder '{}', expected 'kaniko' or 'buildah'",
                other
            )),
        }
    }
}

impl fmt::Display for BuilderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuilderKind::Kaniko => write!(f, "kaniko"),
            BuilderKind::Buildah => write!(f, "buildah"),
        }
    }
}

/// Everything one builder invocation needs, built fresh per unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    pub context_dir: PathBuf,
    /// `KEY=VALUE`, global args first
    pub build_args: Vec<String>,
    pub ignore_paths: Vec<String>,
    pub cache_dir: PathBuf,
    pub snapshot_mode: String,
    pub no_push: bool,
    pub tag: String,
    /// OCI layout directory the built image is written to
    pub output_dir: PathBuf,
}

#[async_trait]
pub trait ImageBuilder: Send + Sync {
    fn name(&self) -> &str;

    async fn build(&self, opts: &BuildOptions, dockerfile: &Path) -> Result<ImageHandle>;

    /// Image the Dockerfile's final stage derives from, with its layer digests.
    ///
    /// `Ok(None)` when the builder cannot tell, or the stage starts from scratch.
    async fn resolve_base_stage(
        &self,
        opts: &BuildOptions,
        dockerfile: &Path,
    ) -> Result<Option<StageImage>>;
}
