use crate::builder::{BuildOptions, BuilderKind, ImageBuilder};
use crate::config::{EnvConfig, StorageSettings};
use crate::docker::{final_base_image, parse_stages};
use crate::oci::{ImageHandle, OciLayout, StageImage};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Runs kaniko or buildah as a child process
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    kind: BuilderKind,
    binary: PathBuf,
    storage: StorageSettings,
}

impl CommandBuilder {
    pub fn new(kind: BuilderKind, binary: Option<PathBuf>, storage: StorageSettings) -> Self {
        let binary = binary.unwrap_or_else(|| PathBuf::from(kind.default_binary()));
        Self {
            kind,
            binary,
            storage,
        }
    }

    pub fn from_config(config: &EnvConfig) -> Self {
        Self::new(
            config.builder,
            config.builder_binary.clone(),
            config.storage.clone(),
        )
    }

    pub fn kind(&self) -> BuilderKind {
        self.kind
    }

    pub fn kaniko_args(&self, opts: &BuildOptions, dockerfile: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--dockerfile".into(),
            dockerfile.into(),
            "--context".into(),
            format!("dir://{}", opts.context_dir.display()).into(),
            "--cache-dir".into(),
            opts.cache_dir.as_os_str().into(),
            "--snapshot-mode".into(),
            opts.snapshot_mode.as_str().into(),
        ];
        if opts.no_push {
            args.push("--no-push".into());
        }
        for path in &opts.ignore_paths {
            args.push("--ignore-path".into());
            args.push(path.into());
        }
        for arg in &opts.build_args {
            args.push("--build-arg".into());
            args.push(arg.into());
        }
        args.push("--oci-layout-path".into());
        args.push(opts.output_dir.as_os_str().into());
        args
    }

    fn storage_args(&self) -> Vec<OsString> {
        vec![
            "--storage-driver".into(),
            self.storage.graph_driver.as_str().into(),
            "--root".into(),
            self.storage.root.as_os_str().into(),
            "--runroot".into(),
            self.storage.run_root.as_os_str().into(),
        ]
    }

    pub fn buildah_bud_args(&self, opts: &BuildOptions, dockerfile: &Path) -> Vec<OsString> {
        let mut args = self.storage_args();
        args.extend(
            [
                "bud",
                "--isolation",
                "chroot",
                "--network",
                "host",
                "--no-cache",
                "--layers=false",
            ]
            .map(OsString::from),
        );
        args.push("-f".into());
        args.push(dockerfile.into());
        args.push("-t".into());
        args.push(opts.tag.as_str().into());
        for arg in &opts.build_args {
            args.push("--build-arg".into());
            args.push(arg.into());
        }
        args.push(opts.context_dir.as_os_str().into());
        args
    }

    /// `buildah push <image> oci:<dir>`
    pub fn buildah_push_args(&self, image: &str, layout_dir: &Path) -> Vec<OsString> {
        let mut args = self.storage_args();
        args.push("push".into());
        args.push(image.into());
        args.push(format!("oci:{}", layout_dir.display()).into());
        args
    }

    async fn run(&self, args: Vec<OsString>) -> Result<()> {
        tracing::debug!(binary = %self.binary.display(), ?args, "Running builder");
        let output = Command::new(&self.binary)
            .args(&args)
            .output()
            .await
            .with_context(|| format!("spawning {}", self.binary.display()))?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            tracing::debug!(target: "layer_extender::builder", "{}", line);
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} exited with {}: {}",
                self.binary.display(),
                output.status,
                stderr.trim()
            );
        }
        Ok(())
    }

    fn reset_layout_dir(dir: &Path) -> Result<()> {
        if dir.exists() {
            std::fs::remove_dir_all(dir)
                .with_context(|| format!("clearing OCI layout '{}'", dir.display()))?;
        }
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating OCI layout '{}'", dir.display()))
    }
}

#[async_trait]
impl ImageBuilder for CommandBuilder {
    fn name(&self) -> &str {
        match self.kind {
            BuilderKind::Kaniko => "kaniko",
            BuilderKind::Buildah => "buildah",
        }
    }

    async fn build(&self, opts: &BuildOptions, dockerfile: &Path) -> Result<ImageHandle> {
        Self::reset_layout_dir(&opts.output_dir)?;

        match self.kind {
            BuilderKind::Kaniko => self.run(self.kaniko_args(opts, dockerfile)).await?,
            BuilderKind::Buildah => {
                self.run(self.buildah_bud_args(opts, dockerfile)).await?;
                self.run(self.buildah_push_args(&opts.tag, &opts.output_dir))
                    .await?;
            }
        }

        OciLayout::new(&opts.output_dir)
            .read_image()
            .with_context(|| format!("reading image built from {}", dockerfile.display()))
    }

    async fn resolve_base_stage(
        &self,
        opts: &BuildOptions,
        dockerfile: &Path,
    ) -> Result<Option<StageImage>> {
        let content = tokio::fs::read_to_string(dockerfile)
            .await
            .with_context(|| format!("reading {}", dockerfile.display()))?;
        let base = match final_base_image(&parse_stages(&content, &opts.build_args)) {
            Some(base) if base.is_empty() => {
                tracing::warn!(dockerfile = %dockerfile.display(), "Base image expands to an empty reference");
                return Ok(None);
            }
            Some(base) => base,
            None => {
                return Ok(Some(StageImage {
                    name: "scratch".to_string(),
                    layers: Vec::new(),
                }))
            }
        };

        match self.kind {
            // The executor keeps no local image store to inspect
            BuilderKind::Kaniko => {
                tracing::debug!(base = %base, "Base stage layers unavailable from kaniko");
                Ok(None)
            }
            BuilderKind::Buildah => {
                let layout_dir = opts.output_dir.with_extension("base");
                Self::reset_layout_dir(&layout_dir)?;

                let mut pull = self.storage_args();
                pull.push("pull".into());
                pull.push(base.as_str().into());
                self.run(pull).await?;
                self.run(self.buildah_push_args(&base, &layout_dir)).await?;

                let layers = OciLayout::new(&layout_dir).layer_digests()?;
                Ok(Some(StageImage { name: base, layers }))
            }
        }
    }
}
