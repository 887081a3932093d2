use crate::builder::{BuildOptions, ImageBuilder};
use crate::config::EnvConfig;
use crate::constants::IMAGE_REPOSITORY;
use crate::error::{ExtenderError, Result};
use crate::metadata::{BuildManifest, DockerfileUnit};
use crate::oci::{Digest, ImageHandle};
use crate::{log_build_complete, log_build_start};
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

/// Serializes changes of the process working directory
static CWD_LOCK: Mutex<()> = Mutex::const_new(());

/// One successful unit build
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub unit: DockerfileUnit,
    pub image: ImageHandle,
    pub digest: Digest,
    pub options: BuildOptions,
    pub dockerfile: PathBuf,
}

/// Builds every unit of a manifest in declaration order
pub struct BuildOrchestrator<'a> {
    config: &'a EnvConfig,
    builder: Arc<dyn ImageBuilder>,
    layout_root: PathBuf,
    run_stamp: String,
}

impl<'a> BuildOrchestrator<'a> {
    pub fn new(config: &'a EnvConfig, builder: Arc<dyn ImageBuilder>) -> Self {
        Self {
            config,
            builder,
            layout_root: std::env::temp_dir().join("layer-extender"),
            run_stamp: chrono::Utc::now().format("%Y%m%d%H%M%S").to_string(),
        }
    }

    /// Directory under which each build's OCI layout is written
    pub fn with_layout_root<P: AsRef<Path>>(mut self, root: P) -> Self {
        self.layout_root = root.as_ref().to_path_buf();
        self
    }

    /// Global prefixed args first, then the unit's own build args
    pub fn build_args_for(&self, unit: &DockerfileUnit) -> Vec<String> {
        let mut args = self.config.global_build_args.clone();
        args.extend(
            unit.flattened_build_args()
                .into_iter()
                .map(|(k, v)| format!("{}={}", k, v)),
        );
        args
    }

    pub fn options_for(&self, index: usize, unit: &DockerfileUnit) -> BuildOptions {
        let run_id = format!("{}-{}", self.run_stamp, index + 1);
        BuildOptions {
            context_dir: self.config.workspace_dir.clone(),
            build_args: self.build_args_for(unit),
            ignore_paths: self.config.ignore_paths.entries().to_vec(),
            cache_dir: self.config.cache_dir.clone(),
            snapshot_mode: self.config.snapshot_mode.clone(),
            no_push: true,
            tag: format!("{}:{}", IMAGE_REPOSITORY, run_id),
            output_dir: self.layout_root.join(run_id),
        }
    }

    /// Build each unit in order. The first failure aborts the run.
    pub async fn build_all(&self, plan: &BuildManifest) -> Result<Vec<BuildResult>> {
        let mut results = Vec::with_capacity(plan.len());

        for (index, unit) in plan.units.iter().enumerate() {
            let options = self.options_for(index, unit);
            let dockerfile = unit.resolve_path(&self.config.workspace_dir);
            log_build_start!(unit.extension_id, dockerfile);

            let start = Instant::now();
            let image = self
                .build_in_home(&options, &dockerfile)
                .await
                .map_err(|source| ExtenderError::Build {
                    unit: unit.extension_id.clone(),
                    source,
                })?;

            log_build_complete!(
                unit.extension_id,
                image.digest,
                image.layers.len(),
                start.elapsed().as_millis() as u64
            );
            results.push(BuildResult {
                unit: unit.clone(),
                digest: image.digest.clone(),
                image,
                options,
                dockerfile,
            });
        }

        Ok(results)
    }

    async fn build_in_home(
        &self,
        options: &BuildOptions,
        dockerfile: &Path,
    ) -> anyhow::Result<ImageHandle> {
        let _guard = CWD_LOCK.lock().await;
        std::env::set_current_dir(&self.config.builder_home).with_context(|| {
            format!(
                "entering builder home {}",
                self.config.builder_home.display()
            )
        })?;
        self.builder.build(options, dockerfile).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{UnitArg, UnitArgs};
    use crate::oci::StageImage;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    /// Records each call; fails on the Dockerfile whose path contains `fail_on`
    struct RecordingBuilder {
        calls: StdMutex<Vec<(PathBuf, BuildOptions, PathBuf)>>,
        fail_on: Option<&'static str>,
    }

    impl RecordingBuilder {
        fn new(fail_on: Option<&'static str>) -> Self {
            Self {
                calls: StdMutex::new(Vec::new()),
                fail_on,
            }
        }
    }

    #[async_trait]
    impl ImageBuilder for RecordingBuilder {
        fn name(&self) -> &str {
            "recording"
        }

        async fn build(&self, opts: &BuildOptions, dockerfile: &Path) -> anyhow::Result<ImageHandle> {
            let cwd = std::env::current_dir()?;
            self.calls
                .lock()
                .unwrap()
                .push((dockerfile.to_path_buf(), opts.clone(), cwd));
            if let Some(marker) = self.fail_on {
                if dockerfile.to_string_lossy().contains(marker) {
                    anyhow::bail!("executor exited with status 1");
                }
            }
            Ok(ImageHandle {
                id: "id".to_string(),
                digest: Digest::sha256_of(dockerfile.to_string_lossy().as_bytes()),
                layers: Vec::new(),
                raw_manifest: Vec::new(),
                config: Vec::new(),
            })
        }

        async fn resolve_base_stage(
            &self,
            _opts: &BuildOptions,
            _dockerfile: &Path,
        ) -> anyhow::Result<Option<StageImage>> {
            Ok(None)
        }
    }

    fn unit(id: &str, path: &str, args: &[(&str, &str)]) -> DockerfileUnit {
        DockerfileUnit {
            extension_id: id.to_string(),
            path: path.to_string(),
            build: true,
            run: false,
            args: UnitArgs {
                build: args.iter().map(|(k, v)| UnitArg::new(k, v)).collect(),
                run: Vec::new(),
            },
        }
    }

    fn config(tmp: &Path) -> EnvConfig {
        EnvConfig::from_vars(vec![
            ("WORKSPACE_DIR".to_string(), tmp.join("workspace").display().to_string()),
            ("BUILD_DIR".to_string(), tmp.display().to_string()),
            ("CNB_STACK_ID".to_string(), "bionic".to_string()),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_units_built_in_order_with_merged_args() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(tmp.path());
        let builder = Arc::new(RecordingBuilder::new(None));
        let plan = BuildManifest {
            units: vec![
                unit("a", "/layers/a/Dockerfile", &[("A", "1"), ("A", "2"), ("B", "3")]),
                unit("b", "b/Dockerfile", &[]),
            ],
        };

        let results = BuildOrchestrator::new(&cfg, builder.clone())
            .with_layout_root(tmp.path().join("oci"))
            .build_all(&plan)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].unit.extension_id, "a");
        let calls = builder.calls.lock().unwrap();
        assert_eq!(calls[0].0, tmp.path().join("workspace/layers/a/Dockerfile"));
        assert_eq!(calls[1].0, tmp.path().join("workspace/b/Dockerfile"));
        assert_eq!(
            calls[0].1.build_args,
            vec!["CNB_STACK_ID=bionic", "A=2", "B=3"]
        );
        assert_eq!(calls[1].1.build_args, vec!["CNB_STACK_ID=bionic"]);
        assert!(calls[0].1.no_push);
        assert!(calls[0].1.tag.starts_with("extender-build:"));
        assert_ne!(calls[0].1.output_dir, calls[1].1.output_dir);
        // The builder runs from the builder home
        assert_eq!(calls[0].2, std::fs::canonicalize(tmp.path()).unwrap());
    }

    #[tokio::test]
    async fn test_first_failure_aborts_remaining_units() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(tmp.path());
        let builder = Arc::new(RecordingBuilder::new(Some("broken")));
        let plan = BuildManifest {
            units: vec![
                unit("ok", "ok/Dockerfile", &[]),
                unit("broken", "broken/Dockerfile", &[]),
                unit("never", "never/Dockerfile", &[]),
            ],
        };

        let err = BuildOrchestrator::new(&cfg, builder.clone())
            .build_all(&plan)
            .await
            .unwrap_err();

        assert!(matches!(err, ExtenderError::Build { ref unit, .. } if unit == "broken"));
        assert_eq!(builder.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_builder_home_is_build_error() {
        let tmp = TempDir::new().unwrap();
        let cfg = EnvConfig::from_vars(vec![(
            "BUILDER_HOME".to_string(),
            tmp.path().join("absent").display().to_string(),
        )])
        .unwrap();
        let builder = Arc::new(RecordingBuilder::new(None));
        let plan = BuildManifest {
            units: vec![unit("a", "Dockerfile", &[])],
        };

        let err = BuildOrchestrator::new(&cfg, builder.clone())
            .build_all(&plan)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("builder home"));
        assert!(builder.calls.lock().unwrap().is_empty());
    }
}
