//! End-to-end run: reap, load, build, extract, mirror, verify.

use crate::builder::ImageBuilder;
use crate::cache_sync::{self, MirrorReport};
use crate::config::EnvConfig;
use crate::error::{is_fatal, Result};
use crate::finder;
use crate::layers::{ExclusionSet, ExtractionReport, LayerExtractor};
use crate::metadata::BuildManifest;
use crate::oci::Digest;
use crate::orchestrator::{BuildOrchestrator, BuildResult};
use crate::reaper::{ReapReport, Reaper};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct UnitOutcome {
    pub extension_id: String,
    pub image_digest: Digest,
    pub extraction: ExtractionReport,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub reap: Option<ReapReport>,
    pub units: Vec<UnitOutcome>,
    pub mirror: Option<MirrorReport>,
    pub found: Vec<PathBuf>,
    /// Units extracted without any base layer excluded
    pub unresolved_bases: Vec<String>,
}

pub struct Pipeline<'a> {
    config: &'a EnvConfig,
    builder: Arc<dyn ImageBuilder>,
    reaper: Reaper,
    layout_root: Option<PathBuf>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a EnvConfig, builder: Arc<dyn ImageBuilder>) -> Self {
        Self {
            config,
            builder,
            reaper: Reaper::new(),
            layout_root: None,
        }
    }

    pub fn with_reaper(mut self, reaper: Reaper) -> Self {
        self.reaper = reaper;
        self
    }

    pub fn with_layout_root(mut self, root: PathBuf) -> Self {
        self.layout_root = Some(root);
        self
    }

    fn orchestrator(&self) -> BuildOrchestrator<'a> {
        let orchestrator = BuildOrchestrator::new(self.config, self.builder.clone());
        match &self.layout_root {
            Some(root) => orchestrator.with_layout_root(root),
            None => orchestrator,
        }
    }

    pub async fn run(self) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        // Must happen before the first build and only once per run
        if self.config.reap_orphans {
            summary.reap = Some(self.reaper.reap_orphans().await?);
        }

        let plan = BuildManifest::for_config(self.config)?;
        if plan.is_empty() {
            tracing::warn!("Build manifest lists no Dockerfiles");
        }

        let results = self.orchestrator().build_all(&plan).await?;

        let extractor = LayerExtractor::from_config(self.config);
        for result in &results {
            let (exclusion, resolved) = self.exclusion_for(result).await;
            if !resolved {
                summary
                    .unresolved_bases
                    .push(result.unit.extension_id.clone());
            }
            let extraction = extractor.extract(&result.image, &exclusion, &self.config.target_root)?;
            summary.units.push(UnitOutcome {
                extension_id: result.unit.extension_id.clone(),
                image_digest: result.digest.clone(),
                extraction,
            });
        }

        if !summary.unresolved_bases.is_empty() {
            tracing::warn!(
                builder = self.builder.name(),
                units = ?summary.unresolved_bases,
                "Base stage layers unknown, base image layers are not excluded; set KNOWN_BASE_DIGEST to exclude them"
            );
        }

        match cache_sync::mirror(&self.config.build_dir, &self.config.cache_dir) {
            Ok(report) => summary.mirror = Some(report),
            Err(e) if !is_fatal(&e) => {
                tracing::warn!(error = %e, "Cache mirroring incomplete, continuing");
            }
            Err(e) => return Err(e),
        }

        summary.found = finder::find_files(&self.config.target_root, &self.config.files_to_search);

        tracing::info!(
            units = summary.units.len(),
            found = summary.found.len(),
            "Run completed"
        );
        Ok(summary)
    }

    /// Exclusion set for a unit, and whether any base layer source was known
    async fn exclusion_for(&self, result: &BuildResult) -> (ExclusionSet, bool) {
        let stage = match self
            .builder
            .resolve_base_stage(&result.options, &result.dockerfile)
            .await
        {
            Ok(stage) => stage,
            Err(e) => {
                tracing::warn!(
                    unit = %result.unit.extension_id,
                    error = %format!("{:#}", e),
                    "Base stage resolution failed"
                );
                None
            }
        };

        let known = self.config.known_base_digest.as_ref();
        let resolved = stage.is_some() || known.is_some();
        if !resolved {
            tracing::debug!(unit = %result.unit.extension_id, "No base stage layers known");
        }
        if let Some(stage) = &stage {
            tracing::info!(
                unit = %result.unit.extension_id,
                base = %stage.name,
                layers = stage.layers.len(),
                top = ?stage.top_layer().map(|d| d.short()),
                "Base stage resolved"
            );
        }
        (ExclusionSet::for_base(stage.as_ref(), known), resolved)
    }
}

/// Run the whole pipeline with the default reaper
pub async fn run(config: &EnvConfig, builder: Arc<dyn ImageBuilder>) -> Result<RunSummary> {
    Pipeline::new(config, builder).run().await
}
