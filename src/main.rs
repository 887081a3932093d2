use anyhow::{anyhow, Result};
use clap::Parser;
use layer_extender::builder::{BuilderKind, CommandBuilder, ImageBuilder};
use layer_extender::logging::{init_logging, LogFormat};
use layer_extender::metadata::BuildManifest;
use layer_extender::orchestrator::BuildOrchestrator;
use layer_extender::{EnvConfig, Pipeline};
use std::sync::Arc;

/// Build buildpack extension Dockerfiles and unpack only the layers they add
///
/// All paths and toggles are read from the environment (WORKSPACE_DIR, CACHE_DIR,
/// BUILD_DIR, EXTRACT_LAYERS, ...); flags here override a few of them.
#[derive(Parser, Debug)]
#[command(name = "layer-extender", version)]
struct Args {
    /// Image builder to drive (kaniko or buildah)
    #[arg(long, env = "BUILDER")]
    builder: Option<BuilderKind>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Do not signal and reap leftover processes before building
    #[arg(long)]
    no_reap: bool,

    /// Print the build plan and exit without building
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = EnvConfig::from_env()?;
    if let Some(builder) = args.builder {
        config.builder = builder;
    }
    if args.json_logs {
        config.logging.format = LogFormat::Json;
    }
    if args.no_reap {
        config.reap_orphans = false;
    }

    init_logging(&config.logging).map_err(|e| anyhow!("initializing logging: {}", e))?;

    let builder: Arc<dyn ImageBuilder> = Arc::new(CommandBuilder::from_config(&config));
    tracing::info!(
        builder = builder.name(),
        workspace = %config.workspace_dir.display(),
        extract = config.extract_layers,
        "Starting layer extender"
    );

    if args.dry_run {
        let plan = BuildManifest::for_config(&config)?;
        let orchestrator = BuildOrchestrator::new(&config, builder.clone());
        for (index, unit) in plan.units.iter().enumerate() {
            let options = orchestrator.options_for(index, unit);
            println!(
                "{} {} {}",
                unit.extension_id,
                unit.resolve_path(&config.workspace_dir).display(),
                options.build_args.join(" ")
            );
        }
        return Ok(());
    }

    match Pipeline::new(&config, builder).run().await {
        Ok(summary) => {
            let unpacked: usize = summary.units.iter().map(|u| u.extraction.unpacked.len()).sum();
            tracing::info!(
                units = summary.units.len(),
                layers_unpacked = unpacked,
                files_found = summary.found.len(),
                "Done"
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Run failed");
            Err(e.into())
        }
    }
}
