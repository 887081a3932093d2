pub mod builder;
pub mod cache_sync;
pub mod config;
pub mod constants;
pub mod docker;
pub mod error;
pub mod finder;
pub mod ignore;
pub mod layers;
pub mod logging;
pub mod metadata;
pub mod oci;
pub mod orchestrator;
pub mod pipeline;
pub mod reaper;

pub use config::EnvConfig;
pub use error::{ExtenderError, Result};
pub use pipeline::{Pipeline, RunSummary};
