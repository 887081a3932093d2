use std::io;
use std::str::FromStr;
/// Structured logging setup for layer-extender
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Plain text without ANSI colors
    #[default]
    Text,
    /// Colored text for interactive terminals
    Color,
    /// One JSON object per event for log aggregation
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "color" => Ok(Self::Color),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "unknown log format '{}' (expected text, color or json)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: String,
    pub format: LogFormat,
    pub timestamp: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            timestamp: false,
        }
    }
}

impl LogSettings {
    /// Filter directive applied when `RUST_LOG` is not set
    pub fn default_directive(&self) -> String {
        format!("layer_extender={}", self.level.trim().to_ascii_lowercase())
    }
}

/// Initialize structured logging. `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(settings: &LogSettings) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(settings.default_directive()))?;

    let registry = Registry::default().with(env_filter);

    match (settings.format, settings.timestamp) {
        (LogFormat::Json, _) => {
            registry
                .with(
                    fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_span_events(FmtSpan::CLOSE),
                )
                .try_init()?;
        }
        (format, true) => {
            registry
                .with(
                    fmt::layer()
                        .with_writer(io::stderr)
                        .with_ansi(format == LogFormat::Color)
                        .with_target(true)
                        .with_span_events(FmtSpan::CLOSE),
                )
                .try_init()?;
        }
        (format, false) => {
            registry
                .with(
                    fmt::layer()
                        .with_writer(io::stderr)
                        .with_ansi(format == LogFormat::Color)
                        .with_target(true)
                        .without_time()
                        .with_span_events(FmtSpan::CLOSE),
                )
                .try_init()?;
        }
    }

    Ok(())
}

#[macro_export]
macro_rules! log_build_start {
    ($unit:expr, $dockerfile:expr) => {
        tracing::info!(unit = %$unit, dockerfile = %$dockerfile.display(), "Build started");
    };
}

#[macro_export]
macro_rules! log_build_complete {
    ($unit:expr, $digest:expr, $layers:expr, $duration_ms:expr) => {
        tracing::info!(
            unit = %$unit,
            digest = %$digest,
            layers = $layers,
            duration_ms = $duration_ms,
            "Build completed"
        );
    };
}

#[macro_export]
macro_rules! log_layer_saved {
    ($digest:expr, $path:expr, $size:expr) => {
        tracing::info!(
            digest = %$digest.short(),
            path = %$path.display(),
            size_bytes = $size,
            "Layer archive saved"
        );
    };
}

#[macro_export]
macro_rules! log_entry_skipped {
    ($path:expr, $reason:expr) => {
        tracing::debug!(path = %$path.display(), reason = $reason, "Entry skipped");
    };
}
