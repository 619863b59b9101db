// crates/observability/src/lib.rs
//! Tracing initialization shared by manimate binaries.
//!
//! One registry with:
//! - an `EnvFilter` from `RUST_LOG`, falling back to a quiet default
//! - a console `fmt` layer in pretty, compact or JSON format
//! - an optional daily-rolling file layer (non-blocking, JSON lines)

use std::path::PathBuf;
use std::str::FromStr;

use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "warn,manimate=info,manimate_server=info,manimate_jobs=info,manimate_core=info,tower_http=info";

/// Console log format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" | "text" => Ok(LogFormat::Compact),
            "json" | "jsonl" => Ok(LogFormat::Json),
            other => anyhow::bail!("unknown log format '{other}' (expected pretty, compact or json)"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Directory for daily-rolling `manimate.log.YYYY-MM-DD` files.
    pub log_dir: Option<PathBuf>,
    /// Overrides [`DEFAULT_FILTER`] when `RUST_LOG` is unset.
    pub default_filter: Option<String>,
}

/// Keeps the non-blocking file writer flushing. Hold it for the lifetime
/// of the process.
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// `RUST_LOG` if set and valid, otherwise `fallback`.
pub fn build_env_filter(fallback: &str) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(fallback)
        .map_err(|e| anyhow::anyhow!("Invalid tracing filter '{fallback}': {e}"))
}

/// Install the global subscriber.
pub fn init_tracing(config: &LoggingConfig) -> anyhow::Result<LoggingGuard> {
    let fallback = config.default_filter.as_deref().unwrap_or(DEFAULT_FILTER);

    let console = match config.format {
        LogFormat::Pretty => tracing_subscriber::fmt::layer().pretty().boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer().compact().boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
    }
    .with_filter(build_env_filter(fallback)?);

    let (file, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "manimate.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(build_env_filter(fallback)?);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    Ok(LoggingGuard { _file: guard })
}

/// Request/response tracing for the HTTP router.
pub fn http_trace_layer() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>> {
    TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO))
}
