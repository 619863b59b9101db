// crates/server/src/config.rs
//! Command-line and environment configuration for the `manimate` binary.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use manimate_core::generation::{GenerationConfig, ProviderKind, DEFAULT_GEMINI_MODEL};
use manimate_core::GenerationMode;
use manimate_jobs::{QueueConfig, WorkerConfig};
use manimate_observability::{LogFormat, LoggingConfig};

/// How status changes are detected for the status SSE endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WatchMode {
    /// Store notifications. Sees every transition.
    Notify,
    /// Periodic reads. May skip short-lived states.
    Poll,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "manimate", version, about = "Prompt-to-animation job server")]
pub struct ServerArgs {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Number of generation workers
    #[arg(long, env = "WORKERS", default_value_t = 2)]
    pub workers: usize,

    /// Generation backend: gemini, command or scripted
    #[arg(long = "provider", env = "GENERATION_PROVIDER", default_value = "gemini")]
    pub provider: ProviderKind,

    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    #[arg(long, env = "GEMINI_MODEL", default_value = DEFAULT_GEMINI_MODEL)]
    pub gemini_model: String,

    #[arg(long, env = "GEMINI_ENDPOINT")]
    pub gemini_endpoint: Option<String>,

    /// Command line for the command provider; the prompt is appended
    #[arg(long, env = "GENERATION_COMMAND")]
    pub generation_command: Option<String>,

    #[arg(long, env = "GENERATION_TIMEOUT_SECS", default_value_t = 120)]
    pub generation_timeout_secs: u64,

    /// Mode for prompts that name none: bulk or streaming
    #[arg(long, env = "DEFAULT_GENERATION_MODE", default_value = "streaming")]
    pub default_mode: GenerationMode,

    #[arg(long, env = "VISIBILITY_TIMEOUT_SECS", default_value_t = 30)]
    pub visibility_timeout_secs: u64,

    #[arg(long, env = "MAX_ATTEMPTS", default_value_t = 3)]
    pub max_attempts: u32,

    #[arg(long, env = "BACKOFF_BASE_MS", default_value_t = 1000)]
    pub backoff_base_ms: u64,

    #[arg(long, env = "BACKOFF_MAX_MS", default_value_t = 30_000)]
    pub backoff_max_ms: u64,

    /// How long terminal jobs stay readable
    #[arg(long, env = "RETENTION_SECS", default_value_t = 3600)]
    pub retention_secs: u64,

    #[arg(long, env = "STATUS_WATCH", value_enum, default_value_t = WatchMode::Notify)]
    pub status_watch: WatchMode,

    #[arg(long, env = "STATUS_POLL_INTERVAL_MS", default_value_t = 500)]
    pub status_poll_interval_ms: u64,

    /// Allowed CORS origin; any origin when unset
    #[arg(long, env = "CORS_ORIGIN")]
    pub cors_origin: Option<String>,

    #[arg(long, env = "LOG_FORMAT", default_value = "pretty")]
    pub log_format: LogFormat,

    /// Directory for daily-rolling log files
    #[arg(long, env = "LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

impl ServerArgs {
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid listen address {}:{}: {e}", self.host, self.port))
    }

    pub fn generation_config(&self) -> GenerationConfig {
        GenerationConfig {
            provider: self.provider,
            model: self.gemini_model.clone(),
            api_key: self.gemini_api_key.clone(),
            endpoint: self.gemini_endpoint.clone(),
            command: self.generation_command.clone(),
            timeout_secs: self.generation_timeout_secs,
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            visibility_timeout: Duration::from_secs(self.visibility_timeout_secs.max(1)),
            max_attempts: self.max_attempts.max(1),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
            ..QueueConfig::default()
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig::for_visibility(Duration::from_secs(self.visibility_timeout_secs.max(1)))
    }

    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig {
            format: self.log_format,
            log_dir: self.log_dir.clone(),
            default_filter: None,
        }
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms.max(10))
    }
}
