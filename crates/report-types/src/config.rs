//! Configuration loading for the report pipeline.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! Default config file lives at `~/.config/report-pipeline/config.toml`.
//! Environment variables use the `REPORT_` prefix and `__` for nesting,
//! e.g. `REPORT_EMBEDDING__BASE_URL`.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::batch::DEFAULT_BATCH_SIZE;
use crate::error::ReportError;

/// Settings for the remote embedding inference service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    /// Base URI of the inference service. Required for embedding runs.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Path of the embed endpoint (POST)
    #[serde(default = "default_embed_path")]
    pub embed_path: String,

    /// Path of the readiness endpoint (GET)
    #[serde(default = "default_ready_path")]
    pub ready_path: String,

    /// Per-request timeout
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Total time to wait for the service to become ready
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,

    /// Delay before the first readiness probe
    #[serde(default)]
    pub ready_initial_delay_secs: u64,

    /// Initial interval between readiness probes (grows with backoff)
    #[serde(default = "default_ready_poll_interval")]
    pub ready_poll_interval_ms: u64,
}

fn default_embed_path() -> String {
    "/embed".to_string()
}

fn default_ready_path() -> String {
    "/ready".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_ready_timeout() -> u64 {
    600
}

fn default_ready_poll_interval() -> u64 {
    1_000
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            embed_path: default_embed_path(),
            ready_path: default_ready_path(),
            request_timeout_secs: default_request_timeout(),
            ready_timeout_secs: default_ready_timeout(),
            ready_initial_delay_secs: 0,
            ready_poll_interval_ms: default_ready_poll_interval(),
        }
    }
}

impl EmbeddingSettings {
    /// Base URL, or a configuration error when it is missing.
    pub fn require_base_url(&self) -> Result<&str, ReportError> {
        match self.base_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => Ok(url),
            _ => Err(ReportError::Config(
                "embedding.base_url is not set (REPORT_EMBEDDING__BASE_URL)".to_string(),
            )),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.request_timeout_secs == 0 {
            return Err("request_timeout_secs must be > 0".to_string());
        }
        if self.ready_poll_interval_ms == 0 {
            return Err("ready_poll_interval_ms must be > 0".to_string());
        }
        if !self.embed_path.starts_with('/') || !self.ready_path.starts_with('/') {
            return Err("embed_path and ready_path must start with '/'".to_string());
        }
        Ok(())
    }
}

/// Settings for the embedding workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// Work items per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum embed activities in flight
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Timeout of a single embed activity attempt
    #[serde(default = "default_activity_timeout")]
    pub activity_timeout_secs: u64,

    /// Attempts per activity, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First retry delay
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Upper bound on retry delay
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Growth factor between retry delays
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_max_concurrency() -> usize {
    8
}

fn default_activity_timeout() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    1_000
}

fn default_max_backoff() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_concurrency: default_max_concurrency(),
            activity_timeout_secs: default_activity_timeout(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl WorkflowSettings {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size must be > 0".to_string());
        }
        if self.max_concurrency == 0 {
            return Err("max_concurrency must be > 0".to_string());
        }
        if self.max_attempts == 0 {
            return Err("max_attempts must be > 0".to_string());
        }
        if self.activity_timeout_secs == 0 {
            return Err("activity_timeout_secs must be > 0".to_string());
        }
        if self.backoff_multiplier < 1.0 {
            return Err(format!(
                "backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            ));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err("max_backoff_ms must be >= initial_backoff_ms".to_string());
        }
        Ok(())
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to the report table
    #[serde(default = "default_report_table_path")]
    pub report_table_path: String,

    /// Path to the embedding table
    #[serde(default = "default_embedding_table_path")]
    pub embedding_table_path: String,

    /// Root directory for per-attempt scratch namespaces
    #[serde(default = "default_scratch_root")]
    pub scratch_root: String,

    /// Path to the workflow checkpoint store
    #[serde(default = "default_state_path")]
    pub state_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub embedding: EmbeddingSettings,

    #[serde(default)]
    pub workflow: WorkflowSettings,
}

fn data_dir(name: &str) -> String {
    ProjectDirs::from("", "", "report-pipeline")
        .map(|p| p.data_local_dir().join(name))
        .unwrap_or_else(|| PathBuf::from("./data").join(name))
        .to_string_lossy()
        .to_string()
}

fn default_report_table_path() -> String {
    data_dir("reports")
}

fn default_embedding_table_path() -> String {
    data_dir("embeddings")
}

fn default_scratch_root() -> String {
    data_dir("scratch")
}

fn default_state_path() -> String {
    data_dir("state")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            report_table_path: default_report_table_path(),
            embedding_table_path: default_embedding_table_path(),
            scratch_root: default_scratch_root(),
            state_path: default_state_path(),
            log_level: default_log_level(),
            embedding: EmbeddingSettings::default(),
            workflow: WorkflowSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/report-pipeline/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (REPORT_*)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, ReportError> {
        let config_dir = ProjectDirs::from("", "", "report-pipeline")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("report_table_path", default_report_table_path())
            .map_err(|e| ReportError::Config(e.to_string()))?
            .set_default("embedding_table_path", default_embedding_table_path())
            .map_err(|e| ReportError::Config(e.to_string()))?
            .set_default("scratch_root", default_scratch_root())
            .map_err(|e| ReportError::Config(e.to_string()))?
            .set_default("state_path", default_state_path())
            .map_err(|e| ReportError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| ReportError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("REPORT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| ReportError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| ReportError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), ReportError> {
        self.embedding
            .validate()
            .map_err(|e| ReportError::Config(format!("embedding: {e}")))?;
        self.workflow
            .validate()
            .map_err(|e| ReportError::Config(format!("workflow: {e}")))?;
        Ok(())
    }
}
