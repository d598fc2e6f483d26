//! Configuration management for the client runtime.

use outbox_engine::{BackoffPolicy, HttpMethod, NewRequest, DEFAULT_MAX_RETRIES};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL joined with each queued request's url
    pub api_base_url: String,
    /// Directory of the file storage
    pub storage_dir: PathBuf,
    /// Default retry budget for new requests
    pub max_retries: u32,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    /// Per-request timeout; 0 disables it
    pub request_timeout_ms: u64,
    /// Endpoint polled by `outbox watch`; defaults to the API base URL
    pub health_url: Option<String>,
    pub probe_interval_ms: u64,
}

impl Config {
    /// Configuration with defaults for everything except the API base URL.
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            storage_dir: PathBuf::from(".outbox"),
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_initial_ms: 1_000,
            backoff_max_ms: 30_000,
            request_timeout_ms: 30_000,
            health_url: None,
            probe_interval_ms: 15_000,
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_base_url =
            env::var("OUTBOX_API_BASE_URL").map_err(|_| ConfigError::MissingApiBaseUrl)?;

        let mut config = Self::new(api_base_url);

        if let Ok(dir) = env::var("OUTBOX_STORAGE_DIR") {
            config.storage_dir = PathBuf::from(dir);
        }
        config.max_retries = number("OUTBOX_MAX_RETRIES", config.max_retries)?;
        config.backoff_initial_ms =
            number("OUTBOX_BACKOFF_INITIAL_MS", config.backoff_initial_ms)?;
        config.backoff_max_ms = number("OUTBOX_BACKOFF_MAX_MS", config.backoff_max_ms)?;
        config.request_timeout_ms =
            number("OUTBOX_REQUEST_TIMEOUT_MS", config.request_timeout_ms)?;
        if let Ok(url) = env::var("OUTBOX_HEALTH_URL") {
            config.health_url = Some(url);
        }
        config.probe_interval_ms = number("OUTBOX_PROBE_INTERVAL_MS", config.probe_interval_ms)?;
        if config.probe_interval_ms == 0 {
            return Err(ConfigError::InvalidNumber {
                var: "OUTBOX_PROBE_INTERVAL_MS",
                value: "0".into(),
            });
        }

        Ok(config)
    }

    /// A request carrying the configured retry budget.
    pub fn new_request(&self, method: HttpMethod, url: impl Into<String>) -> NewRequest {
        NewRequest::new(method, url).with_max_retries(self.max_retries)
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.backoff_initial_ms, self.backoff_max_ms)
    }

    /// The per-request timeout, or `None` when disabled.
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }

    /// URL whose reachability decides connectivity.
    pub fn health_url(&self) -> &str {
        self.health_url.as_deref().unwrap_or(&self.api_base_url)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms.max(1))
    }
}

fn number<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { var, value }),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("OUTBOX_API_BASE_URL environment variable is required")]
    MissingApiBaseUrl,

    #[error("Invalid value for {var}: {value:?}")]
    InvalidNumber { var: &'static str, value: String },
}
