//! Configuration types for crawl-control

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use utoipa::ToSchema;

/// Main configuration for crawl-control
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct Config {
    /// Data storage settings
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// REST API settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Progress batching at the worker boundary
    #[serde(default)]
    pub progress: ProgressConfig,

    /// In-process worker pool
    #[serde(default)]
    pub workers: WorkerConfig,

    /// Subscriber reconnect policy
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Config {
    /// Reject settings that would stall progress or the worker pool
    pub fn validate(&self) -> Result<()> {
        if self.progress.flush_every_pages == 0 {
            return Err(Error::Config {
                message: "flush_every_pages must be at least 1".to_string(),
                key: Some("progress.flush_every_pages".to_string()),
            });
        }
        if self.progress.flush_interval.is_zero() {
            return Err(Error::Config {
                message: "flush_interval must be non-zero".to_string(),
                key: Some("progress.flush_interval".to_string()),
            });
        }
        if self.workers.max_concurrent_jobs == 0 {
            return Err(Error::Config {
                message: "max_concurrent_jobs must be at least 1".to_string(),
                key: Some("workers.max_concurrent_jobs".to_string()),
            });
        }
        if self.reconnect.backoff_multiplier < 1.0 {
            return Err(Error::Config {
                message: "backoff_multiplier must be >= 1.0".to_string(),
                key: Some("reconnect.backoff_multiplier".to_string()),
            });
        }
        Ok(())
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PersistenceConfig {
    /// Database path (default: "crawl-control.db")
    #[serde(default = "default_database_path")]
    #[schema(value_type = String)]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiConfig {
    /// Address to bind to (default: 127.0.0.1:6790)
    #[serde(default = "default_bind_address")]
    #[schema(value_type = String)]
    pub bind_address: SocketAddr,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Enable Swagger UI at /swagger-ui (default: true)
    #[serde(default = "default_true")]
    pub swagger_ui: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
            swagger_ui: true,
        }
    }
}

/// How often a worker's progress is pushed into the registry
///
/// A flush happens when either bound is reached, whichever comes first.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ProgressConfig {
    /// Flush after this many processed pages (default: 25)
    #[serde(default = "default_flush_every_pages")]
    pub flush_every_pages: u64,

    /// Flush at least this often while pages are pending (default: 1000 ms)
    #[serde(default = "default_flush_interval", with = "duration_ms_serde")]
    #[schema(value_type = u64)]
    pub flush_interval: Duration,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            flush_every_pages: default_flush_every_pages(),
            flush_interval: default_flush_interval(),
        }
    }
}

/// In-process worker pool configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct WorkerConfig {
    /// Maximum crawls running at once (default: 4)
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// How long shutdown waits for workers to stop (default: 30 s)
    #[serde(default = "default_shutdown_timeout", with = "duration_ms_serde")]
    #[schema(value_type = u64)]
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Reconnect policy for live-status subscribers
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ReconnectConfig {
    /// Maximum consecutive failed attempts before giving up (default: 10)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first reconnect (default: 500 ms)
    #[serde(default = "default_initial_delay", with = "duration_ms_serde")]
    #[schema(value_type = u64)]
    pub initial_delay: Duration,

    /// Cap on the delay between reconnects (default: 30 s)
    #[serde(default = "default_max_delay", with = "duration_ms_serde")]
    #[schema(value_type = u64)]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("crawl-control.db")
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 6790))
}

fn default_true() -> bool {
    true
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_flush_every_pages() -> u64 {
    25
}

fn default_flush_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_attempts() -> u32 {
    10
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Durations are written as integer milliseconds
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
