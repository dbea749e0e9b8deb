//! Configuration management
//!
//! Everything is read from the environment (a `.env` file is honoured) into
//! typed sections, then validated once at startup.

use aei_common::error::{optional_env, parse_env_or, require_env};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::transfer::FtpConfig;

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default read API host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default read API port.
pub const DEFAULT_SERVER_PORT: u16 = 8080;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Database Configuration Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/aei_relay";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

// ============================================================================
// Pipeline Constants
// ============================================================================

/// Default FTP control port.
pub const DEFAULT_FTP_PORT: u16 = 21;

/// Default upload directory on the reader endpoint.
pub const DEFAULT_FTP_SOURCE_FOLDER: &str = "uploads";

/// Default archive directory on the reader endpoint.
pub const DEFAULT_FTP_DEST_FOLDER: &str = "processed";

/// Default coordinator cadence (5 minutes).
pub const DEFAULT_INGEST_INTERVAL_SECS: u64 = 300;

/// Default fetch attempts per file per run.
pub const DEFAULT_INGEST_FETCH_MAX_ATTEMPTS: u32 = 3;

/// Default base delay between fetch attempts.
pub const DEFAULT_INGEST_FETCH_BACKOFF_MS: u64 = 2000;

/// Default age after which a file that never downloaded is failed (24 hours).
pub const DEFAULT_INGEST_PENDING_MAX_AGE_SECS: u64 = 86_400;

/// Default idle time after which a queued or in-flight file is recovered (15 minutes).
pub const DEFAULT_INGEST_STALE_AFTER_SECS: u64 = 900;

/// Default age after which a file that was never delivered is failed (48 hours).
pub const DEFAULT_INGEST_DELIVERY_MAX_AGE_SECS: u64 = 172_800;

/// Default number of new files picked up per coordinator run.
pub const DEFAULT_INGEST_MAX_FILES_PER_RUN: usize = 100;

/// Default per-request timeout for the external API.
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 30;

/// Default attempts per record.
pub const DEFAULT_API_MAX_ATTEMPTS: u32 = 3;

/// Default base delay between record attempts.
pub const DEFAULT_API_BACKOFF_MS: u64 = 1000;

/// Default SendGrid v3 base URL.
pub const DEFAULT_SENDGRID_API_URL: &str = "https://api.sendgrid.com/v3";

/// Default sender display name.
pub const DEFAULT_SENDGRID_FROM_NAME: &str = "AEI Relay";

/// Default number of concurrent delivery workers.
pub const DEFAULT_WORKER_CONCURRENCY: usize = 4;

/// Relay configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub ftp: FtpConfig,
    pub ingest: IngestConfig,
    pub api: ApiConfig,
    /// `None` when SendGrid is not configured; failures are then only logged
    pub email: Option<EmailConfig>,
    pub worker: WorkerConfig,
}

/// Read API configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// Coordinator configuration
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub interval_secs: u64,
    pub fetch_max_attempts: u32,
    pub fetch_backoff_ms: u64,
    pub pending_max_age_secs: u64,
    pub stale_after_secs: u64,
    /// Files still queued or in flight this long after discovery are failed
    pub delivery_max_age_secs: u64,
    /// Upper bound on new files taken from a single listing
    pub max_files_per_run: usize,
    /// Only discover files modified within this many hours; `None` lists everything
    pub lookback_hours: Option<u64>,
    /// Payload cache directory; `None` disables the cache
    pub cache_dir: Option<PathBuf>,
}

impl IngestConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn fetch_backoff(&self) -> Duration {
        Duration::from_millis(self.fetch_backoff_ms)
    }

    pub fn pending_max_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.pending_max_age_secs as i64)
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_after_secs as i64)
    }

    pub fn delivery_max_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.delivery_max_age_secs as i64)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_INGEST_INTERVAL_SECS,
            fetch_max_attempts: DEFAULT_INGEST_FETCH_MAX_ATTEMPTS,
            fetch_backoff_ms: DEFAULT_INGEST_FETCH_BACKOFF_MS,
            pending_max_age_secs: DEFAULT_INGEST_PENDING_MAX_AGE_SECS,
            stale_after_secs: DEFAULT_INGEST_STALE_AFTER_SECS,
            delivery_max_age_secs: DEFAULT_INGEST_DELIVERY_MAX_AGE_SECS,
            max_files_per_run: DEFAULT_INGEST_MAX_FILES_PER_RUN,
            lookback_hours: None,
            cache_dir: None,
        }
    }
}

/// External API configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub endpoint: String,
    pub timeout_secs: u64,
    /// Extra headers sent with every request
    pub headers: BTreeMap<String, String>,
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl ApiConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout_secs: DEFAULT_API_TIMEOUT_SECS,
            headers: BTreeMap::new(),
            max_attempts: DEFAULT_API_MAX_ATTEMPTS,
            backoff_ms: DEFAULT_API_BACKOFF_MS,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// SendGrid configuration
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub api_key: String,
    pub from_email: String,
    pub from_name: String,
    pub api_url: String,
}

/// Delivery worker pool configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub concurrency: usize,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_env()?;
        config.validate()?;

        Ok(config)
    }

    /// Read the process environment without touching `.env`
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Config {
            server: ServerConfig {
                host: optional_env("RELAY_HOST").unwrap_or_else(|| DEFAULT_SERVER_HOST.to_string()),
                port: parse_env_or("RELAY_PORT", DEFAULT_SERVER_PORT)?,
                shutdown_timeout_secs: parse_env_or(
                    "RELAY_SHUTDOWN_TIMEOUT",
                    DEFAULT_SHUTDOWN_TIMEOUT_SECS,
                )?,
            },
            database: DatabaseConfig {
                url: optional_env("DATABASE_URL")
                    .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
                max_connections: parse_env_or(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                )?,
                min_connections: parse_env_or(
                    "DATABASE_MIN_CONNECTIONS",
                    DEFAULT_DATABASE_MIN_CONNECTIONS,
                )?,
                connect_timeout_secs: parse_env_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                )?,
                idle_timeout_secs: parse_env_or(
                    "DATABASE_IDLE_TIMEOUT",
                    DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
                )?,
            },
            ftp: FtpConfig {
                host: require_env("FTP_HOST")?,
                port: parse_env_or("FTP_PORT", DEFAULT_FTP_PORT)?,
                username: optional_env("FTP_USERNAME").unwrap_or_else(|| "anonymous".to_string()),
                password: optional_env("FTP_PASSWORD").unwrap_or_default(),
                source_dir: optional_env("FTP_SOURCE_FOLDER")
                    .unwrap_or_else(|| DEFAULT_FTP_SOURCE_FOLDER.to_string()),
                archive_dir: optional_env("FTP_DEST_FOLDER")
                    .unwrap_or_else(|| DEFAULT_FTP_DEST_FOLDER.to_string()),
            },
            ingest: IngestConfig {
                interval_secs: parse_env_or("INGEST_INTERVAL_SECS", DEFAULT_INGEST_INTERVAL_SECS)?,
                fetch_max_attempts: parse_env_or(
                    "INGEST_FETCH_MAX_ATTEMPTS",
                    DEFAULT_INGEST_FETCH_MAX_ATTEMPTS,
                )?,
                fetch_backoff_ms: parse_env_or(
                    "INGEST_FETCH_BACKOFF_MS",
                    DEFAULT_INGEST_FETCH_BACKOFF_MS,
                )?,
                pending_max_age_secs: parse_env_or(
                    "INGEST_PENDING_MAX_AGE_SECS",
                    DEFAULT_INGEST_PENDING_MAX_AGE_SECS,
                )?,
                stale_after_secs: parse_env_or(
                    "INGEST_STALE_AFTER_SECS",
                    DEFAULT_INGEST_STALE_AFTER_SECS,
                )?,
                delivery_max_age_secs: parse_env_or(
                    "INGEST_DELIVERY_MAX_AGE_SECS",
                    DEFAULT_INGEST_DELIVERY_MAX_AGE_SECS,
                )?,
                max_files_per_run: parse_env_or(
                    "INGEST_MAX_FILES_PER_RUN",
                    DEFAULT_INGEST_MAX_FILES_PER_RUN,
                )?,
                lookback_hours: optional_env("INGEST_LOOKBACK_HOURS")
                    .map(|_| parse_env_or("INGEST_LOOKBACK_HOURS", 0u64))
                    .transpose()?,
                cache_dir: optional_env("INGEST_CACHE_DIR").map(PathBuf::from),
            },
            api: ApiConfig {
                endpoint: require_env("API_ENDPOINT")?,
                timeout_secs: parse_env_or("API_TIMEOUT", DEFAULT_API_TIMEOUT_SECS)?,
                headers: parse_headers(optional_env("API_HEADERS").as_deref()),
                max_attempts: parse_env_or("API_MAX_ATTEMPTS", DEFAULT_API_MAX_ATTEMPTS)?,
                backoff_ms: parse_env_or("API_BACKOFF_MS", DEFAULT_API_BACKOFF_MS)?,
            },
            email: match (optional_env("SENDGRID_API_KEY"), optional_env("SENDGRID_FROM_EMAIL")) {
                (Some(api_key), Some(from_email)) => Some(EmailConfig {
                    api_key,
                    from_email,
                    from_name: optional_env("SENDGRID_FROM_NAME")
                        .unwrap_or_else(|| DEFAULT_SENDGRID_FROM_NAME.to_string()),
                    api_url: optional_env("SENDGRID_API_URL")
                        .unwrap_or_else(|| DEFAULT_SENDGRID_API_URL.to_string()),
                }),
                _ => None,
            },
            worker: WorkerConfig {
                concurrency: parse_env_or("WORKER_CONCURRENCY", DEFAULT_WORKER_CONCURRENCY)?,
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if !self.api.endpoint.starts_with("http://") && !self.api.endpoint.starts_with("https://") {
            anyhow::bail!("API_ENDPOINT must be an http(s) URL, got {}", self.api.endpoint);
        }

        if self.api.timeout_secs == 0 {
            anyhow::bail!("API_TIMEOUT must be greater than 0");
        }

        if self.api.max_attempts == 0 || self.ingest.fetch_max_attempts == 0 {
            anyhow::bail!("Attempt limits must be greater than 0");
        }

        if self.ingest.interval_secs == 0 {
            anyhow::bail!("INGEST_INTERVAL_SECS must be greater than 0");
        }

        if self.ingest.max_files_per_run == 0 {
            anyhow::bail!("INGEST_MAX_FILES_PER_RUN must be greater than 0");
        }

        // A live worker renews its claim around every POST and backoff sleep;
        // neither may outlast the staleness threshold
        let longest_gap_ms = self.api.timeout_secs * 1000
            + self.api.backoff_ms * u64::from(self.api.max_attempts);
        if self.ingest.stale_after_secs * 1000 <= longest_gap_ms {
            anyhow::bail!(
                "INGEST_STALE_AFTER_SECS ({}) must exceed API_TIMEOUT plus the longest API backoff ({} ms)",
                self.ingest.stale_after_secs,
                longest_gap_ms
            );
        }

        if self.ingest.delivery_max_age_secs <= self.ingest.stale_after_secs {
            anyhow::bail!(
                "INGEST_DELIVERY_MAX_AGE_SECS ({}) must exceed INGEST_STALE_AFTER_SECS ({})",
                self.ingest.delivery_max_age_secs,
                self.ingest.stale_after_secs
            );
        }

        if self.worker.concurrency == 0 {
            anyhow::bail!("WORKER_CONCURRENCY must be greater than 0");
        }

        if self.email.is_none() {
            tracing::warn!("SendGrid configuration missing - failure notifications will only be logged");
        }

        Ok(())
    }
}

/// Parse `API_HEADERS`: a JSON object of header names to values.
///
/// Invalid JSON is logged and ignored. Non-string values are sent in their
/// JSON form.
pub fn parse_headers(raw: Option<&str>) -> BTreeMap<String, String> {
    let Some(raw) = raw else {
        return BTreeMap::new();
    };

    match serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(raw) {
        Ok(map) => map
            .into_iter()
            .map(|(name, value)| {
                let value = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (name, value)
            })
            .collect(),
        Err(e) => {
            tracing::warn!(error = %e, "Invalid API_HEADERS environment variable, ignoring");
            BTreeMap::new()
        },
    }
}
