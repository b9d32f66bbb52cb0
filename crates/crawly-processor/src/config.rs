//! Configuration management
//!
//! Settings come from the environment (a `.env` file is honored), fall back to
//! the `DEFAULT_*` constants, and are checked by [`ProcessorConfig::validate`].
//! CLI flags may override individual values afterwards.

use crawly_common::{CrawlyError, Result};
use sqlx::postgres::PgConnectOptions;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::store::adapter::{
    RetryPolicy, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY_MS,
};
use crate::validate::{ValidationLimits, DEFAULT_CLOCK_SKEW_SECS, DEFAULT_MAX_PAYLOAD_BYTES};

// ============================================================================
// Defaults
// ============================================================================

/// Default document store endpoint for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/crawly";

/// Default size of the store connection pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 16;

/// Default time to wait for a pooled connection, in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default server-side statement timeout, in seconds.
pub const DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 30;

/// Default number of concurrent workers.
pub const DEFAULT_WORKERS: usize = 16;

/// Default intake queue capacity; a full queue stalls the feed.
pub const DEFAULT_QUEUE_CAPACITY: usize = 300;

/// Default number of records per batch write.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default time a drain may take before the processor is stopped, in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Document store connection settings
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub url: String,
    /// File holding the store password; overrides any password in `url`
    pub credentials_file: Option<PathBuf>,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
    pub statement_timeout_secs: u64,
}

impl StoreConfig {
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        let mut options = PgConnectOptions::from_str(&self.url)
            .map_err(|e| CrawlyError::Config(format!("invalid DATABASE_URL: {e}")))?;

        if let Some(path) = &self.credentials_file {
            let password = std::fs::read_to_string(path)?;
            options = options.password(password.trim());
        }

        Ok(options.options([(
            "statement_timeout",
            format!("{}s", self.statement_timeout_secs),
        )]))
    }

    /// Endpoint without credentials, safe to log
    pub fn redacted_url(&self) -> String {
        match url::Url::parse(&self.url) {
            Ok(mut url) => {
                if url.password().is_some() {
                    // only fails for URLs that cannot carry credentials
                    let _ = url.set_password(Some("***"));
                }
                url.to_string()
            },
            Err(_) => "<unparseable>".to_string(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            credentials_file: None,
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            statement_timeout_secs: DEFAULT_STATEMENT_TIMEOUT_SECS,
        }
    }
}

/// Settings of the ingestion pipeline itself
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub retry: RetryPolicy,
    pub limits: ValidationLimits,
    /// Reject records whose URL host does not resolve
    pub check_hosts: bool,
    /// Keep rejected records in the rejects collection
    pub persist_rejects: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryPolicy::default(),
            limits: ValidationLimits::default(),
            check_hosts: false,
            persist_rejects: false,
        }
    }
}

/// Complete processor configuration
#[derive(Debug, Clone, Default)]
pub struct ProcessorConfig {
    pub store: StoreConfig,
    pub pipeline: PipelineConfig,
    pub shutdown_timeout_secs: u64,
}

impl ProcessorConfig {
    /// Load `.env`, read the environment and validate
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let config = Self::from_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    ///
    /// Recognized keys: `DATABASE_URL`, `CRAWLY_STORE_CREDENTIALS_FILE`,
    /// `CRAWLY_DATABASE_MAX_CONNECTIONS`, `CRAWLY_DATABASE_CONNECT_TIMEOUT`,
    /// `CRAWLY_STATEMENT_TIMEOUT`, `CRAWLY_WORKERS`, `CRAWLY_QUEUE_CAPACITY`,
    /// `CRAWLY_BATCH_SIZE`, `CRAWLY_RETRY_MAX_ATTEMPTS`,
    /// `CRAWLY_RETRY_BASE_DELAY_MS`, `CRAWLY_RETRY_MAX_DELAY_MS`,
    /// `CRAWLY_CLOCK_SKEW_SECS`, `CRAWLY_MAX_PAYLOAD_BYTES`, `CRAWLY_CHECK_DNS`,
    /// `CRAWLY_PERSIST_REJECTS`, `CRAWLY_SHUTDOWN_TIMEOUT`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let store = StoreConfig {
            url: get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            credentials_file: get("CRAWLY_STORE_CREDENTIALS_FILE").map(PathBuf::from),
            max_connections: parse_or(
                &get,
                "CRAWLY_DATABASE_MAX_CONNECTIONS",
                DEFAULT_DATABASE_MAX_CONNECTIONS,
            )?,
            connect_timeout_secs: parse_or(
                &get,
                "CRAWLY_DATABASE_CONNECT_TIMEOUT",
                DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            )?,
            statement_timeout_secs: parse_or(
                &get,
                "CRAWLY_STATEMENT_TIMEOUT",
                DEFAULT_STATEMENT_TIMEOUT_SECS,
            )?,
        };

        let retry = RetryPolicy {
            max_attempts: parse_or(&get, "CRAWLY_RETRY_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?,
            base_delay: Duration::from_millis(parse_or(
                &get,
                "CRAWLY_RETRY_BASE_DELAY_MS",
                DEFAULT_BASE_DELAY_MS,
            )?),
            max_delay: Duration::from_millis(parse_or(
                &get,
                "CRAWLY_RETRY_MAX_DELAY_MS",
                DEFAULT_MAX_DELAY_MS,
            )?),
        };

        let pipeline = PipelineConfig {
            workers: parse_or(&get, "CRAWLY_WORKERS", DEFAULT_WORKERS)?,
            queue_capacity: parse_or(&get, "CRAWLY_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?,
            batch_size: parse_or(&get, "CRAWLY_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            retry,
            limits: ValidationLimits {
                clock_skew_secs: parse_or(&get, "CRAWLY_CLOCK_SKEW_SECS", DEFAULT_CLOCK_SKEW_SECS)?,
                max_payload_bytes: parse_or(
                    &get,
                    "CRAWLY_MAX_PAYLOAD_BYTES",
                    DEFAULT_MAX_PAYLOAD_BYTES,
                )?,
            },
            check_hosts: parse_or(&get, "CRAWLY_CHECK_DNS", false)?,
            persist_rejects: parse_or(&get, "CRAWLY_PERSIST_REJECTS", false)?,
        };

        Ok(Self {
            store,
            pipeline,
            shutdown_timeout_secs: parse_or(
                &get,
                "CRAWLY_SHUTDOWN_TIMEOUT",
                DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            )?,
        })
    }

    /// Reject settings the processor cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.store.url.trim().is_empty() {
            return Err(CrawlyError::Config("DATABASE_URL cannot be empty".into()));
        }
        if self.store.max_connections == 0 {
            return Err(CrawlyError::Config(
                "Database max_connections must be greater than 0".into(),
            ));
        }

        let pipeline = &self.pipeline;
        if pipeline.workers == 0 {
            return Err(CrawlyError::Config("Worker count must be greater than 0".into()));
        }
        if pipeline.queue_capacity == 0 {
            return Err(CrawlyError::Config("Queue capacity must be greater than 0".into()));
        }
        if pipeline.batch_size == 0 {
            return Err(CrawlyError::Config("Batch size must be greater than 0".into()));
        }
        if pipeline.retry.max_attempts == 0 {
            return Err(CrawlyError::Config(
                "Retry ceiling must allow at least one attempt".into(),
            ));
        }
        if pipeline.retry.base_delay > pipeline.retry.max_delay {
            return Err(CrawlyError::Config(format!(
                "Retry base delay ({:?}) cannot exceed max delay ({:?})",
                pipeline.retry.base_delay, pipeline.retry.max_delay
            )));
        }
        if pipeline.limits.clock_skew_secs < 0 {
            return Err(CrawlyError::Config("Clock skew tolerance cannot be negative".into()));
        }
        if pipeline.workers as u32 > self.store.max_connections {
            tracing::warn!(
                workers = pipeline.workers,
                max_connections = self.store.max_connections,
                "More workers than store connections; workers will wait on the pool"
            );
        }

        Ok(())
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| CrawlyError::invalid_setting(key, value)),
        None => Ok(default),
    }
}
