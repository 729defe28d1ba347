use crate::core::db::{BusyRetry, Connection, DEFAULT_BUSY_RETRIES, DEFAULT_BUSY_WAIT_MS};
use crate::core::{Result, Sql3Error};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration structure parsed from a TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Which database to open.
#[derive(Debug, Default, Deserialize)]
pub struct DatabaseConfig {
    pub path: Option<String>,
}

/// Busy-retry settings applied to new units of work.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_busy_retries")]
    pub busy_retries: u32,
    #[serde(default = "default_busy_wait_ms")]
    pub busy_wait_ms: u64,
}

fn default_busy_retries() -> u32 {
    DEFAULT_BUSY_RETRIES
}

fn default_busy_wait_ms() -> u64 {
    DEFAULT_BUSY_WAIT_MS
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            busy_retries: DEFAULT_BUSY_RETRIES,
            busy_wait_ms: DEFAULT_BUSY_WAIT_MS,
        }
    }
}

impl RetryConfig {
    /// Builds the retry policy described by this section.
    pub fn busy_retry(&self) -> BusyRetry {
        BusyRetry::new(self.busy_retries, Duration::from_millis(self.busy_wait_ms))
    }
}

impl Config {
    /// Parses configuration from TOML text and validates it.
    pub fn from_toml(text: &str) -> Result<Config> {
        let config: Config = toml::from_str(text).map_err(|e| Sql3Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.retry.busy_retries == 0 {
            return Err(Sql3Error::Config(
                "retry.busy_retries must be at least 1".to_string(),
            ));
        }
        if matches!(&self.database.path, Some(p) if p.is_empty()) {
            return Err(Sql3Error::Config("database.path must not be empty".to_string()));
        }
        Ok(())
    }

    /// Opens the configured database.
    pub fn connect(&self) -> Result<Connection> {
        let path = self
            .database
            .path
            .as_deref()
            .ok_or_else(|| Sql3Error::Config("database.path is not set".to_string()))?;
        Connection::open(path)
    }
}

/// Loads configuration from a TOML file at the given path.
///
/// # Arguments
///
/// * `path` - The file path to the TOML configuration file.
///
/// # Example
///
/// ```no_run
/// let config = sql3wrap::config::load_config("sql3wrap.toml")?;
/// let conn = config.connect()?;
/// let trx = sql3wrap::Transaction::with_retry(&conn, config.retry.busy_retry());
/// # Ok::<_, sql3wrap::Sql3Error>(())
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = fs::read_to_string(path)?;
    Config::from_toml(&content)
}
