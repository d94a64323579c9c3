use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use wim_reconcile::ReconcileOptions;

pub const DEFAULT_CONFIG_PATH: &str = "config/wim.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_database_file")]
    pub database_file: String,
    /// How long a write waits for a competing SQLite lock before failing.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub reclaim: ReclaimConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database_file: default_database_file(),
            busy_timeout_ms: default_busy_timeout_ms(),
            reconcile: ReconcileConfig::default(),
            reclaim: ReclaimConfig::default(),
            probe: ProbeConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Total fetch attempts per asset, first try included.
    #[serde(default = "default_fetch_attempts")]
    pub fetch_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_unreachable_threshold")]
    pub unreachable_threshold: u32,
    #[serde(default = "default_chunk_commit_retries")]
    pub chunk_commit_retries: u32,
    #[serde(default = "default_include_fqdns")]
    pub include_fqdns: bool,
    /// Daemon mode only.
    #[serde(default = "default_reconcile_interval_secs")]
    pub interval_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            fetch_attempts: default_fetch_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_concurrent: default_max_concurrent(),
            unreachable_threshold: default_unreachable_threshold(),
            chunk_commit_retries: default_chunk_commit_retries(),
            include_fqdns: default_include_fqdns(),
            interval_secs: default_reconcile_interval_secs(),
        }
    }
}

impl ReconcileConfig {
    pub fn to_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            chunk_size: self.chunk_size,
            fetch_attempts: self.fetch_attempts,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            max_concurrent: self.max_concurrent,
            unreachable_threshold: self.unreachable_threshold,
            chunk_commit_retries: self.chunk_commit_retries,
            include_fqdns: self.include_fqdns,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReclaimConfig {
    #[serde(default = "default_reclaim_enabled")]
    pub enabled: bool,
    #[serde(default = "default_reclaim_interval_secs")]
    pub interval_secs: u64,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            enabled: default_reclaim_enabled(),
            interval_secs: default_reclaim_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// TLS port probed for the leaf certificate.
    #[serde(default = "default_probe_port")]
    pub port: u16,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            port: default_probe_port(),
            connect_timeout_secs: default_connect_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_database_file() -> String {
    "wim.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_chunk_size() -> usize {
    100
}

fn default_fetch_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent() -> usize {
    8
}

fn default_unreachable_threshold() -> u32 {
    3
}

fn default_chunk_commit_retries() -> u32 {
    1
}

fn default_include_fqdns() -> bool {
    true
}

fn default_reconcile_interval_secs() -> u64 {
    86400
}

fn default_reclaim_enabled() -> bool {
    true
}

fn default_reclaim_interval_secs() -> u64 {
    86400
}

fn default_probe_port() -> u16 {
    443
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_user_agent() -> String {
    concat!("wim-server/", env!("CARGO_PKG_VERSION")).to_string()
}

impl ServerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file '{}'", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when given. Without an explicit path the default
    /// location is tried and a missing file falls back to built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    Self::load(default_path)
                } else {
                    let config = Self::default();
                    config.validate()?;
                    Ok(config)
                }
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.reconcile.chunk_size == 0 {
            bail!("reconcile.chunk_size must be at least 1");
        }
        if self.reconcile.fetch_attempts == 0 {
            bail!("reconcile.fetch_attempts must be at least 1");
        }
        if self.reconcile.max_concurrent == 0 {
            bail!("reconcile.max_concurrent must be at least 1");
        }
        if self.reconcile.unreachable_threshold == 0 {
            bail!("reconcile.unreachable_threshold must be at least 1");
        }
        if self.reconcile.fetch_timeout_secs == 0 || self.probe.connect_timeout_secs == 0 {
            bail!("timeouts must be greater than zero");
        }
        if self.reconcile.interval_secs == 0 || self.reclaim.interval_secs == 0 {
            bail!("scheduler intervals must be greater than zero");
        }
        if self.database_file.trim().is_empty() {
            bail!("database_file must not be empty");
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join(&self.database_file)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config.reconcile.chunk_size, 100);
        assert_eq!(config.reconcile.fetch_attempts, 3);
        assert_eq!(config.reconcile.unreachable_threshold, 3);
        assert!(config.reconcile.include_fqdns);
        assert_eq!(config.probe.port, 443);
        assert_eq!(config.logging.format, LogFormat::Text);
        assert_eq!(config.database_path(), Path::new("data").join("wim.db"));
        config.validate().unwrap();
    }

    #[test]
    fn sections_override_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            data_dir = "/var/lib/wim"
            busy_timeout_ms = 250

            [reconcile]
            chunk_size = 25
            include_fqdns = false

            [logging]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.reconcile.chunk_size, 25);
        assert!(!config.reconcile.include_fqdns);
        assert_eq!(config.reconcile.max_concurrent, 8);
        assert_eq!(config.logging.format, LogFormat::Json);

        let options = config.reconcile.to_options();
        assert_eq!(options.chunk_size, 25);
        assert_eq!(config.busy_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn zero_chunk_size_is_invalid() {
        let config: ServerConfig = toml::from_str("[reconcile]\nchunk_size = 0\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("chunk_size"));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(ServerConfig::load_or_default(Some(&missing)).is_err());
    }
}
