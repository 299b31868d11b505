//! Configuration for the ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Append configuration
    pub ledger: LedgerConfig,

    /// Audit log configuration
    pub audit: AuditConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/verifactu"),
            service_name: "invoice-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            rocksdb: RocksDBConfig::default(),
            ledger: LedgerConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 3,
            max_background_jobs: 2,
            enable_statistics: false,
        }
    }
}

/// Append configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Retries after a concurrency conflict before it is surfaced
    pub max_conflict_retries: u32,

    /// Records fetched per page when scanning a chain
    pub scan_page_size: usize,

    /// Accepted clock skew for issue dates in the future (days)
    pub max_issue_date_skew_days: i64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 3,
            scan_page_size: 256,
            max_issue_date_skew_days: 1,
        }
    }
}

/// Audit log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Events fetched per page by queries
    pub page_size: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { page_size: 100 }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("VERIFACTU_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(retries) = std::env::var("VERIFACTU_MAX_CONFLICT_RETRIES") {
            config.ledger.max_conflict_retries = retries.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid VERIFACTU_MAX_CONFLICT_RETRIES: {}", e))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the ledger unusable
    pub fn validate(&self) -> crate::Result<()> {
        if self.ledger.scan_page_size == 0 {
            return Err(crate::Error::Config(
                "ledger.scan_page_size must be positive".to_string(),
            ));
        }
        if self.audit.page_size == 0 {
            return Err(crate::Error::Config(
                "audit.page_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
