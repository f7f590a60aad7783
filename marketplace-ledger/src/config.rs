//! Configuration for the ledger

use crate::types::Address;
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

    /// Contract owner installed when the ledger is created.
    /// Ignored when reopening an existing ledger.
    pub contract_owner: Address,

    /// Actor configuration
    pub actor: ActorConfig,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/marketplace"),
            service_name: "marketplace-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            contract_owner: Address::ZERO,
            actor: ActorConfig::default(),
            rocksdb: RocksDBConfig::default(),
        }
    }
}

/// Actor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorConfig {
    /// Mailbox capacity (bounded for backpressure)
    pub mailbox_capacity: usize,

    /// Refuse unsigned transactions: `Ledger::submit` and the typed
    /// entry points. Only `Ledger::submit_signed` is accepted.
    pub require_signatures: bool,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 1000,
            require_signatures: false,
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
            max_write_buffer_number: 2,
            max_background_jobs: 2,
            enable_statistics: false,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        Config::default().with_env_overrides()
    }

    /// Apply `LEDGER_*` environment overrides
    pub fn with_env_overrides(mut self) -> crate::Result<Self> {
        if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
            self.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(owner) = std::env::var("LEDGER_CONTRACT_OWNER") {
            self.contract_owner = owner
                .parse()
                .map_err(|e| crate::Error::Config(format!("LEDGER_CONTRACT_OWNER: {}", e)))?;
        }

        if let Ok(capacity) = std::env::var("LEDGER_MAILBOX_CAPACITY") {
            self.actor.mailbox_capacity = capacity
                .parse()
                .map_err(|e| crate::Error::Config(format!("LEDGER_MAILBOX_CAPACITY: {}", e)))?;
        }

        if let Ok(required) = std::env::var("LEDGER_REQUIRE_SIGNATURES") {
            self.actor.require_signatures = required
                .parse()
                .map_err(|e| crate::Error::Config(format!("LEDGER_REQUIRE_SIGNATURES: {}", e)))?;
        }

        Ok(self)
    }

    /// Check values the ledger cannot start with
    pub fn validate(&self) -> crate::Result<()> {
        if self.actor.mailbox_capacity == 0 {
            return Err(crate::Error::Config(
                "actor.mailbox_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
