//! Configuration for the custody CLI

pub mod rpc;

use crate::address::Network;
use crate::journal::DisabledEvents;
use crate::multisig::{DEFAULT_CONFIDENCE, DEFAULT_LOOKBACK_LIMIT};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// Re-export RPC config
pub use rpc::RpcConfig;

/// Data directory override environment variable name
pub const DATA_DIR_ENV: &str = "CUSTODY_DATA_DIR";

const DEFAULT_DATA_DIR: &str = ".custody";

/// Message wait policy for provisioning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitPolicy {
    /// Epochs to wait after inclusion
    pub confidence: u64,
    /// Epochs to search back for an already-included message
    pub lookback_limit: i64,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            confidence: DEFAULT_CONFIDENCE,
            lookback_limit: DEFAULT_LOOKBACK_LIMIT,
        }
    }
}

/// Main configuration
///
/// Paths left unset resolve under `data_dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of all local state
    pub data_dir: PathBuf,
    /// Encrypted key files
    pub keystore_dir: Option<PathBuf>,
    /// Role → address bindings
    pub role_store_path: Option<PathBuf>,
    /// Plaintext keys from older installs
    pub legacy_keys_path: Option<PathBuf>,
    /// Path to journal file; `None` disables journaling
    pub journal_path: Option<PathBuf>,
    /// Comma-separated `system:event` list never written to the journal
    pub disabled_events: String,
    /// Address prefix for rendered native addresses
    pub network: Network,
    /// Accounts derived per hardware device
    pub hardware_accounts: usize,
    pub wait: WaitPolicy,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = std::env::var_os(DATA_DIR_ENV)
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var_os("HOME").map(|home| PathBuf::from(home).join(DEFAULT_DATA_DIR))
            })
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        Self {
            data_dir,
            keystore_dir: None,
            role_store_path: None,
            legacy_keys_path: None,
            journal_path: Some(PathBuf::from("journal.jsonl")),
            disabled_events: String::new(),
            network: Network::Mainnet,
            hardware_accounts: 1,
            wait: WaitPolicy::default(),
        }
    }
}

impl Config {
    /// Load from a JSON file; missing fields take their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let config: Config = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        if config.hardware_accounts == 0 {
            return Err(Error::Config(
                "hardware_accounts must be at least 1".to_string(),
            ));
        }
        // validate early so a typo fails before any key is touched
        config.disabled_events()?;
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn keystore_dir(&self) -> PathBuf {
        self.resolve(self.keystore_dir.as_deref(), "keystore")
    }

    pub fn role_store_path(&self) -> PathBuf {
        self.resolve(self.role_store_path.as_deref(), "roles.json")
    }

    pub fn legacy_keys_path(&self) -> PathBuf {
        self.resolve(self.legacy_keys_path.as_deref(), "keys.json")
    }

    pub fn journal_path(&self) -> Option<PathBuf> {
        self.journal_path
            .as_deref()
            .map(|p| self.resolve(Some(p), "journal.jsonl"))
    }

    pub fn disabled_events(&self) -> Result<DisabledEvents> {
        DisabledEvents::parse(&self.disabled_events)
    }

    fn resolve(&self, path: Option<&Path>, default: &str) -> PathBuf {
        match path {
            Some(p) if p.is_absolute() => p.to_path_buf(),
            Some(p) => self.data_dir.join(p),
            None => self.data_dir.join(default),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_partial_file_takes_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"data_dir": "/var/custody", "network": "testnet", "journal_path": "/tmp/j.jsonl"}}"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.network, Network::Testnet);
        assert_eq!(config.keystore_dir(), PathBuf::from("/var/custody/keystore"));
        assert_eq!(config.role_store_path(), PathBuf::from("/var/custody/roles.json"));
        assert_eq!(config.journal_path(), Some(PathBuf::from("/tmp/j.jsonl")));
        assert_eq!(config.wait, WaitPolicy { confidence: 0, lookback_limit: 900 });
    }

    #[test]
    fn test_null_journal_path_disables_journal() {
        let config: Config =
            serde_json::from_value(serde_json::json!({ "journal_path": null })).unwrap();
        assert_eq!(config.journal_path(), None);
    }

    #[test]
    fn test_rejects_bad_disabled_events() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"disabled_events": "wallet"}}"#).unwrap();

        assert!(matches!(Config::load(file.path()), Err(Error::Config(_))));
    }
}
