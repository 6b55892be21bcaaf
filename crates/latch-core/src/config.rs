//! Library configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::digest::HashAlgorithm;
use crate::error::LatchError;
use crate::lockout::LockoutPolicy;

/// Default prefix of every persisted key
pub const DEFAULT_NAMESPACE: &str = "net.latch";

/// Latch configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatchConfig {
    /// Prefix of every persisted key
    pub namespace: String,

    /// JSON file backing the key-value store
    pub storage_path: PathBuf,

    /// Algorithm for newly written credentials
    pub hash_algorithm: HashAlgorithm,

    /// Brute-force protection; `None` allows unlimited attempts
    pub lockout: Option<LockoutPolicy>,
}

impl Default for LatchConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            storage_path: Self::default_storage_path(),
            hash_algorithm: HashAlgorithm::default(),
            lockout: None,
        }
    }
}

impl LatchConfig {
    fn default_storage_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("latch")
            .join("store.json")
    }

    /// Platform default location of the config file
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("latch")
            .join("config.json")
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the library cannot honour
    pub fn validate(&self) -> crate::Result<()> {
        if !self.hash_algorithm.is_writable() {
            return Err(LatchError::Config(format!(
                "hash_algorithm {} is only kept for reading old credentials",
                self.hash_algorithm
            )));
        }
        Ok(())
    }

    /// Load from file, or defaults if the file does not exist
    pub fn load_or_default(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Create the storage directory if it doesn't exist
    pub fn ensure_directories(&self) -> crate::Result<()> {
        if let Some(parent) = self.storage_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = LatchConfig::default();
        assert_eq!(config.namespace, "net.latch");
        assert_eq!(config.hash_algorithm, HashAlgorithm::Sha256);
        assert!(config.lockout.is_none());
        assert!(config.storage_path.ends_with("latch/store.json"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = LatchConfig {
            namespace: "com.example".to_string(),
            storage_path: dir.path().join("store.json"),
            hash_algorithm: HashAlgorithm::Argon2id,
            lockout: Some(LockoutPolicy::strict()),
        };
        config.save(&path).unwrap();

        assert_eq!(LatchConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"hash_algorithm": "argon2id"}"#).unwrap();

        let config = LatchConfig::load(&path).unwrap();
        assert_eq!(config.hash_algorithm, HashAlgorithm::Argon2id);
        assert_eq!(config.namespace, DEFAULT_NAMESPACE);
    }

    #[test]
    fn test_legacy_algorithm_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"hash_algorithm": "legacy"}"#).unwrap();

        let err = LatchConfig::load(&path).unwrap_err();
        assert!(matches!(err, LatchError::Config(_)));
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.json");
        assert!(LatchConfig::load(&path).is_err());
        assert_eq!(LatchConfig::load_or_default(&path).unwrap(), LatchConfig::default());
    }

    #[test]
    fn test_ensure_directories() {
        let dir = TempDir::new().unwrap();
        let config = LatchConfig {
            storage_path: dir.path().join("a").join("b").join("store.json"),
            ..LatchConfig::default()
        };
        config.ensure_directories().unwrap();
        assert!(dir.path().join("a").join("b").is_dir());
    }
}
