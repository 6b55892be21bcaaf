//! Credential records and their keyed store
//!
//! A credential is the persisted digest + format of one passcode. Its
//! presence is the only source of truth for "is this lock active"; the
//! store never caches, every call goes to the [`KeyValueStore`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::digest::HashAlgorithm;
use crate::error::{LatchError, Result};
use crate::format::PasscodeFormat;
use crate::lockout::FailureRecord;
use crate::storage::KeyValueStore;

/// Persisted passcode record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Digest of the code (hex, or a PHC string for Argon2id)
    #[serde(alias = "sha256")]
    pub digest: String,
    /// Shape of the code
    #[serde(alias = "option", default = "default_format")]
    pub format: PasscodeFormat,
    /// Algorithm that produced `digest`; records without one predate the field
    #[serde(default)]
    pub algorithm: HashAlgorithm,
    /// Last write time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_format() -> PasscodeFormat {
    PasscodeFormat::FourDigit
}

impl Credential {
    /// Build a record for `code`, inferring the format
    ///
    /// Legacy digests are verify-only and rejected here.
    pub fn from_code(code: &str, algorithm: HashAlgorithm) -> Result<Self> {
        if !algorithm.is_writable() {
            return Err(LatchError::Config(format!(
                "{} digests can only be verified, not written",
                algorithm
            )));
        }
        Ok(Self {
            digest: algorithm.digest(code)?,
            format: PasscodeFormat::classify(code),
            algorithm,
            updated_at: Some(Utc::now()),
        })
    }

    /// Check a candidate against this record using the recorded algorithm
    pub fn matches(&self, code: &str) -> bool {
        self.algorithm.verify(code, &self.digest)
    }
}

/// Namespaced credential store
#[derive(Clone)]
pub struct CredentialStore {
    /// Backing storage collaborator
    store: Arc<dyn KeyValueStore>,
    /// Key prefix, e.g. `net.latch`
    namespace: String,
}

impl CredentialStore {
    /// Create a store writing under `namespace`
    pub fn new(store: Arc<dyn KeyValueStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    /// Persisted key for a caller key: `<namespace>.<key>`
    pub fn storage_key(&self, key: &str) -> String {
        format!("{}.{}", self.namespace, key)
    }

    /// Whether a credential exists under `key`
    ///
    /// Read failures count as "absent".
    pub fn has(&self, key: &str) -> bool {
        match self.store.get(&self.storage_key(key)) {
            Ok(value) => value.is_some(),
            Err(e) => {
                warn!("Failed to read credential {}: {}", key, e);
                false
            }
        }
    }

    /// Store a credential, replacing any previous one
    pub fn put(&self, key: &str, credential: &Credential) -> Result<()> {
        let value = serde_json::to_value(credential)?;
        self.store.set(&self.storage_key(key), value)
    }

    /// Load the credential under `key`
    pub fn get(&self, key: &str) -> Result<Option<Credential>> {
        match self.store.get(&self.storage_key(key))? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Erase the credential under `key`
    pub fn delete(&self, key: &str) -> Result<()> {
        self.store.remove(&self.storage_key(key))
    }

    /// Consecutive failure counter kept next to the credential
    pub fn failures(&self, key: &str) -> Result<FailureRecord> {
        match self.store.get(&self.failures_key(key))? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(FailureRecord::default()),
        }
    }

    /// Persist the failure counter
    pub fn put_failures(&self, key: &str, record: &FailureRecord) -> Result<()> {
        let value = serde_json::to_value(record)?;
        self.store.set(&self.failures_key(key), value)
    }

    /// Reset the failure counter
    pub fn clear_failures(&self, key: &str) -> Result<()> {
        self.store.remove(&self.failures_key(key))
    }

    fn failures_key(&self, key: &str) -> String {
        format!("{}.failedAttempts", self.storage_key(key))
    }

    /// Backing storage, shared with the biometric preference
    pub fn backend(&self) -> Arc<dyn KeyValueStore> {
        Arc::clone(&self.store)
    }

    /// Namespace prefix
    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}
