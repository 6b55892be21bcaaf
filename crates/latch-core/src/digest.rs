//! One-way passcode digests
//!
//! A digest is an equality token for a code and is never decoded. The
//! algorithm that produced a digest is stored next to it so verification
//! keeps working after the configured algorithm changes.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::warn;
use zeroize::Zeroizing;

use crate::error::{LatchError, Result};

/// Digest algorithm for passcodes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// SHA-1 hex; only for verifying credentials written by old releases
    Legacy,
    /// SHA-256 hex of the UTF-8 code
    #[default]
    Sha256,
    /// Salted Argon2id PHC string
    Argon2id,
}

impl HashAlgorithm {
    /// Compute the digest of a code
    pub fn digest(&self, code: &str) -> Result<String> {
        let code_bytes = Zeroizing::new(code.as_bytes().to_vec());

        match self {
            HashAlgorithm::Legacy => Ok(hex::encode(Sha1::digest(&code_bytes[..]))),
            HashAlgorithm::Sha256 => Ok(hex::encode(Sha256::digest(&code_bytes[..]))),
            HashAlgorithm::Argon2id => {
                let salt = SaltString::generate(&mut OsRng);
                Argon2::default()
                    .hash_password(&code_bytes, &salt)
                    .map(|hash| hash.to_string())
                    .map_err(|e| LatchError::Crypto(format!("Failed to hash passcode: {}", e)))
            }
        }
    }

    /// Check a code against a stored digest
    pub fn verify(&self, code: &str, stored: &str) -> bool {
        match self {
            HashAlgorithm::Legacy | HashAlgorithm::Sha256 => {
                let computed = match self.digest(code) {
                    Ok(computed) => computed,
                    Err(_) => return false,
                };
                computed.as_bytes().ct_eq(stored.as_bytes()).into()
            }
            HashAlgorithm::Argon2id => {
                let parsed = match PasswordHash::new(stored) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        warn!("Stored Argon2 digest is malformed: {}", e);
                        return false;
                    }
                };
                let code_bytes = Zeroizing::new(code.as_bytes().to_vec());
                Argon2::default().verify_password(&code_bytes, &parsed).is_ok()
            }
        }
    }

    /// Whether new credentials may be written with this algorithm
    pub fn is_writable(&self) -> bool {
        !matches!(self, HashAlgorithm::Legacy)
    }

    /// Persisted name of the algorithm
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Legacy => "legacy",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Argon2id => "argon2id",
        }
    }
}

impl std::str::FromStr for HashAlgorithm {
    type Err = LatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "legacy" => Ok(HashAlgorithm::Legacy),
            "sha256" => Ok(HashAlgorithm::Sha256),
            "argon2id" => Ok(HashAlgorithm::Argon2id),
            other => Err(LatchError::Config(format!("Unknown hash algorithm: {}", other))),
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
