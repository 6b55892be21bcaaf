//! Error types for the latch core library

use thiserror::Error;

/// Result type alias for latch operations
pub type Result<T> = std::result::Result<T, LatchError>;

/// Errors raised by a live biometric (device owner presence) evaluation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChallengeError {
    /// Device has no usable biometric sensor, or the app lacks access to it
    #[error("Biometric authentication is not available")]
    NotAvailable,

    /// Sensor present but no biometric identity enrolled
    #[error("No biometric identity is enrolled")]
    NotEnrolled,

    /// User dismissed the prompt
    #[error("Biometric authentication cancelled by user")]
    UserCancel,

    /// System dismissed the prompt (another app came to the foreground, etc.)
    #[error("Biometric authentication cancelled by system")]
    SystemCancel,

    /// Too many failed biometric attempts at the OS level
    #[error("Biometry is locked out")]
    Lockout,

    /// Policy evaluation failed for another reason
    #[error("Biometric policy error: {0}")]
    Policy(String),

    /// Preference could not be persisted after a successful challenge
    #[error("Failed to persist biometric preference: {0}")]
    Storage(String),
}

impl ChallengeError {
    /// Whether the error is best answered by sending the user to system settings
    pub fn suggests_settings(&self) -> bool {
        matches!(self, ChallengeError::NotAvailable)
    }
}

/// Errors that can occur in latch operations
#[derive(Debug, Error)]
pub enum LatchError {
    /// Biometric challenge error
    #[error("Challenge error: {0}")]
    Challenge(#[from] ChallengeError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Persistence collaborator failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Hashing failed
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Too many wrong codes under the configured lockout policy
    #[error("Passcode locked out for {0} seconds")]
    LockedOut(u64),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No tokio runtime to run listeners on
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl From<serde_json::Error> for LatchError {
    fn from(e: serde_json::Error) -> Self {
        LatchError::Serialization(e.to_string())
    }
}
