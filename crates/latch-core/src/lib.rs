//! Latch Core - Passcode credentials, biometric gate and app lock
//!
//! This crate holds the lifecycle of app passcodes: storing a hashed
//! credential per caller key, verifying entered codes or a biometric
//! challenge, broadcasting lifecycle events, and locking every
//! presentation surface of an app when it goes to the background.
//! Rendering is left to the embedding UI, which talks to the headless
//! flows in [`flows`].

pub mod app_lock;
pub mod biometric;
pub mod cancel;
pub mod config;
pub mod controller;
pub mod credential;
pub mod digest;
pub mod error;
pub mod events;
pub mod flows;
pub mod format;
pub mod lockout;
pub mod storage;

pub use app_lock::{app_controller, app_identifier, AppLockCoordinator, Surface, SurfaceProvider};
pub use biometric::{
    BiometricAuthenticator, BiometricGate, BiometryKind, ScriptedAuthenticator,
    UnavailableAuthenticator, DEFAULT_CHALLENGE_REASON,
};
pub use cancel::CancelToken;
pub use config::{LatchConfig, DEFAULT_NAMESPACE};
pub use controller::{PasscodeController, PasscodeState};
pub use credential::{Credential, CredentialStore};
pub use digest::HashAlgorithm;
pub use error::{ChallengeError, LatchError, Result};
pub use events::{AuthMethod, EventBus, ListenerHandle, PasscodeDelegate, PasscodeEvent};
pub use flows::{
    run_flow, AuthenticateFlow, ChangeFlow, CreateFlow, Flow, FlowOutcome, FlowStep, LockTarget,
    PasscodePrompter, Prompt, RemoveFlow, MISMATCH_MESSAGE,
};
pub use format::PasscodeFormat;
pub use lockout::{FailureRecord, LockoutPolicy};
pub use storage::{FileStore, KeyValueStore, MemoryStore};

use std::sync::Arc;

/// Open the store and gate described by `config`
///
/// Returns the credential store and a biometric gate sharing one backend.
/// Every call on the same storage path shares that backend too.
pub fn open(
    config: &LatchConfig,
    authenticator: Arc<dyn BiometricAuthenticator>,
) -> Result<(CredentialStore, BiometricGate)> {
    config.ensure_directories()?;
    let backend: Arc<dyn KeyValueStore> = FileStore::shared(config.storage_path.clone())?;
    let credentials = CredentialStore::new(backend.clone(), config.namespace.clone());
    let gate = BiometricGate::new(authenticator, backend, &config.namespace);
    Ok((credentials, gate))
}

/// Controller for `key` configured from `config`
pub fn configured_controller(
    config: &LatchConfig,
    key: &str,
    credentials: CredentialStore,
    biometrics: BiometricGate,
) -> PasscodeController {
    PasscodeController::new(key, credentials, biometrics)
        .with_algorithm(config.hash_algorithm)
        .with_lockout(config.lockout.clone())
}
