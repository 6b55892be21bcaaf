//! Passcode controller
//!
//! State machine for one credential key:
//!
//! ```text
//!   Unset --create--> Set --change--> Set
//!     ^                |
//!     +-----remove-----+
//! ```
//!
//! State is never cached: every query re-reads the credential store.
//! `authenticate` is serialized per controller so two overlapping calls
//! cannot interleave their challenge and event emission.
//!
//! Credentials still carrying a legacy digest are rewritten with the
//! configured algorithm the first time their code is entered correctly.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::biometric::BiometricGate;
use crate::credential::{Credential, CredentialStore};
use crate::digest::HashAlgorithm;
use crate::error::{LatchError, Result};
use crate::events::{AuthMethod, EventBus, ListenerHandle, PasscodeDelegate, PasscodeEvent};
use crate::flows::AuthenticateFlow;
use crate::format::PasscodeFormat;
use crate::lockout::LockoutPolicy;

/// Whether a credential is configured for the key
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PasscodeState {
    /// No credential ("not configured")
    #[default]
    Unset,
    /// Credential present
    Set,
}

/// Runs inside `authenticate` after a successful match, before the event
pub(crate) type UnlockHook = Box<dyn Fn() + Send + Sync>;

/// Create / change / remove / authenticate for one credential key
pub struct PasscodeController {
    /// Caller-chosen key namespacing this passcode
    key: String,
    /// Persisted credentials
    credentials: CredentialStore,
    /// Shared biometric gate
    biometrics: BiometricGate,
    /// Lifecycle event broadcast
    events: EventBus,
    /// Algorithm used for new credentials
    algorithm: HashAlgorithm,
    /// Optional brute-force protection
    lockout: Option<LockoutPolicy>,
    /// One authentication in flight at a time
    auth_lock: Mutex<()>,
    /// Installed by the app lock coordinator wrapping this controller
    unlock_hook: RwLock<Option<UnlockHook>>,
}

impl PasscodeController {
    /// Create a controller for `key`
    pub fn new(key: impl Into<String>, credentials: CredentialStore, biometrics: BiometricGate) -> Self {
        Self {
            key: key.into(),
            credentials,
            biometrics,
            events: EventBus::new(),
            algorithm: HashAlgorithm::default(),
            lockout: None,
            auth_lock: Mutex::new(()),
            unlock_hook: RwLock::new(None),
        }
    }

    /// Use `algorithm` for credentials written from now on
    pub fn with_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Enable or disable the lockout policy
    pub fn with_lockout(mut self, lockout: Option<LockoutPolicy>) -> Self {
        self.lockout = lockout;
        self
    }

    /// Caller key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Biometric gate shared by all controllers
    pub fn biometrics(&self) -> &BiometricGate {
        &self.biometrics
    }

    /// Event bus of this controller
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to raw lifecycle events
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<PasscodeEvent> {
        self.events.subscribe()
    }

    /// Register a delegate (see [`EventBus::add_delegate`])
    pub fn add_delegate(&self, delegate: Arc<dyn PasscodeDelegate>) -> Result<ListenerHandle> {
        self.events.add_delegate(delegate)
    }

    /// Whether a credential is configured
    pub fn is_set(&self) -> bool {
        self.credentials.has(&self.key)
    }

    /// Current state
    pub fn state(&self) -> PasscodeState {
        if self.is_set() {
            PasscodeState::Set
        } else {
            PasscodeState::Unset
        }
    }

    /// Format of the stored code, for choosing the entry UI
    pub fn format(&self) -> Option<PasscodeFormat> {
        match self.credentials.get(&self.key) {
            Ok(credential) => credential.map(|c| c.format),
            Err(e) => {
                warn!("Failed to read credential {}: {}", self.key, e);
                None
            }
        }
    }

    /// Configure a passcode; always allowed and replaces any existing one
    pub fn create(&self, code: &str) -> Result<()> {
        self.write_credential(code)?;
        info!("Passcode created for {}", self.key);
        self.events.emit(PasscodeEvent::Created {
            key: self.key.clone(),
        });
        Ok(())
    }

    /// Replace an existing passcode
    ///
    /// The caller is expected to have verified the current code. Returns
    /// `false` without side effects when no passcode is set.
    pub fn change(&self, code: &str) -> Result<bool> {
        if !self.is_set() {
            debug!("Ignoring change for {}: no passcode set", self.key);
            return Ok(false);
        }
        self.write_credential(code)?;
        info!("Passcode changed for {}", self.key);
        self.events.emit(PasscodeEvent::Changed {
            key: self.key.clone(),
        });
        Ok(true)
    }

    /// Erase the passcode
    ///
    /// Returns `false` without side effects when no passcode is set.
    pub fn remove(&self) -> Result<bool> {
        if !self.is_set() {
            debug!("Ignoring remove for {}: no passcode set", self.key);
            return Ok(false);
        }
        self.credentials.delete(&self.key)?;
        self.credentials.clear_failures(&self.key)?;
        info!("Passcode removed for {}", self.key);
        self.events.emit(PasscodeEvent::Removed {
            key: self.key.clone(),
        });
        Ok(true)
    }

    /// Authenticate with a code, or with biometrics when `code` is `None`
    ///
    /// A mismatch is `Ok(false)` plus an `AuthenticationFailed` event.
    /// Challenge errors and lockouts are returned as errors without an event.
    pub async fn authenticate(&self, code: Option<&str>) -> Result<bool> {
        let _in_flight = self.auth_lock.lock().await;

        let (authenticated, method) = match code {
            Some(code) => (self.verify_code(code)?, AuthMethod::Code),
            None => {
                let authenticated = if self.biometrics.is_enabled() {
                    self.biometrics.challenge().await?
                } else {
                    debug!("No code supplied and biometrics disabled for {}", self.key);
                    false
                };
                (authenticated, AuthMethod::Biometric)
            }
        };

        if authenticated {
            debug!("Authenticated {} via {:?}", self.key, method);
            self.run_unlock_hook();
            self.events.emit(PasscodeEvent::Authenticated {
                key: self.key.clone(),
                method,
            });
        } else {
            debug!("Authentication failed for {}", self.key);
            self.events.emit(PasscodeEvent::AuthenticationFailed {
                key: self.key.clone(),
            });
        }

        Ok(authenticated)
    }

    /// Lock screen flow for this passcode, if one is configured
    pub fn lock_screen(self: &Arc<Self>) -> Option<AuthenticateFlow> {
        if self.is_set() {
            Some(AuthenticateFlow::new(self.clone()))
        } else {
            None
        }
    }

    /// Remaining lockout in seconds, if the policy currently blocks attempts
    pub fn lockout_remaining_seconds(&self) -> Option<u64> {
        let policy = self.lockout.as_ref()?;
        let record = self.credentials.failures(&self.key).ok()?;
        policy
            .remaining(&record, Utc::now())
            .map(|remaining| remaining.as_secs().max(1))
    }

    pub(crate) fn set_unlock_hook(&self, hook: UnlockHook) {
        *self.unlock_hook.write().unwrap_or_else(PoisonError::into_inner) = Some(hook);
    }

    fn run_unlock_hook(&self) {
        let hook = self.unlock_hook.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(hook) = hook.as_ref() {
            hook();
        }
    }

    fn write_credential(&self, code: &str) -> Result<()> {
        let credential = Credential::from_code(code, self.algorithm)?;
        self.credentials.put(&self.key, &credential)?;
        if self.lockout.is_some() {
            self.credentials.clear_failures(&self.key)?;
        }
        Ok(())
    }

    fn verify_code(&self, code: &str) -> Result<bool> {
        if let Some(secs) = self.lockout_remaining_seconds() {
            return Err(LatchError::LockedOut(secs));
        }

        let credential = match self.credentials.get(&self.key) {
            Ok(Some(credential)) => credential,
            Ok(None) => return Ok(false),
            Err(e) => {
                warn!("Failed to read credential {}: {}", self.key, e);
                return Ok(false);
            }
        };

        let matched = credential.matches(code);
        if matched && !credential.algorithm.is_writable() {
            self.upgrade_credential(code);
        }

        if let Some(policy) = &self.lockout {
            let mut record = self.credentials.failures(&self.key)?;
            if matched {
                if record.failed_attempts > 0 {
                    self.credentials.clear_failures(&self.key)?;
                }
            } else {
                record.record_failure(Utc::now());
                self.credentials.put_failures(&self.key, &record)?;
                if policy.blocks_after(record.failed_attempts) {
                    warn!(
                        "Passcode {} locked: {}",
                        self.key,
                        policy.describe(record.failed_attempts)
                    );
                }
            }
        }

        Ok(matched)
    }

    fn upgrade_credential(&self, code: &str) {
        let upgraded = Credential::from_code(code, self.algorithm)
            .and_then(|credential| self.credentials.put(&self.key, &credential));
        match upgraded {
            Ok(()) => info!("Rehashed legacy credential {} with {}", self.key, self.algorithm),
            Err(e) => warn!("Failed to rehash legacy credential {}: {}", self.key, e),
        }
    }
}
