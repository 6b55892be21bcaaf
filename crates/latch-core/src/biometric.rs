//! Biometric gate
//!
//! Wraps the platform biometric evaluator behind [`BiometricAuthenticator`]
//! and owns the process-wide opt-in flag.
//!
//! # Error policy
//!
//! - Capability probes never fail outward: errors are logged and mean "unavailable"
//! - Live challenges propagate [`ChallengeError`] to the caller
//! - Turning biometrics on requires a successful challenge; turning them off never does

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::ChallengeError;
use crate::storage::KeyValueStore;

/// Reason string shown in the system biometric prompt
pub const DEFAULT_CHALLENGE_REASON: &str = "Unlock with biometrics";

/// Kind of biometric sensor on the device
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BiometryKind {
    /// No sensor
    #[default]
    None,
    /// Fingerprint
    TouchId,
    /// Face
    FaceId,
    /// Iris
    OpticId,
}

impl BiometryKind {
    /// Human-readable sensor name
    pub fn display_name(&self) -> Option<&'static str> {
        match self {
            BiometryKind::None => None,
            BiometryKind::TouchId => Some("Touch ID"),
            BiometryKind::FaceId => Some("Face ID"),
            BiometryKind::OpticId => Some("Optic ID"),
        }
    }

    /// Symbol name a UI can use for the sensor icon
    pub fn symbol_name(&self) -> Option<&'static str> {
        match self {
            BiometryKind::None => None,
            BiometryKind::TouchId => Some("touchid"),
            BiometryKind::FaceId => Some("faceid"),
            BiometryKind::OpticId => Some("opticid"),
        }
    }
}

/// Platform biometric evaluator
#[async_trait]
pub trait BiometricAuthenticator: Send + Sync {
    /// Probe whether policy evaluation is possible right now
    fn can_evaluate(&self) -> Result<bool, ChallengeError>;

    /// Sensor kind
    fn kind(&self) -> BiometryKind;

    /// Run a device owner presence evaluation
    ///
    /// `Ok(false)` means the user did not pass; errors are system-level failures.
    async fn evaluate(&self, reason: &str) -> Result<bool, ChallengeError>;
}

/// Evaluator for devices without biometrics
#[derive(Clone, Copy, Debug, Default)]
pub struct UnavailableAuthenticator;

#[async_trait]
impl BiometricAuthenticator for UnavailableAuthenticator {
    fn can_evaluate(&self) -> Result<bool, ChallengeError> {
        Err(ChallengeError::NotAvailable)
    }

    fn kind(&self) -> BiometryKind {
        BiometryKind::None
    }

    async fn evaluate(&self, _reason: &str) -> Result<bool, ChallengeError> {
        Err(ChallengeError::NotAvailable)
    }
}

/// Evaluator that replays queued outcomes
///
/// Used by tests and demos. An empty queue answers `Ok(false)`.
pub struct ScriptedAuthenticator {
    kind: BiometryKind,
    probe: Mutex<Result<bool, ChallengeError>>,
    outcomes: Mutex<VecDeque<Result<bool, ChallengeError>>>,
    delay: Option<Duration>,
    evaluations: AtomicUsize,
}

impl ScriptedAuthenticator {
    /// Create an available evaluator of the given kind
    pub fn new(kind: BiometryKind) -> Self {
        Self {
            kind,
            probe: Mutex::new(Ok(true)),
            outcomes: Mutex::new(VecDeque::new()),
            delay: None,
            evaluations: AtomicUsize::new(0),
        }
    }

    /// Sleep this long inside every evaluation
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Replace the probe answer
    pub fn set_probe(&self, probe: Result<bool, ChallengeError>) {
        if let Ok(mut current) = self.probe.lock() {
            *current = probe;
        }
    }

    /// Queue the outcome of the next evaluation
    pub fn push_outcome(&self, outcome: Result<bool, ChallengeError>) {
        if let Ok(mut outcomes) = self.outcomes.lock() {
            outcomes.push_back(outcome);
        }
    }

    /// Number of evaluations performed so far
    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BiometricAuthenticator for ScriptedAuthenticator {
    fn can_evaluate(&self) -> Result<bool, ChallengeError> {
        self.probe
            .lock()
            .map_err(|_| ChallengeError::Policy("probe lock poisoned".to_string()))?
            .clone()
    }

    fn kind(&self) -> BiometryKind {
        self.kind
    }

    async fn evaluate(&self, _reason: &str) -> Result<bool, ChallengeError> {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self
            .outcomes
            .lock()
            .map_err(|_| ChallengeError::Policy("outcome lock poisoned".to_string()))?
            .pop_front();
        next.unwrap_or(Ok(false))
    }
}

/// Device capability probe, live challenge and the persisted opt-in flag
#[derive(Clone)]
pub struct BiometricGate {
    authenticator: Arc<dyn BiometricAuthenticator>,
    store: Arc<dyn KeyValueStore>,
    preference_key: String,
    reason: String,
}

impl BiometricGate {
    /// Create a gate persisting its flag at `<namespace>.enableBiometrics`
    pub fn new(
        authenticator: Arc<dyn BiometricAuthenticator>,
        store: Arc<dyn KeyValueStore>,
        namespace: &str,
    ) -> Self {
        Self {
            authenticator,
            store,
            preference_key: format!("{}.enableBiometrics", namespace),
            reason: DEFAULT_CHALLENGE_REASON.to_string(),
        }
    }

    /// Override the prompt reason
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Sensor kind reported by the platform
    pub fn kind(&self) -> BiometryKind {
        self.authenticator.kind()
    }

    /// Whether the device can evaluate biometrics
    pub fn is_available(&self) -> bool {
        match self.authenticator.can_evaluate() {
            Ok(available) => available,
            Err(e) => {
                warn!("Biometric capability probe failed: {}", e);
                false
            }
        }
    }

    /// Persisted opt-in flag
    pub fn is_enabled(&self) -> bool {
        match self.store.get(&self.preference_key) {
            Ok(Some(Value::Bool(enabled))) => enabled,
            Ok(_) => false,
            Err(e) => {
                warn!("Failed to read biometric preference: {}", e);
                false
            }
        }
    }

    /// Opt in or out of biometric unlock
    ///
    /// Opting in runs a live challenge and persists its outcome. Opting out
    /// persists `false` without a challenge.
    pub async fn set_enabled(&self, want: bool) -> Result<bool, ChallengeError> {
        if !want {
            self.persist(false)?;
            info!("Biometric unlock disabled");
            return Ok(false);
        }

        if !self.authenticator.can_evaluate()? {
            debug!("Biometrics requested but device cannot evaluate");
            return Ok(false);
        }

        let enabled = self.authenticator.evaluate(&self.reason).await?;
        self.persist(enabled)?;
        info!("Biometric unlock {}", if enabled { "enabled" } else { "not enabled" });
        Ok(enabled)
    }

    /// One-shot device owner presence evaluation
    pub async fn challenge(&self) -> Result<bool, ChallengeError> {
        if !self.authenticator.can_evaluate()? {
            return Ok(false);
        }
        self.authenticator.evaluate(&self.reason).await
    }

    fn persist(&self, enabled: bool) -> Result<(), ChallengeError> {
        self.store
            .set(&self.preference_key, Value::Bool(enabled))
            .map_err(|e| ChallengeError::Storage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn gate_with(auth: Arc<ScriptedAuthenticator>) -> (Arc<MemoryStore>, BiometricGate) {
        let store = Arc::new(MemoryStore::new());
        let gate = BiometricGate::new(auth, store.clone(), "net.latch");
        (store, gate)
    }

    #[tokio::test]
    async fn test_enable_requires_successful_challenge() {
        let auth = Arc::new(ScriptedAuthenticator::new(BiometryKind::FaceId));
        auth.push_outcome(Ok(false));
        auth.push_outcome(Ok(true));
        let (_, gate) = gate_with(auth.clone());

        assert!(!gate.set_enabled(true).await.unwrap());
        assert!(!gate.is_enabled());

        assert!(gate.set_enabled(true).await.unwrap());
        assert!(gate.is_enabled());
        assert_eq!(auth.evaluations(), 2);
    }

    #[tokio::test]
    async fn test_disable_never_challenges() {
        let auth = Arc::new(ScriptedAuthenticator::new(BiometryKind::TouchId));
        auth.push_outcome(Ok(true));
        let (_, gate) = gate_with(auth.clone());
        gate.set_enabled(true).await.unwrap();

        auth.set_probe(Err(ChallengeError::NotAvailable));
        assert!(!gate.set_enabled(false).await.unwrap());
        assert!(!gate.is_enabled());
        assert_eq!(auth.evaluations(), 1);
    }

    #[tokio::test]
    async fn test_enable_on_unsupported_device_skips_challenge() {
        let auth = Arc::new(ScriptedAuthenticator::new(BiometryKind::None));
        auth.set_probe(Ok(false));
        let (_, gate) = gate_with(auth.clone());

        assert!(!gate.set_enabled(true).await.unwrap());
        assert_eq!(auth.evaluations(), 0);
    }

    #[tokio::test]
    async fn test_probe_error_is_swallowed_by_availability_only() {
        let store = Arc::new(MemoryStore::new());
        let gate = BiometricGate::new(Arc::new(UnavailableAuthenticator), store, "net.latch");

        assert!(!gate.is_available());
        assert_eq!(gate.set_enabled(true).await, Err(ChallengeError::NotAvailable));
        assert_eq!(gate.challenge().await, Err(ChallengeError::NotAvailable));
    }

    #[tokio::test]
    async fn test_challenge_errors_propagate() {
        let auth = Arc::new(ScriptedAuthenticator::new(BiometryKind::FaceId));
        auth.push_outcome(Err(ChallengeError::UserCancel));
        let (_, gate) = gate_with(auth);

        assert_eq!(gate.challenge().await, Err(ChallengeError::UserCancel));
    }

    #[test]
    fn test_preference_key_and_default() {
        let auth = Arc::new(ScriptedAuthenticator::new(BiometryKind::FaceId));
        let (store, gate) = gate_with(auth);
        assert!(!gate.is_enabled());

        store.set("net.latch.enableBiometrics", Value::Bool(true)).unwrap();
        assert!(gate.is_enabled());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(BiometryKind::FaceId.display_name(), Some("Face ID"));
        assert_eq!(BiometryKind::OpticId.symbol_name(), Some("opticid"));
        assert_eq!(BiometryKind::None.display_name(), None);
    }
}
