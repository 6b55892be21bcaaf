//! App-wide lock across presentation surfaces
//!
//! [`AppLockCoordinator`] wraps the one app-level [`PasscodeController`]
//! and reacts to lifecycle transitions. Locking swaps the content of every
//! surface for a lock screen and remembers what was there; a successful
//! authentication puts it back.
//!
//! Surface invariant: a surface is either unlocked (no session entry) or
//! locked (entry present, lock screen shown). After a lock with N content
//! surfaces there are N entries; after a successful unlock there are none.
//!
//! The restore runs from inside the wrapped controller's `authenticate`,
//! so unlocking through the controller directly (or its lock screen flow)
//! restores the surfaces just like [`AppLockCoordinator::authenticate`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::biometric::BiometricGate;
use crate::controller::PasscodeController;
use crate::credential::CredentialStore;
use crate::error::Result;
use crate::flows::{AuthenticateFlow, LockTarget};
use crate::storage::KeyValueStore;

/// One top-level presentation context (window or scene)
pub trait Surface: Send + Sync {
    /// Whatever the surface shows when unlocked
    type Content: Send + 'static;

    /// Stable identifier of the surface
    fn id(&self) -> String;

    /// Whether the lock screen is currently shown
    fn is_showing_lock_screen(&self) -> bool;

    /// Detach the current content; `None` if the surface shows nothing
    fn take_content(&self) -> Option<Self::Content>;

    /// Substitute the lock screen
    fn show_lock_screen(&self);

    /// Put previously taken content back
    fn restore_content(&self, content: Self::Content);
}

/// Enumerates the surfaces of the running app
pub trait SurfaceProvider: Send + Sync {
    type Surface: Surface;

    fn surfaces(&self) -> Vec<Arc<Self::Surface>>;
}

type ContentOf<P> = <<P as SurfaceProvider>::Surface as Surface>::Content;

/// Saved pre-lock content, keyed by surface id
struct LockSession<C> {
    locked: bool,
    saved: HashMap<String, C>,
}

impl<C> Default for LockSession<C> {
    fn default() -> Self {
        Self {
            locked: false,
            saved: HashMap::new(),
        }
    }
}

type SharedSession<P> = Arc<Mutex<LockSession<ContentOf<P>>>>;

fn restore_surfaces<P: SurfaceProvider>(provider: &P, session: &Mutex<LockSession<ContentOf<P>>>) {
    let mut session = session.lock().unwrap_or_else(PoisonError::into_inner);
    if !session.locked {
        return;
    }
    for surface in provider.surfaces() {
        if !surface.is_showing_lock_screen() {
            continue;
        }
        if let Some(content) = session.saved.remove(&surface.id()) {
            surface.restore_content(content);
        }
    }
    if !session.saved.is_empty() {
        debug!("Dropping {} sessions of closed surfaces", session.saved.len());
        session.saved.clear();
    }
    session.locked = false;
    info!("App unlocked");
}

/// Read the persisted app identifier, generating it on first use
///
/// Stored at `<namespace>.appIdentifier`.
pub fn app_identifier(store: &dyn KeyValueStore, namespace: &str) -> Result<String> {
    let key = format!("{}.appIdentifier", namespace);
    if let Some(Value::String(identifier)) = store.get(&key)? {
        return Ok(identifier);
    }

    let identifier = Uuid::new_v4().to_string();
    store.set(&key, Value::String(identifier.clone()))?;
    info!("Generated app identifier");
    Ok(identifier)
}

/// Controller for the app-level passcode
pub fn app_controller(credentials: CredentialStore, biometrics: BiometricGate) -> Result<PasscodeController> {
    let backend = credentials.backend();
    let identifier = app_identifier(backend.as_ref(), credentials.namespace())?;
    Ok(PasscodeController::new(identifier, credentials, biometrics))
}

/// Lifecycle-driven lock over every surface of the app
pub struct AppLockCoordinator<P: SurfaceProvider> {
    controller: Arc<PasscodeController>,
    provider: Arc<P>,
    session: SharedSession<P>,
}

impl<P: SurfaceProvider + 'static> AppLockCoordinator<P> {
    /// Build the coordinator and its app-level controller
    pub fn new(credentials: CredentialStore, biometrics: BiometricGate, provider: P) -> Result<Self> {
        let controller = app_controller(credentials, biometrics)?;
        Ok(Self::with_controller(Arc::new(controller), provider))
    }

    /// Use an already configured controller
    ///
    /// Installs the surface restore on `controller`, replacing the one of
    /// any coordinator that wrapped it before.
    pub fn with_controller(controller: Arc<PasscodeController>, provider: P) -> Self {
        let provider = Arc::new(provider);
        let session: SharedSession<P> = Arc::new(Mutex::new(LockSession::default()));
        controller.set_unlock_hook(Box::new({
            let provider = Arc::clone(&provider);
            let session = Arc::clone(&session);
            move || restore_surfaces(provider.as_ref(), &session)
        }));
        Self {
            controller,
            provider,
            session,
        }
    }

    fn session(&self) -> MutexGuard<'_, LockSession<ContentOf<P>>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The wrapped app-level controller
    pub fn controller(&self) -> &Arc<PasscodeController> {
        &self.controller
    }

    pub async fn is_locked(&self) -> bool {
        self.session().locked
    }

    /// Number of surfaces currently holding saved content
    pub async fn session_count(&self) -> usize {
        self.session().saved.len()
    }

    /// Engage the lock on every surface
    ///
    /// No-op when already locked or when no passcode is set. Returns whether
    /// the app is locked afterwards.
    pub async fn lock(&self) -> bool {
        let mut session = self.session();
        if session.locked {
            return true;
        }
        if !self.controller.is_set() {
            debug!("No app passcode set, not locking");
            return false;
        }

        for surface in self.provider.surfaces() {
            if surface.is_showing_lock_screen() {
                continue;
            }
            if let Some(content) = surface.take_content() {
                session.saved.insert(surface.id(), content);
                surface.show_lock_screen();
            }
        }
        session.locked = true;
        info!("App locked ({} surfaces)", session.saved.len());
        true
    }

    /// Unlock with a code, or with biometrics when `code` is `None`
    ///
    /// Returns `Ok(true)` without a challenge when not locked. On failure
    /// the lock screens stay in place.
    pub async fn authenticate(&self, code: Option<&str>) -> Result<bool> {
        if !self.is_locked().await {
            return Ok(true);
        }
        self.controller.authenticate(code).await
    }

    /// Lock, then try a silent biometric unlock
    pub async fn did_finish_launching(&self) -> bool {
        self.lock().await;
        self.try_biometric_unlock().await
    }

    pub async fn did_enter_background(&self) {
        self.lock().await;
    }

    /// Lock, then try a silent biometric unlock
    pub async fn will_enter_foreground(&self) -> bool {
        self.lock().await;
        self.try_biometric_unlock().await
    }

    /// Lock screen flow that unlocks the whole app
    pub fn unlock_flow(self: &Arc<Self>) -> AuthenticateFlow {
        AuthenticateFlow::new(self.clone())
    }

    async fn try_biometric_unlock(&self) -> bool {
        if !self.controller.biometrics().is_enabled() {
            return !self.is_locked().await;
        }
        match self.authenticate(None).await {
            Ok(unlocked) => unlocked,
            Err(e) => {
                warn!("Biometric unlock failed: {}", e);
                false
            }
        }
    }

}

#[async_trait]
impl<P: SurfaceProvider + 'static> LockTarget for AppLockCoordinator<P> {
    async fn authenticate(&self, code: Option<&str>) -> Result<bool> {
        AppLockCoordinator::authenticate(self, code).await
    }

    fn biometrics_enabled(&self) -> bool {
        self.controller.biometrics().is_enabled()
    }
}
