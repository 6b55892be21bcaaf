//! Passcode lifecycle events
//!
//! Each controller owns an [`EventBus`]. Events are informational: they
//! never change controller state. Listeners run on their own tokio task,
//! so a callback never executes inside the `create`/`authenticate` call
//! that produced the event and may safely call back into the controller.
//!
//! Every subscriber gets its own unbounded queue, so a burst of events is
//! delivered in full no matter how late the listener task gets polled.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{LatchError, Result};

/// Factor that satisfied an authentication
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AuthMethod {
    /// Typed passcode
    Code,
    /// Device owner presence challenge
    Biometric,
}

/// Lifecycle event raised by a passcode controller
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PasscodeEvent {
    /// A credential was created
    Created { key: String },
    /// An existing credential was replaced
    Changed { key: String },
    /// The credential was erased
    Removed { key: String },
    /// An authentication attempt succeeded
    Authenticated { key: String, method: AuthMethod },
    /// An authentication attempt did not succeed
    AuthenticationFailed { key: String },
}

impl PasscodeEvent {
    /// Key of the controller that raised the event
    pub fn key(&self) -> &str {
        match self {
            PasscodeEvent::Created { key }
            | PasscodeEvent::Changed { key }
            | PasscodeEvent::Removed { key }
            | PasscodeEvent::Authenticated { key, .. }
            | PasscodeEvent::AuthenticationFailed { key } => key,
        }
    }
}

/// Callback slots for passcode events; implement only what you need
pub trait PasscodeDelegate: Send + Sync {
    fn passcode_created(&self, _key: &str) {}

    fn passcode_changed(&self, _key: &str) {}

    fn passcode_removed(&self, _key: &str) {}

    fn passcode_authenticated(&self, _key: &str, _method: AuthMethod) {}

    fn passcode_authentication_failed(&self, _key: &str) {}
}

fn dispatch(delegate: &dyn PasscodeDelegate, event: &PasscodeEvent) {
    match event {
        PasscodeEvent::Created { key } => delegate.passcode_created(key),
        PasscodeEvent::Changed { key } => delegate.passcode_changed(key),
        PasscodeEvent::Removed { key } => delegate.passcode_removed(key),
        PasscodeEvent::Authenticated { key, method } => delegate.passcode_authenticated(key, *method),
        PasscodeEvent::AuthenticationFailed { key } => delegate.passcode_authentication_failed(key),
    }
}

/// Registration of a listener task
///
/// Dropping the handle unregisters the listener.
#[must_use = "dropping the handle unregisters the listener"]
pub struct ListenerHandle {
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Unregister the listener
    pub fn remove(self) {
        self.task.abort();
    }

    /// Whether the listener task is still running
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

type Subscribers = Vec<mpsc::UnboundedSender<PasscodeEvent>>;

/// Fan-out of passcode events with zero or more subscribers
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Subscribers>>,
}

impl EventBus {
    /// Create a bus without subscribers
    pub fn new() -> Self {
        Self::default()
    }

    fn subscribers(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe to raw events
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<PasscodeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers().push(tx);
        rx
    }

    /// Publish an event; returns the number of subscribers it reached
    pub fn emit(&self, event: PasscodeEvent) -> usize {
        debug!("Passcode event: {:?}", event);
        let mut subscribers = self.subscribers();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        subscribers.len()
    }

    /// Register a closure called for every event
    ///
    /// The closure runs on a task spawned on the current tokio runtime.
    /// Fails with [`LatchError::Runtime`] when called outside of one.
    pub fn add_listener<F>(&self, listener: F) -> Result<ListenerHandle>
    where
        F: Fn(&PasscodeEvent) + Send + Sync + 'static,
    {
        let runtime = Handle::try_current().map_err(|e| LatchError::Runtime(e.to_string()))?;
        let mut rx = self.subscribe();
        let task = runtime.spawn(async move {
            while let Some(event) = rx.recv().await {
                listener(&event);
            }
        });
        Ok(ListenerHandle { task })
    }

    /// Register a delegate
    pub fn add_delegate(&self, delegate: Arc<dyn PasscodeDelegate>) -> Result<ListenerHandle> {
        self.add_listener(move |event| dispatch(delegate.as_ref(), event))
    }

    /// Number of live subscriptions (raw receivers and listeners)
    pub fn receiver_count(&self) -> usize {
        let mut subscribers = self.subscribers();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl PasscodeDelegate for Recorder {
        fn passcode_created(&self, key: &str) {
            self.calls.lock().unwrap().push(format!("created:{}", key));
        }

        fn passcode_authenticated(&self, key: &str, method: AuthMethod) {
            self.calls.lock().unwrap().push(format!("authenticated:{}:{:?}", key, method));
        }
    }

    #[test]
    fn test_emit_without_receivers() {
        let bus = EventBus::new();
        assert_eq!(bus.emit(PasscodeEvent::Created { key: "app".into() }), 0);
    }

    #[test]
    fn test_subscribe_receives_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(PasscodeEvent::Created { key: "app".into() });
        bus.emit(PasscodeEvent::Removed { key: "app".into() });

        assert_eq!(rx.try_recv().unwrap(), PasscodeEvent::Created { key: "app".into() });
        assert_eq!(rx.try_recv().unwrap(), PasscodeEvent::Removed { key: "app".into() });
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_delegate_receives_only_implemented_slots() {
        let bus = EventBus::new();
        let recorder = Arc::new(Recorder::default());
        let handle = bus.add_delegate(recorder.clone()).unwrap();

        bus.emit(PasscodeEvent::Created { key: "app".into() });
        bus.emit(PasscodeEvent::Changed { key: "app".into() });
        bus.emit(PasscodeEvent::Authenticated {
            key: "app".into(),
            method: AuthMethod::Code,
        });

        for _ in 0..50 {
            if recorder.calls.lock().unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(
            *recorder.calls.lock().unwrap(),
            vec!["created:app".to_string(), "authenticated:app:Code".to_string()]
        );
        assert!(handle.is_active());
        handle.remove();
    }

    #[tokio::test]
    async fn test_dropped_handle_unregisters() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = bus
            .add_listener(move |event| {
                let _ = tx.send(event.clone());
            })
            .unwrap();

        bus.emit(PasscodeEvent::Created { key: "a".into() });
        assert_eq!(rx.recv().await.unwrap().key(), "a");

        drop(handle);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(bus.receiver_count(), 0);

        bus.emit(PasscodeEvent::Created { key: "b".into() });
        assert!(rx.recv().await.is_none());
    }

    #[derive(Default)]
    struct FailureCounter {
        failures: AtomicUsize,
    }

    impl PasscodeDelegate for FailureCounter {
        fn passcode_authentication_failed(&self, _key: &str) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_burst_reaches_delegate_in_full() {
        let bus = EventBus::new();
        let counter = Arc::new(FailureCounter::default());
        let _handle = bus.add_delegate(counter.clone()).unwrap();

        // No yield between emissions
        for _ in 0..500 {
            bus.emit(PasscodeEvent::AuthenticationFailed { key: "app".into() });
        }

        for _ in 0..100 {
            if counter.failures.load(Ordering::SeqCst) == 500 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(counter.failures.load(Ordering::SeqCst), 500);
    }

    #[test]
    fn test_add_listener_outside_runtime() {
        let bus = EventBus::new();
        let result = bus.add_listener(|_event| {});
        assert!(matches!(result, Err(LatchError::Runtime(_))));
        assert_eq!(bus.receiver_count(), 0);
    }
}
