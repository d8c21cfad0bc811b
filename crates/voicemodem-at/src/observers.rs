//! Status observer registry.
//!
//! Observers are called synchronously, in registration order, on the IO task
//! that decoded the notification. Each call is isolated: an observer that
//! returns an error or panics is logged and skipped, and delivery continues
//! with the next one. Observers must not block; anything slow belongs on a
//! channel the observer forwards to.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{error, warn};

use voicemodem_core::events::ModemEvent;

/// Failure reported by a [`StatusObserver`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ObserverError(pub String);

impl From<String> for ObserverError {
    fn from(message: String) -> Self {
        ObserverError(message)
    }
}

impl From<&str> for ObserverError {
    fn from(message: &str) -> Self {
        ObserverError(message.to_string())
    }
}

/// Receiver of modem status events.
///
/// Implemented for any `Fn(&ModemEvent) -> Result<(), ObserverError>`
/// closure, so simple observers need no type of their own.
pub trait StatusObserver: Send + Sync {
    fn on_event(&self, event: &ModemEvent) -> Result<(), ObserverError>;
}

impl<F> StatusObserver for F
where
    F: Fn(&ModemEvent) -> Result<(), ObserverError> + Send + Sync,
{
    fn on_event(&self, event: &ModemEvent) -> Result<(), ObserverError> {
        self(event)
    }
}

/// Ordered set of observers.
///
/// Identity is the `Arc` allocation: registering a clone of an already
/// registered `Arc` is a no-op.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: Mutex<Vec<Arc<dyn StatusObserver>>>,
}

fn same_observer(a: &Arc<dyn StatusObserver>, b: &Arc<dyn StatusObserver>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn list(&self) -> MutexGuard<'_, Vec<Arc<dyn StatusObserver>>> {
        self.observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add an observer. Returns `false` if it was already registered.
    pub fn register(&self, observer: Arc<dyn StatusObserver>) -> bool {
        let mut list = self.list();
        if list.iter().any(|o| same_observer(o, &observer)) {
            return false;
        }
        list.push(observer);
        true
    }

    /// Remove an observer. Returns `false` if it was not registered.
    pub fn unregister(&self, observer: &Arc<dyn StatusObserver>) -> bool {
        let mut list = self.list();
        match list.iter().position(|o| same_observer(o, observer)) {
            Some(index) => {
                list.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.list().len()
    }

    pub fn is_empty(&self) -> bool {
        self.list().is_empty()
    }

    /// Deliver `event` to every observer.
    ///
    /// Works on a snapshot of the list, so an observer may register or
    /// unregister observers (itself included) from inside its callback; the
    /// change applies from the next event.
    pub fn dispatch(&self, event: &ModemEvent) {
        let snapshot: Vec<Arc<dyn StatusObserver>> = self.list().clone();

        for (index, observer) in snapshot.iter().enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| observer.on_event(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(observer = index, event = event.kind(), error = %e, "status observer failed");
                }
                Err(payload) => {
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic payload".to_string());
                    error!(observer = index, event = event.kind(), panic = %message, "status observer panicked");
                }
            }
        }
    }
}
