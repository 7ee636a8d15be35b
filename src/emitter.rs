//! Push-based event emitter with per-handler isolation
//!
//! `Emitter` is the subscribe/fire primitive shared by the runtime's
//! per-session event stream, the relays, and the notice channel. Handlers run
//! synchronously in registration order. A handler that returns an error or
//! panics is logged and skipped; the remaining handlers still run and the
//! emitter stays usable for later events.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use thiserror::Error;

/// Failure reported by an event handler
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    /// Create a handler error from a message
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Outcome of a single handler invocation
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Shared event handler
pub type Listener<T> = Arc<dyn Fn(&T) -> HandlerResult + Send + Sync>;

struct Listeners<T> {
    next_id: u64,
    entries: Vec<(u64, Listener<T>)>,
}

/// Multi-subscriber event channel
///
/// Cloning an emitter yields another handle to the same listener list.
pub struct Emitter<T> {
    name: Arc<str>,
    inner: Arc<Mutex<Listeners<T>>>,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: 'static> Emitter<T> {
    /// Create an emitter; the name only appears in logs
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Arc::from(name.into()),
            inner: Arc::new(Mutex::new(Listeners {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Channel name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a handler; it stays registered until the returned
    /// subscription is disposed or dropped
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&T) -> HandlerResult + Send + Sync + 'static,
    {
        let listener: Listener<T> = Arc::new(handler);
        let id = {
            let mut listeners = lock(&self.inner);
            let id = listeners.next_id;
            listeners.next_id += 1;
            listeners.entries.push((id, listener));
            id
        };

        let weak: Weak<Mutex<Listeners<T>>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                lock(&inner).entries.retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    /// Deliver an event to every current handler
    ///
    /// Returns the number of handlers that completed successfully.
    pub fn fire(&self, event: &T) -> usize {
        let snapshot: Vec<Listener<T>> = lock(&self.inner)
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        snapshot
            .iter()
            .filter(|listener| deliver(&self.name, listener, event))
            .count()
    }

    /// Number of registered handlers
    pub fn listener_count(&self) -> usize {
        lock(&self.inner).entries.len()
    }
}

/// Handle to a registered handler
///
/// Dropping the handle unsubscribes. Disposing twice is a no-op.
pub struct Subscription {
    dispose: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub(crate) fn new(dispose: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            dispose: Some(Box::new(dispose)),
        }
    }

    /// Unsubscribe now
    pub fn dispose(mut self) {
        self.run_dispose();
    }

    fn run_dispose(&mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_dispose();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.dispose.is_some())
            .finish()
    }
}

/// Run one handler, isolating errors and panics
pub(crate) fn deliver<T>(channel: &str, listener: &Listener<T>, event: &T) -> bool {
    match catch_unwind(AssertUnwindSafe(|| listener(event))) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::warn!(channel = %channel, error = %e, "Event handler failed");
            false
        }
        Err(payload) => {
            tracing::warn!(
                channel = %channel,
                panic = %panic_message(payload.as_ref()),
                "Event handler panicked"
            );
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Lock a std mutex, recovering the data if a handler panicked while holding it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
