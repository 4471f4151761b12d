//! In-process callback registry.
//!
//! Callbacks for one event name run in registration order. A failing or
//! panicking callback is logged and skipped; the rest still run and the
//! emitter never sees the failure.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{trace, warn};

use super::event::AgentEvent;

/// A registered callback. The `Arc` is also the handle used by [`EventBus::off`].
pub type EventCallback = Arc<dyn Fn(&AgentEvent) -> anyhow::Result<()> + Send + Sync>;

/// Ordered multiset of callbacks per event name.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<RwLock<HashMap<String, Vec<EventCallback>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closure and return its handle.
    pub fn on<F>(&self, event_name: impl Into<String>, callback: F) -> EventCallback
    where
        F: Fn(&AgentEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let callback: EventCallback = Arc::new(callback);
        self.on_callback(event_name, Arc::clone(&callback));
        callback
    }

    /// Register an existing handle. Registering the same handle twice makes it
    /// run twice per emit.
    pub fn on_callback(&self, event_name: impl Into<String>, callback: EventCallback) {
        self.listeners
            .write()
            .entry(event_name.into())
            .or_default()
            .push(callback);
    }

    /// Remove the first registration of `callback` under `event_name`.
    ///
    /// Returns whether anything was removed. Unknown names and callbacks are a
    /// no-op.
    pub fn off(&self, event_name: &str, callback: &EventCallback) -> bool {
        let mut listeners = self.listeners.write();
        let Some(list) = listeners.get_mut(event_name) else {
            return false;
        };
        let Some(pos) = list.iter().position(|cb| Arc::ptr_eq(cb, callback)) else {
            return false;
        };
        list.remove(pos);
        if list.is_empty() {
            listeners.remove(event_name);
        }
        true
    }

    /// Run every callback registered under `event.name()`.
    ///
    /// Returns how many callbacks completed without error.
    pub fn emit(&self, event: &AgentEvent) -> usize {
        // Snapshot so callbacks may register or remove listeners re-entrantly.
        let callbacks: Vec<EventCallback> = match self.listeners.read().get(event.name()) {
            Some(list) => list.clone(),
            None => return 0,
        };

        trace!(event = event.name(), listeners = callbacks.len(), "Emitting event");

        let mut ok = 0;
        for (index, callback) in callbacks.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(Ok(())) => ok += 1,
                Ok(Err(err)) => {
                    warn!(event = event.name(), index, error = %err, "Event callback failed");
                }
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    warn!(event = event.name(), index, panic = %reason, "Event callback panicked");
                }
            }
        }
        ok
    }

    pub fn listener_count(&self, event_name: &str) -> usize {
        self.listeners
            .read()
            .get(event_name)
            .map_or(0, |list| list.len())
    }

    /// Names with at least one listener.
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.listeners.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop every registration.
    pub fn clear(&self) {
        self.listeners.write().clear();
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("events", &self.event_names())
            .finish()
    }
}
