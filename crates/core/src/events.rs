//! Cache event bus.
//!
//! A small synchronous publish/subscribe channel on a fixed set of topics.
//! Mutations emit; the [`QueryProvider`](crate::QueryProvider) listens and
//! invalidates cache namespaces. Events are delivered to the handlers
//! registered at emit time and then dropped, with no buffering or replay.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Topic {
    /// Certificate data changed on the server.
    RefreshCertificates,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::RefreshCertificates => "REFRESH_CERTIFICATES",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEvent {
    pub topic: Topic,
    pub payload: Vec<Value>,
}

pub type EventHandler = Arc<dyn Fn(&CacheEvent) -> Result<(), Error> + Send + Sync>;

/// Cheap to clone; clones share the same handler table.
#[derive(Clone, Default)]
pub struct CacheEventBus {
    handlers: Arc<Mutex<HashMap<Topic, Vec<EventHandler>>>>,
}

impl fmt::Debug for CacheEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.lock();
        let counts: HashMap<&str, usize> = handlers.iter().map(|(t, h)| (t.as_str(), h.len())).collect();
        f.debug_struct("CacheEventBus").field("handlers", &counts).finish()
    }
}

impl CacheEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Topic, Vec<EventHandler>>> {
        self.handlers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register `handler` for `topic`. Registering the same `Arc` twice is a no-op.
    pub fn on(&self, topic: Topic, handler: EventHandler) {
        let mut handlers = self.lock();
        let list = handlers.entry(topic).or_default();
        if list.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            return;
        }
        list.push(handler);
        tracing::debug!(topic = %topic, handlers = list.len(), "handler registered");
    }

    /// Unregister `handler`. Returns whether it was registered.
    pub fn off(&self, topic: Topic, handler: &EventHandler) -> bool {
        let mut handlers = self.lock();
        let Some(list) = handlers.get_mut(&topic) else {
            return false;
        };
        let before = list.len();
        list.retain(|h| !Arc::ptr_eq(h, handler));
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(&topic);
        }
        removed
    }

    /// Deliver an event to every handler registered for `topic`.
    ///
    /// Handlers run synchronously on the caller's thread, outside the bus
    /// lock. A failing or panicking handler is logged and skipped. Returns
    /// the number of handlers that completed successfully.
    pub fn emit(&self, topic: Topic, payload: Vec<Value>) -> usize {
        let snapshot: Vec<EventHandler> = self.lock().get(&topic).cloned().unwrap_or_default();
        let event = CacheEvent { topic, payload };
        tracing::debug!(topic = %topic, handlers = snapshot.len(), "emitting cache event");

        let mut delivered = 0;
        for handler in snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => tracing::error!(topic = %topic, error = %err, "cache event handler failed"),
                Err(_) => tracing::error!(topic = %topic, "cache event handler panicked"),
            }
        }
        delivered
    }

    pub fn handler_count(&self, topic: Topic) -> usize {
        self.lock().get(&topic).map_or(0, Vec::len)
    }

    /// Remove every handler on every topic.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter(count: Arc<AtomicUsize>) -> EventHandler {
        Arc::new(move |_: &CacheEvent| {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_topic_wire_name() {
        assert_eq!(Topic::RefreshCertificates.to_string(), "REFRESH_CERTIFICATES");
        assert_eq!(serde_json::to_value(Topic::RefreshCertificates).unwrap(), json!("REFRESH_CERTIFICATES"));
    }

    #[test]
    fn test_emit_reaches_registered_handlers() {
        let bus = CacheEventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.on(Topic::RefreshCertificates, counter(count.clone()));
        bus.on(Topic::RefreshCertificates, counter(count.clone()));

        assert_eq!(bus.emit(Topic::RefreshCertificates, vec![json!("websites")]), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_payload_passed_through() {
        let bus = CacheEventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler: EventHandler = {
            let seen = seen.clone();
            Arc::new(move |event: &CacheEvent| {
                seen.lock().unwrap().push(event.payload.clone());
                Ok(())
            })
        };
        bus.on(Topic::RefreshCertificates, handler);
        bus.emit(Topic::RefreshCertificates, vec![json!("ssh"), json!(7)]);
        assert_eq!(*seen.lock().unwrap(), vec![vec![json!("ssh"), json!(7)]]);
    }

    #[test]
    fn test_registration_is_idempotent() {
        let bus = CacheEventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let handler = counter(count.clone());
        bus.on(Topic::RefreshCertificates, handler.clone());
        bus.on(Topic::RefreshCertificates, handler.clone());
        assert_eq!(bus.handler_count(Topic::RefreshCertificates), 1);

        bus.emit(Topic::RefreshCertificates, Vec::new());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_off_unregisters() {
        let bus = CacheEventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let handler = counter(count.clone());
        bus.on(Topic::RefreshCertificates, handler.clone());

        assert!(bus.off(Topic::RefreshCertificates, &handler));
        assert!(!bus.off(Topic::RefreshCertificates, &handler));
        assert_eq!(bus.emit(Topic::RefreshCertificates, Vec::new()), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failing_handlers_do_not_stop_delivery() {
        let bus = CacheEventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.on(Topic::RefreshCertificates, Arc::new(|_: &CacheEvent| Err(Error::SideEffect("nope".into()))));
        bus.on(Topic::RefreshCertificates, Arc::new(|_: &CacheEvent| -> Result<(), Error> { panic!("handler bug") }));
        bus.on(Topic::RefreshCertificates, counter(count.clone()));

        assert_eq!(bus.emit(Topic::RefreshCertificates, Vec::new()), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_replay_for_late_subscribers() {
        let bus = CacheEventBus::new();
        bus.emit(Topic::RefreshCertificates, Vec::new());

        let count = Arc::new(AtomicUsize::new(0));
        bus.on(Topic::RefreshCertificates, counter(count.clone()));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_handler_may_reenter_bus() {
        let bus = CacheEventBus::new();
        let inner = bus.clone();
        bus.on(
            Topic::RefreshCertificates,
            Arc::new(move |_: &CacheEvent| {
                inner.clear();
                Ok(())
            }),
        );
        assert_eq!(bus.emit(Topic::RefreshCertificates, Vec::new()), 1);
        assert_eq!(bus.handler_count(Topic::RefreshCertificates), 0);
    }

    #[test]
    fn test_clear_removes_everything() {
        let bus = CacheEventBus::new();
        bus.on(Topic::RefreshCertificates, counter(Arc::new(AtomicUsize::new(0))));
        bus.clear();
        assert_eq!(bus.handler_count(Topic::RefreshCertificates), 0);
    }
}
