//! Wires the cache event bus to the query cache.

use std::time::Duration;

use tokio::task::JoinHandle;

use crate::events::{CacheEvent, CacheEventBus, EventHandler, Topic};
use crate::query::{QueryClient, QueryKey};

/// Invalidate every query under `namespace` when `topic` is emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationRule {
    pub topic: Topic,
    pub namespace: QueryKey,
}

impl InvalidationRule {
    pub fn new(topic: Topic, namespace: QueryKey) -> Self {
        Self { topic, namespace }
    }

    /// `REFRESH_CERTIFICATES` invalidates `["certs"]`.
    pub fn defaults() -> Vec<Self> {
        vec![Self::new(Topic::RefreshCertificates, QueryKey::new(["certs"]))]
    }
}

/// Owns the query cache and the event bus for the lifetime of a session.
///
/// Invalidation is deliberately broad: an event refetches the whole
/// namespace and its payload is only logged.
pub struct QueryProvider {
    client: QueryClient,
    bus: CacheEventBus,
    listeners: Vec<(Topic, EventHandler)>,
}

impl QueryProvider {
    pub fn new(client: QueryClient, bus: CacheEventBus) -> Self {
        Self::with_rules(client, bus, InvalidationRule::defaults())
    }

    pub fn with_rules(client: QueryClient, bus: CacheEventBus, rules: Vec<InvalidationRule>) -> Self {
        let listeners = rules
            .into_iter()
            .map(|rule| {
                let handler = invalidation_handler(&client, rule.namespace);
                bus.on(rule.topic, handler.clone());
                (rule.topic, handler)
            })
            .collect();
        Self { client, bus, listeners }
    }

    pub fn client(&self) -> &QueryClient {
        &self.client
    }

    pub fn bus(&self) -> &CacheEventBus {
        &self.bus
    }

    /// Tear down every bus handler and drop all cached queries.
    pub fn shutdown(&mut self) {
        self.listeners.clear();
        self.bus.clear();
        self.client.clear();
        tracing::debug!("query provider shut down");
    }

    /// Run cache garbage collection every `interval` until the handle is
    /// aborted or the cache is dropped.
    pub fn spawn_gc(&self, interval: Duration) -> JoinHandle<()> {
        let client = self.client.downgrade();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(client) = client.upgrade() else {
                    break;
                };
                client.collect_garbage();
            }
        })
    }
}

impl Drop for QueryProvider {
    fn drop(&mut self) {
        for (topic, handler) in self.listeners.drain(..) {
            self.bus.off(topic, &handler);
        }
    }
}

fn invalidation_handler(client: &QueryClient, namespace: QueryKey) -> EventHandler {
    let client = client.downgrade();
    std::sync::Arc::new(move |event: &CacheEvent| {
        let Some(client) = client.upgrade() else {
            return Ok(());
        };
        let marked = client.invalidate_queries(&namespace);
        tracing::info!(topic = %event.topic, namespace = %namespace, payload = ?event.payload, marked, "invalidated namespace");
        Ok(())
    })
}
