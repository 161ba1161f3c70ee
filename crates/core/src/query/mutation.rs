//! Writes that announce themselves on the cache event bus.

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::Error;
use crate::events::{CacheEventBus, Topic};

type MutateFn<R, O> = Arc<dyn Fn(R) -> BoxFuture<'static, Result<O, Error>> + Send + Sync>;
type PayloadFn<R> = Arc<dyn Fn(&R) -> Vec<Value> + Send + Sync>;

/// A remote write followed by a cache event on success.
///
/// Mutations are never retried: a write that timed out may still have
/// been applied.
pub struct Mutation<R, O> {
    remote: MutateFn<R, O>,
    bus: CacheEventBus,
    topic: Topic,
    payload: Option<PayloadFn<R>>,
}

impl<R, O> Clone for Mutation<R, O> {
    fn clone(&self) -> Self {
        Self { remote: self.remote.clone(), bus: self.bus.clone(), topic: self.topic, payload: self.payload.clone() }
    }
}

impl<R: Send + 'static, O: Send + 'static> Mutation<R, O> {
    pub fn new<M, Fut>(remote: M, bus: &CacheEventBus, topic: Topic) -> Self
    where
        M: Fn(R) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, Error>> + Send + 'static,
    {
        Self { remote: Arc::new(move |request| remote(request).boxed()), bus: bus.clone(), topic, payload: None }
    }

    /// Derive the event payload from the request.
    pub fn with_payload<P>(self, payload: P) -> Self
    where
        P: Fn(&R) -> Vec<Value> + Send + Sync + 'static,
    {
        Self { payload: Some(Arc::new(payload)), ..self }
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Run the write. On success the topic is emitted before returning.
    ///
    /// # Errors
    ///
    /// Returns the remote error unchanged; nothing is emitted.
    pub async fn mutate(&self, request: R) -> Result<O, Error> {
        let payload = self.payload.as_ref().map(|payload| payload(&request)).unwrap_or_default();
        match (self.remote)(request).await {
            Ok(output) => {
                let delivered = self.bus.emit(self.topic, payload);
                tracing::debug!(topic = %self.topic, delivered, "mutation succeeded");
                Ok(output)
            }
            Err(err) => {
                tracing::warn!(topic = %self.topic, error = %err, "mutation failed");
                Err(err)
            }
        }
    }
}
