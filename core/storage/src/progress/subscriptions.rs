//! Thread-safe bookkeeping of write-progress subscribers.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::model::{RequestId, WriteProgress};
use crate::progress::relay::ProgressSource;

/// Identifier of a single subscription.
pub type SubscriptionId = Uuid;

/// Callback invoked with the emitting provider and the progress tick.
pub type ProgressHandler = Arc<dyn Fn(&ProgressSource, &WriteProgress) + Send + Sync>;

/// Registry of global and per-request progress subscribers.
///
/// All operations are safe under concurrent access from multiple writers
/// emitting progress for different requests; the nested concurrent maps
/// avoid a global serialization point. Lookups return snapshot copies, so
/// a handler removed concurrently may still see an event already in
/// flight - unsubscribe only affects future dispatches.
#[derive(Default)]
pub struct SubscriptionRegistry {
    global: DashMap<SubscriptionId, ProgressHandler>,
    by_request: DashMap<RequestId, DashMap<SubscriptionId, ProgressHandler>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for every progress event from every provider.
    pub fn subscribe_to_all(&self, handler: ProgressHandler) -> SubscriptionId {
        let id = Uuid::new_v4();
        self.global.insert(id, handler);
        id
    }

    /// Register a handler scoped to a single request.
    ///
    /// The request's bucket is created lazily on first subscription.
    pub fn subscribe_to_request(
        &self,
        request_id: RequestId,
        handler: ProgressHandler,
    ) -> SubscriptionId {
        let id = Uuid::new_v4();
        self.by_request
            .entry(request_id)
            .or_default()
            .insert(id, handler);
        id
    }

    /// Remove a global subscription. Unknown ids are a silent no-op.
    pub fn unsubscribe_from_all(&self, subscription_id: SubscriptionId) {
        self.global.remove(&subscription_id);
    }

    /// Remove a per-request subscription. Unknown request or subscription
    /// ids are a silent no-op; double-unsubscribes are normal.
    ///
    /// A bucket emptied by the removal is dropped entirely, so completed
    /// requests leave no dangling entries behind.
    pub fn unsubscribe_from_request(
        &self,
        request_id: RequestId,
        subscription_id: SubscriptionId,
    ) {
        if let Some(bucket) = self.by_request.get(&request_id) {
            bucket.remove(&subscription_id);
        }
        self.by_request.remove_if(&request_id, |_, bucket| bucket.is_empty());
    }

    /// Snapshot of all global handlers.
    pub fn handlers(&self) -> Vec<ProgressHandler> {
        self.global.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Snapshot of the handlers subscribed to one request.
    ///
    /// Unknown requests yield an empty list, not an error.
    pub fn request_handlers(&self, request_id: RequestId) -> Vec<ProgressHandler> {
        self.by_request
            .get(&request_id)
            .map(|bucket| bucket.iter().map(|e| Arc::clone(e.value())).collect())
            .unwrap_or_default()
    }

    /// Snapshot of subscription ids per request, for the relay's
    /// completion sweep.
    pub fn request_handler_ids(&self) -> HashMap<RequestId, Vec<SubscriptionId>> {
        self.by_request
            .iter()
            .map(|e| (*e.key(), e.value().iter().map(|h| *h.key()).collect()))
            .collect()
    }
}
