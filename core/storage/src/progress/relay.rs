//! Relay from raw provider progress events to registered subscribers.

use chrono::{DateTime, Utc};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::model::{RequestId, WriteProgress};
use crate::progress::subscriptions::{ProgressHandler, SubscriptionRegistry};

/// The emitting side of a progress event: which provider instance raised it.
#[derive(Debug, Clone)]
pub struct ProgressSource {
    /// Provider name (e.g. "filesystem", "s3").
    pub provider: &'static str,
    /// Id of the provider instance, fresh per resolution.
    pub instance: Uuid,
}

impl ProgressSource {
    /// Source for a new provider instance.
    pub fn new(provider: &'static str) -> Self {
        Self {
            provider,
            instance: Uuid::new_v4(),
        }
    }
}

/// A raw progress event as raised by a provider.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// Id of the originating write request.
    pub request_id: RequestId,
    /// The progress tick.
    pub info: WriteProgress,
}

/// Bridges provider progress events to the subscription registry.
///
/// Handlers for the originating request are invoked first, then every
/// global handler; no invocation order is guaranteed within either group.
/// Once a request reports 100% complete, all of its remaining
/// subscriptions are removed so the bucket is garbage-collected even when
/// several handlers were attached.
pub struct ProgressRelay {
    subscriptions: Arc<SubscriptionRegistry>,
}

impl ProgressRelay {
    /// Create a relay dispatching into the given registry.
    pub fn new(subscriptions: Arc<SubscriptionRegistry>) -> Self {
        Self { subscriptions }
    }

    /// The registry this relay dispatches into.
    pub fn subscriptions(&self) -> &Arc<SubscriptionRegistry> {
        &self.subscriptions
    }

    /// Dispatch one progress event to per-request and global subscribers.
    ///
    /// A panicking handler is isolated and logged; it never aborts the
    /// emitting write or starves the remaining handlers.
    pub fn relay_write_progress(&self, source: &ProgressSource, event: &ProgressEvent) {
        let request_handlers = self.subscriptions.request_handlers(event.request_id);

        if !request_handlers.is_empty() {
            for handler in &request_handlers {
                Self::invoke(handler, source, &event.info);
            }

            if event.info.percent_complete >= 100 {
                debug!(
                    request_id = %event.request_id,
                    "write complete, removing request subscriptions"
                );
                if let Some(ids) = self
                    .subscriptions
                    .request_handler_ids()
                    .get(&event.request_id)
                {
                    for id in ids {
                        self.subscriptions.unsubscribe_from_request(event.request_id, *id);
                    }
                }
            }
        }

        for handler in self.subscriptions.handlers() {
            Self::invoke(&handler, source, &event.info);
        }
    }

    fn invoke(handler: &ProgressHandler, source: &ProgressSource, info: &WriteProgress) {
        let result = catch_unwind(AssertUnwindSafe(|| handler(source, info)));
        if result.is_err() {
            warn!(
                provider = source.provider,
                request_id = %info.request_id,
                "progress handler panicked, continuing with remaining handlers"
            );
        }
    }
}

/// Handle a provider holds to raise progress events into the shared relay.
///
/// The factory binds an emitter to every provider it resolves, which is
/// what makes writes observable uniformly across modules.
#[derive(Clone)]
pub struct ProgressEmitter {
    relay: Arc<ProgressRelay>,
    source: ProgressSource,
}

impl ProgressEmitter {
    /// Bind an emitter for one provider instance.
    pub fn new(relay: Arc<ProgressRelay>, source: ProgressSource) -> Self {
        Self { relay, source }
    }

    /// Emit one progress tick for a write request.
    pub fn emit(
        &self,
        request_id: RequestId,
        storage_pointer: &str,
        bytes_transferred: u64,
        total_bytes: u64,
        requested_at: DateTime<Utc>,
    ) {
        let info = WriteProgress::new(
            request_id,
            storage_pointer,
            bytes_transferred,
            total_bytes,
            requested_at,
        );
        let event = ProgressEvent { request_id, info };
        self.relay.relay_write_progress(&self.source, &event);
    }

    /// The source identity this emitter stamps on events.
    pub fn source(&self) -> &ProgressSource {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn relay_with_registry() -> (ProgressRelay, Arc<SubscriptionRegistry>) {
        let registry = Arc::new(SubscriptionRegistry::new());
        (ProgressRelay::new(Arc::clone(&registry)), registry)
    }

    fn tick(request_id: RequestId, transferred: u64, total: u64) -> ProgressEvent {
        ProgressEvent {
            request_id,
            info: WriteProgress::new(request_id, "a", transferred, total, Utc::now()),
        }
    }

    #[test]
    fn test_request_handlers_receive_only_their_request() {
        let (relay, registry) = relay_with_registry();
        let source = ProgressSource::new("memory");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let r1 = Uuid::new_v4();
        let r2 = Uuid::new_v4();
        let sink = Arc::clone(&seen);
        registry.subscribe_to_request(
            r1,
            Arc::new(move |_, info| sink.lock().unwrap().push(info.request_id)),
        );

        relay.relay_write_progress(&source, &tick(r1, 50, 100));
        relay.relay_write_progress(&source, &tick(r2, 50, 100));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], r1);
    }

    #[test]
    fn test_global_handlers_receive_every_event() {
        let (relay, registry) = relay_with_registry();
        let source = ProgressSource::new("memory");
        let counter = Arc::new(AtomicUsize::new(0));

        let sink = Arc::clone(&counter);
        registry.subscribe_to_all(Arc::new(move |_, _| {
            sink.fetch_add(1, Ordering::SeqCst);
        }));

        for _ in 0..3 {
            relay.relay_write_progress(&source, &tick(Uuid::new_v4(), 10, 100));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_completion_unsubscribes_all_request_handlers() {
        let (relay, registry) = relay_with_registry();
        let source = ProgressSource::new("memory");
        let counter = Arc::new(AtomicUsize::new(0));
        let request = Uuid::new_v4();

        for _ in 0..3 {
            let sink = Arc::clone(&counter);
            registry.subscribe_to_request(
                request,
                Arc::new(move |_, _| {
                    sink.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        relay.relay_write_progress(&source, &tick(request, 100, 100));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(registry.request_handlers(request).is_empty());
        assert!(!registry.request_handler_ids().contains_key(&request));

        // Nothing left to deliver to.
        relay.relay_write_progress(&source, &tick(request, 100, 100));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_incomplete_tick_keeps_subscriptions() {
        let (relay, registry) = relay_with_registry();
        let source = ProgressSource::new("memory");
        let request = Uuid::new_v4();
        registry.subscribe_to_request(request, Arc::new(|_, _| {}));

        relay.relay_write_progress(&source, &tick(request, 99, 100));
        assert_eq!(registry.request_handlers(request).len(), 1);
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let (relay, registry) = relay_with_registry();
        let source = ProgressSource::new("memory");
        let counter = Arc::new(AtomicUsize::new(0));
        let request = Uuid::new_v4();

        registry.subscribe_to_request(
            request,
            Arc::new(|_, _| panic!("subscriber bug")),
        );
        let sink = Arc::clone(&counter);
        registry.subscribe_to_all(Arc::new(move |_, _| {
            sink.fetch_add(1, Ordering::SeqCst);
        }));

        relay.relay_write_progress(&source, &tick(request, 100, 100));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(registry.request_handlers(request).is_empty());
    }

    #[test]
    fn test_emitter_stamps_source() {
        let (relay, registry) = relay_with_registry();
        let emitter = ProgressEmitter::new(Arc::new(relay), ProgressSource::new("filesystem"));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        registry.subscribe_to_all(Arc::new(move |source, info| {
            sink.lock()
                .unwrap()
                .push((source.provider, info.percent_complete));
        }));

        let request = Uuid::new_v4();
        emitter.emit(request, "f1", 4096, 12_288, Utc::now());
        emitter.emit(request, "f1", 12_288, 12_288, Utc::now());

        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[("filesystem", 33), ("filesystem", 100)]);
    }
}
