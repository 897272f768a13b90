//! End-to-end write-progress scenarios across modules sharing one relay.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use stowage_storage::fs::{FsConfig, FsModule};
use stowage_storage::memory::{MemoryConfig, MemoryModule};
use stowage_storage::model::{Payload, WriteMode, WriteRequest};
use stowage_storage::stowage::Stowage;

fn stack(base: &std::path::Path) -> Stowage {
    Stowage::builder()
        .module::<FsModule>(FsConfig::new(base))
        .module::<MemoryModule>(MemoryConfig::default())
        .build()
}

fn chunked_payload() -> Payload {
    Payload::from_chunks(vec![vec![7u8; 4096], vec![7u8; 4096], vec![7u8; 4096]])
}

#[tokio::test]
async fn test_global_handler_sees_every_provider_until_unsubscribed() {
    let dir = tempfile::tempdir().unwrap();
    let stowage = stack(dir.path());
    let counter = Arc::new(AtomicUsize::new(0));

    let sink = Arc::clone(&counter);
    let subscription = stowage.subscriptions().subscribe_to_all(Arc::new(move |_, _| {
        sink.fetch_add(1, Ordering::SeqCst);
    }));

    let memory = stowage
        .factory()
        .provider_for::<MemoryModule>()
        .await
        .unwrap();
    let fs = stowage.factory().provider_for::<FsModule>().await.unwrap();

    // Three 4096-byte chunks tick three times on either backend.
    memory
        .write(WriteRequest::new("f1", chunked_payload(), WriteMode::Create))
        .await
        .unwrap();
    fs.write(WriteRequest::new("f1", chunked_payload(), WriteMode::Create))
        .await
        .unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 6);

    stowage.subscriptions().unsubscribe_from_all(subscription);
    memory
        .write(WriteRequest::new("f2", chunked_payload(), WriteMode::Create))
        .await
        .unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn test_request_handlers_removed_after_final_tick() {
    let dir = tempfile::tempdir().unwrap();
    let stowage = stack(dir.path());
    let counter = Arc::new(AtomicUsize::new(0));

    let provider = stowage
        .factory()
        .provider_for::<MemoryModule>()
        .await
        .unwrap();

    let request = WriteRequest::new("f1", chunked_payload(), WriteMode::Create);
    let request_id = request.id();
    let sink = Arc::clone(&counter);
    stowage.subscriptions().subscribe_to_request(
        request_id,
        Arc::new(move |_, _| {
            sink.fetch_add(1, Ordering::SeqCst);
        }),
    );

    provider.write(request).await.unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 3);
    assert!(stowage.subscriptions().request_handlers(request_id).is_empty());
}

#[tokio::test]
async fn test_concurrent_requests_never_cross_handlers() {
    let dir = tempfile::tempdir().unwrap();
    let stowage = stack(dir.path());

    let provider = stowage
        .factory()
        .provider_for::<MemoryModule>()
        .await
        .unwrap();

    let r1 = WriteRequest::new("a", chunked_payload(), WriteMode::Create);
    let r2 = WriteRequest::new("b", chunked_payload(), WriteMode::Create);

    let seen_by_r1 = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen_by_r1);
    stowage.subscriptions().subscribe_to_request(
        r1.id(),
        Arc::new(move |_, info| {
            sink.lock().unwrap().push(info.storage_pointer.clone());
        }),
    );

    let (first, second) = tokio::join!(provider.write(r1), provider.write(r2));
    first.unwrap();
    second.unwrap();

    let seen = seen_by_r1.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|pointer| pointer == "a"));
}

#[tokio::test]
async fn test_every_tick_balances_and_final_tick_is_complete() {
    let dir = tempfile::tempdir().unwrap();
    let stowage = stack(dir.path());

    let ticks = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&ticks);
    stowage.subscriptions().subscribe_to_all(Arc::new(move |source, info| {
        sink.lock().unwrap().push((
            source.provider,
            info.bytes_transferred,
            info.bytes_remaining,
            info.total_bytes,
            info.percent_complete,
        ));
    }));

    let provider = stowage.factory().provider_for::<FsModule>().await.unwrap();
    provider
        .write(WriteRequest::new(
            "f1",
            Payload::from_bytes(vec![0u8; 12_288]),
            WriteMode::Create,
        ))
        .await
        .unwrap();

    let ticks = ticks.lock().unwrap();
    assert_eq!(ticks.len(), 3);
    for (provider, transferred, remaining, total, _) in ticks.iter() {
        assert_eq!(*provider, "filesystem");
        assert_eq!(*remaining, total - transferred);
    }
    assert_eq!(
        ticks.last().unwrap(),
        &("filesystem", 12_288, 0, 12_288, 100)
    );
}

#[tokio::test]
async fn test_unknown_unsubscribe_leaves_others_intact() {
    let dir = tempfile::tempdir().unwrap();
    let stowage = stack(dir.path());
    let counter = Arc::new(AtomicUsize::new(0));

    let sink = Arc::clone(&counter);
    stowage.subscriptions().subscribe_to_all(Arc::new(move |_, _| {
        sink.fetch_add(1, Ordering::SeqCst);
    }));

    // Silent no-ops: ids that were never issued.
    stowage.subscriptions().unsubscribe_from_all(uuid::Uuid::new_v4());
    stowage
        .subscriptions()
        .unsubscribe_from_request(uuid::Uuid::new_v4(), uuid::Uuid::new_v4());

    let provider = stowage
        .factory()
        .provider_for::<MemoryModule>()
        .await
        .unwrap();
    provider
        .write(WriteRequest::new(
            "f1",
            Payload::from_bytes(vec![1]),
            WriteMode::Create,
        ))
        .await
        .unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}
