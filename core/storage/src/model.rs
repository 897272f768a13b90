//! Data model for storage requests, progress events, and item metadata.

use chrono::{DateTime, Utc};
use futures::{stream, Stream};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use uuid::Uuid;

use stowage_common::Result;

/// Correlation key for a single write attempt.
pub type RequestId = Uuid;

/// Byte stream type for read/write payloads.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// How a write treats an existing target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteMode {
    /// Fail with `AlreadyExists` if the target exists.
    Create,
    /// Fail with `NotFound` if the target is absent.
    Replace,
    /// Always succeed.
    CreateOrReplace,
}

/// Payload for a write: a byte stream plus its declared total size.
///
/// The declared size is the basis for progress math; providers emit ticks
/// against it as they drain the stream.
pub struct Payload {
    stream: ByteStream,
    size: u64,
}

impl Payload {
    /// Wrap a stream whose total size is known up front.
    pub fn from_stream(stream: ByteStream, size: u64) -> Self {
        Self { stream, size }
    }

    /// Wrap an owned buffer as a single-chunk payload.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        let stream = if data.is_empty() {
            Box::pin(stream::empty()) as ByteStream
        } else {
            Box::pin(stream::once(async move { Ok(data) })) as ByteStream
        };
        Self { stream, size }
    }

    /// Wrap owned chunks as a multi-chunk payload.
    pub fn from_chunks(chunks: Vec<Vec<u8>>) -> Self {
        let size = chunks.iter().map(|c| c.len() as u64).sum();
        let stream = Box::pin(stream::iter(chunks.into_iter().map(Ok))) as ByteStream;
        Self { stream, size }
    }

    /// Declared total size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Consume the payload, yielding the stream and its declared size.
    pub fn into_parts(self) -> (ByteStream, u64) {
        (self.stream, self.size)
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Payload").field("size", &self.size).finish()
    }
}

/// A single write attempt against a provider.
///
/// Immutable once constructed and consumed exactly once by a provider's
/// `write`. The id is the correlation key for progress subscriptions.
#[derive(Debug)]
pub struct WriteRequest {
    id: RequestId,
    storage_pointer: String,
    mode: WriteMode,
    payload: Payload,
    created_at: DateTime<Utc>,
}

impl WriteRequest {
    /// Create a new write request with a fresh id.
    pub fn new(storage_pointer: impl Into<String>, payload: Payload, mode: WriteMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            storage_pointer: storage_pointer.into(),
            mode,
            payload,
            created_at: Utc::now(),
        }
    }

    /// The request's unique id, never reused.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Target locator for the write.
    pub fn storage_pointer(&self) -> &str {
        &self.storage_pointer
    }

    /// The write mode.
    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    /// Declared payload size in bytes.
    pub fn size(&self) -> u64 {
        self.payload.size()
    }

    /// Creation timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Consume the request, yielding its payload.
    pub fn into_payload(self) -> Payload {
        self.payload
    }
}

/// One progress tick during a write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteProgress {
    /// Id of the originating write request.
    pub request_id: RequestId,
    /// Target locator of the write.
    pub storage_pointer: String,
    /// Bytes transferred so far.
    pub bytes_transferred: u64,
    /// Bytes remaining, always `total_bytes - bytes_transferred`.
    pub bytes_remaining: u64,
    /// Declared total size of the payload.
    pub total_bytes: u64,
    /// Percent complete, rounded; exactly 100 on the final tick.
    pub percent_complete: u8,
    /// When the originating request was created.
    pub requested_at: DateTime<Utc>,
}

impl WriteProgress {
    /// Build a tick from transferred/total counts.
    ///
    /// An empty payload is complete by definition.
    pub fn new(
        request_id: RequestId,
        storage_pointer: impl Into<String>,
        bytes_transferred: u64,
        total_bytes: u64,
        requested_at: DateTime<Utc>,
    ) -> Self {
        let transferred = bytes_transferred.min(total_bytes);
        let percent = if total_bytes == 0 {
            100
        } else {
            ((transferred as f64 / total_bytes as f64) * 100.0).round() as u8
        };
        Self {
            request_id,
            storage_pointer: storage_pointer.into(),
            bytes_transferred: transferred,
            bytes_remaining: total_bytes - transferred,
            total_bytes,
            percent_complete: percent,
            requested_at,
        }
    }

    /// Whether this tick marks completion of the write.
    pub fn is_complete(&self) -> bool {
        self.percent_complete >= 100
    }
}

/// Kind of a stored item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoredItemType {
    File,
    Directory,
}

/// Metadata for a stored item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredItemInformation {
    /// Whether the item is a file or directory.
    pub item_type: StoredItemType,
    /// Directory portion of the pointer, if any.
    pub directory_path: Option<String>,
    /// Name of the item (last pointer component).
    pub name: String,
    /// Full locator for the item.
    pub storage_pointer: String,
    /// Size in bytes (None for directories).
    pub size: Option<u64>,
    /// Creation time, when the backend reports one.
    pub created_at: Option<DateTime<Utc>>,
    /// Last modification time, when the backend reports one.
    pub modified_at: Option<DateTime<Utc>>,
    /// Backend-specific extras (etag, storage class, ...).
    pub properties: HashMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_write_request_ids_are_unique() {
        let a = WriteRequest::new("a", Payload::from_bytes(vec![1]), WriteMode::Create);
        let b = WriteRequest::new("a", Payload::from_bytes(vec![1]), WriteMode::Create);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_progress_remaining_always_balances() {
        let id = Uuid::new_v4();
        for transferred in [0u64, 1, 4096, 12_288] {
            let tick = WriteProgress::new(id, "f1", transferred, 12_288, Utc::now());
            assert_eq!(tick.bytes_remaining, tick.total_bytes - tick.bytes_transferred);
        }
    }

    #[test]
    fn test_progress_percent_rounds_and_completes() {
        let id = Uuid::new_v4();
        let half = WriteProgress::new(id, "f1", 50, 100, Utc::now());
        assert_eq!(half.percent_complete, 50);
        assert!(!half.is_complete());

        let third = WriteProgress::new(id, "f1", 1, 3, Utc::now());
        assert_eq!(third.percent_complete, 33);

        let done = WriteProgress::new(id, "f1", 12_288, 12_288, Utc::now());
        assert_eq!(done.percent_complete, 100);
        assert!(done.is_complete());
    }

    #[test]
    fn test_progress_empty_payload_is_complete() {
        let tick = WriteProgress::new(Uuid::new_v4(), "f1", 0, 0, Utc::now());
        assert_eq!(tick.percent_complete, 100);
        assert_eq!(tick.bytes_remaining, 0);
    }

    #[tokio::test]
    async fn test_payload_from_chunks_declares_total_size() {
        let payload = Payload::from_chunks(vec![vec![0u8; 4096], vec![0u8; 4096], vec![0u8; 4096]]);
        assert_eq!(payload.size(), 12_288);

        let (mut stream, size) = payload.into_parts();
        let mut drained = 0u64;
        while let Some(chunk) = stream.next().await {
            drained += chunk.unwrap().len() as u64;
        }
        assert_eq!(drained, size);
    }
}
