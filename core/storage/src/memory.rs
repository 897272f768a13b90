//! In-memory storage provider for testing and development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::model::{
    ByteStream, StoredItemInformation, StoredItemType, WriteMode, WriteRequest,
};
use crate::progress::ProgressEmitter;
use crate::provider::{
    AsyncStorageProvider, AsyncStorageReader, AsyncStorageWriter, ProviderConfiguration,
    UseDirectorySeparator,
};
use crate::registry::{Dependencies, StorageModule};
use stowage_common::{pointer, Error, Result};

/// Upper bound on buffer preallocation from the declared payload size.
/// The declared size is caller input and must not drive allocation alone.
const PREALLOC_LIMIT: u64 = 1 << 20;

/// Configuration for the in-memory backend.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    separator: char,
}

impl MemoryConfig {
    /// Configuration with a custom separator character.
    pub fn with_separator(separator: char) -> Self {
        Self { separator }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { separator: '/' }
    }
}

impl ProviderConfiguration for MemoryConfig {
    fn directory_separator(&self) -> char {
        self.separator
    }
}

/// The in-memory module tag.
pub struct MemoryModule;

impl StorageModule for MemoryModule {
    type Config = MemoryConfig;

    fn name() -> &'static str {
        "memory"
    }

    fn provider(
        config: &Self::Config,
        _dependencies: &Dependencies,
        emitter: ProgressEmitter,
    ) -> Result<Arc<dyn AsyncStorageProvider>> {
        Ok(Arc::new(MemoryProvider::new(config.clone(), emitter)))
    }
}

#[derive(Debug, Clone)]
struct FileEntry {
    data: Vec<u8>,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

/// In-memory storage provider.
///
/// All data lives in a map keyed by normalized pointer and is lost on
/// drop. Directories exist implicitly as pointer prefixes.
pub struct MemoryProvider {
    config: MemoryConfig,
    entries: RwLock<HashMap<String, FileEntry>>,
    emitter: ProgressEmitter,
}

impl MemoryProvider {
    /// Create an empty provider.
    pub fn new(config: MemoryConfig, emitter: ProgressEmitter) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
            emitter,
        }
    }

    fn key(&self, storage_pointer: &str) -> Result<String> {
        pointer::require_value(storage_pointer)?;
        let sep = self.config.separator;
        Ok(pointer::components(storage_pointer, sep).join(&sep.to_string()))
    }

    fn item_type_of(&self, key: &str) -> Option<StoredItemType> {
        Self::item_type_in(&self.entries.read().unwrap(), key, self.config.separator)
    }

    /// Type lookup against an already-held guard, so check and read can
    /// share one lock acquisition.
    fn item_type_in(
        entries: &HashMap<String, FileEntry>,
        key: &str,
        separator: char,
    ) -> Option<StoredItemType> {
        if entries.contains_key(key) {
            return Some(StoredItemType::File);
        }
        let prefix = format!("{}{}", key, separator);
        if entries.keys().any(|k| k.starts_with(&prefix)) {
            return Some(StoredItemType::Directory);
        }
        None
    }
}

impl UseDirectorySeparator for MemoryProvider {
    fn directory_separator(&self) -> char {
        self.config.separator
    }
}

#[async_trait]
impl AsyncStorageReader for MemoryProvider {
    async fn read(&self, storage_pointer: &str) -> Result<ByteStream> {
        let key = self.key(storage_pointer)?;
        let entries = self.entries.read().unwrap();
        match Self::item_type_in(&entries, &key, self.config.separator) {
            Some(StoredItemType::File) => {
                let data = entries[&key].data.clone();
                Ok(Box::pin(stream::once(async move { Ok(data) })) as ByteStream)
            }
            Some(StoredItemType::Directory) => Err(Error::MustBeFile(storage_pointer.to_string())),
            None => Err(Error::NotFound(storage_pointer.to_string())),
        }
    }

    async fn exists(&self, storage_pointer: &str) -> Result<bool> {
        let key = self.key(storage_pointer)?;
        Ok(self.item_type_of(&key).is_some())
    }

    async fn exists_all(&self, storage_pointers: &[String]) -> Result<HashMap<String, bool>> {
        let mut result = HashMap::with_capacity(storage_pointers.len());
        for p in storage_pointers {
            let key = self.key(p)?;
            result.insert(p.clone(), self.item_type_of(&key).is_some());
        }
        Ok(result)
    }

    async fn stored_item_type(&self, storage_pointer: &str) -> Result<Option<StoredItemType>> {
        let key = self.key(storage_pointer)?;
        Ok(self.item_type_of(&key))
    }

    async fn information(&self, storage_pointer: &str) -> Result<StoredItemInformation> {
        let key = self.key(storage_pointer)?;
        let entries = self.entries.read().unwrap();
        let item_type = Self::item_type_in(&entries, &key, self.config.separator)
            .ok_or_else(|| Error::NotFound(storage_pointer.to_string()))?;

        let (directory_path, name) = pointer::split_name(&key, self.config.separator);

        Ok(match item_type {
            StoredItemType::File => {
                let entry = &entries[&key];
                StoredItemInformation {
                    item_type,
                    directory_path,
                    name,
                    storage_pointer: key.clone(),
                    size: Some(entry.data.len() as u64),
                    created_at: Some(entry.created_at),
                    modified_at: Some(entry.modified_at),
                    properties: HashMap::new(),
                }
            }
            StoredItemType::Directory => StoredItemInformation {
                item_type,
                directory_path,
                name,
                storage_pointer: key.clone(),
                size: None,
                created_at: None,
                modified_at: None,
                properties: HashMap::new(),
            },
        })
    }
}

#[async_trait]
impl AsyncStorageWriter for MemoryProvider {
    async fn write(&self, request: WriteRequest) -> Result<()> {
        let key = self.key(request.storage_pointer())?;
        let existing = self.item_type_of(&key);

        match (existing, request.mode()) {
            (Some(_), WriteMode::Create) => {
                return Err(Error::AlreadyExists(key));
            }
            (None, WriteMode::Replace) => {
                return Err(Error::NotFound(key));
            }
            _ => {}
        }

        let request_id = request.id();
        let requested_at = request.created_at();
        let (mut stream, total) = request.into_payload().into_parts();

        let mut data = Vec::with_capacity(total.min(PREALLOC_LIMIT) as usize);
        while let Some(chunk) = stream.next().await {
            data.extend_from_slice(&chunk?);
            self.emitter
                .emit(request_id, &key, data.len() as u64, total, requested_at);
        }
        if total == 0 {
            self.emitter.emit(request_id, &key, 0, 0, requested_at);
        }

        let now = Utc::now();
        let mut entries = self.entries.write().unwrap();
        let created_at = entries.get(&key).map(|e| e.created_at).unwrap_or(now);
        entries.insert(
            key,
            FileEntry {
                data,
                created_at,
                modified_at: now,
            },
        );
        Ok(())
    }

    async fn delete(&self, storage_pointer: &str) -> Result<()> {
        let key = self.key(storage_pointer)?;
        match self.item_type_of(&key) {
            Some(StoredItemType::File) => {
                self.entries.write().unwrap().remove(&key);
                Ok(())
            }
            Some(StoredItemType::Directory) => {
                let prefix = format!("{}{}", key, self.config.separator);
                self.entries
                    .write()
                    .unwrap()
                    .retain(|k, _| !k.starts_with(&prefix));
                Ok(())
            }
            None => Err(Error::NotFound(storage_pointer.to_string())),
        }
    }

    async fn delete_all(&self, storage_pointers: &[String]) -> Result<()> {
        // Best effort: pointers that resolve to nothing are skipped.
        for p in storage_pointers {
            match self.delete(p).await {
                Ok(()) | Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AsyncStorageProvider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Payload;
    use crate::progress::{ProgressRelay, ProgressSource, SubscriptionRegistry};

    fn provider() -> MemoryProvider {
        let relay = Arc::new(ProgressRelay::new(Arc::new(SubscriptionRegistry::new())));
        MemoryProvider::new(
            MemoryConfig::default(),
            ProgressEmitter::new(relay, ProgressSource::new("memory")),
        )
    }

    #[tokio::test]
    async fn test_write_modes() {
        let provider = provider();
        let write = |mode| WriteRequest::new("f1", Payload::from_bytes(vec![1, 2, 3]), mode);

        provider.write(write(WriteMode::Create)).await.unwrap();
        assert!(matches!(
            provider.write(write(WriteMode::Create)).await,
            Err(Error::AlreadyExists(_))
        ));
        provider.write(write(WriteMode::Replace)).await.unwrap();
        provider.write(write(WriteMode::CreateOrReplace)).await.unwrap();

        let absent = WriteRequest::new("f2", Payload::from_bytes(vec![1]), WriteMode::Replace);
        assert!(matches!(provider.write(absent).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_read_round_trip() {
        let provider = provider();
        let data = vec![7u8; 128];
        provider
            .write(WriteRequest::new(
                "dir/f1",
                Payload::from_bytes(data.clone()),
                WriteMode::Create,
            ))
            .await
            .unwrap();

        let mut stream = provider.read("dir/f1").await.unwrap();
        let mut read = Vec::new();
        while let Some(chunk) = stream.next().await {
            read.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(read, data);
    }

    #[tokio::test]
    async fn test_directory_semantics() {
        let provider = provider();
        provider
            .write(WriteRequest::new(
                "dir/f1",
                Payload::from_bytes(vec![1]),
                WriteMode::Create,
            ))
            .await
            .unwrap();

        assert_eq!(
            provider.stored_item_type("dir").await.unwrap(),
            Some(StoredItemType::Directory)
        );
        assert!(matches!(
            provider.read("dir").await,
            Err(Error::MustBeFile(_))
        ));

        let info = provider.information("dir").await.unwrap();
        assert_eq!(info.item_type, StoredItemType::Directory);
        assert_eq!(info.size, None);

        provider.delete("dir").await.unwrap();
        assert!(!provider.exists("dir/f1").await.unwrap());
    }

    #[tokio::test]
    async fn test_batch_delete_skips_missing() {
        let provider = provider();
        provider
            .write(WriteRequest::new(
                "f1",
                Payload::from_bytes(vec![1]),
                WriteMode::Create,
            ))
            .await
            .unwrap();

        provider
            .delete_all(&["f1".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert!(!provider.exists("f1").await.unwrap());
    }

    #[tokio::test]
    async fn test_exists_all_maps_each_pointer() {
        let provider = provider();
        provider
            .write(WriteRequest::new(
                "f1",
                Payload::from_bytes(vec![1]),
                WriteMode::Create,
            ))
            .await
            .unwrap();

        let result = provider
            .exists_all(&["f1".to_string(), "f2".to_string()])
            .await
            .unwrap();
        assert!(result["f1"]);
        assert!(!result["f2"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_delete_during_read_never_panics() {
        let provider = Arc::new(provider());

        let writer = {
            let provider = Arc::clone(&provider);
            tokio::spawn(async move {
                for _ in 0..500 {
                    let request = WriteRequest::new(
                        "f1",
                        Payload::from_bytes(vec![1, 2, 3]),
                        WriteMode::CreateOrReplace,
                    );
                    provider.write(request).await.unwrap();
                    match provider.delete("f1").await {
                        Ok(()) | Err(Error::NotFound(_)) => {}
                        Err(e) => panic!("unexpected delete failure: {e}"),
                    }
                }
            })
        };
        let reader = {
            let provider = Arc::clone(&provider);
            tokio::spawn(async move {
                for _ in 0..500 {
                    match provider.information("f1").await {
                        Ok(info) => assert_eq!(info.item_type, StoredItemType::File),
                        Err(Error::NotFound(_)) => {}
                        Err(e) => panic!("unexpected information failure: {e}"),
                    }
                    match provider.read("f1").await {
                        Ok(_) | Err(Error::NotFound(_)) => {}
                        Err(e) => panic!("unexpected read failure: {e}"),
                    }
                }
            })
        };

        writer.await.unwrap();
        reader.await.unwrap();
    }

    #[tokio::test]
    async fn test_huge_declared_size_does_not_preallocate() {
        let provider = provider();
        let stream: ByteStream = Box::pin(stream::once(async { Ok(vec![1, 2, 3]) }));
        let payload = Payload::from_stream(stream, u64::MAX);

        provider
            .write(WriteRequest::new("f1", payload, WriteMode::Create))
            .await
            .unwrap();

        let info = provider.information("f1").await.unwrap();
        assert_eq!(info.size, Some(3));
    }

    #[tokio::test]
    async fn test_blank_pointer_is_rejected() {
        let provider = provider();
        assert!(matches!(
            provider.exists(" ").await,
            Err(Error::MissingStoragePointer)
        ));
    }
}
