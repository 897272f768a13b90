//! Blocking facade for non-async callers.
//!
//! The async providers stay the single implementation; the blocking
//! surface drives them on a dedicated current-thread runtime instead of
//! bridging futures on the caller's runtime, which would deadlock under
//! a constrained thread pool. Nothing here may be called from inside an
//! async context.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};

use crate::model::{StoredItemInformation, StoredItemType, WriteRequest};
use crate::progress::ProgressRelay;
use crate::provider::AsyncStorageProvider;
use crate::registry::{ModuleRegistry, StorageModule};
use futures::StreamExt;
use stowage_common::Result;

/// Blocking counterpart of [`crate::StorageFactory`].
///
/// Shares the registry and relay with its async sibling, so providers it
/// resolves follow the same default-module rules and emit progress into
/// the same subscription registry.
pub struct BlockingStorageFactory {
    modules: Arc<ModuleRegistry>,
    relay: Arc<ProgressRelay>,
    runtime: Arc<Runtime>,
}

impl BlockingStorageFactory {
    /// Create a blocking factory with its own single-threaded runtime.
    pub fn new(modules: Arc<ModuleRegistry>, relay: Arc<ProgressRelay>) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self {
            modules,
            relay,
            runtime: Arc::new(runtime),
        })
    }

    /// Resolve the default module's provider.
    pub fn provider(&self) -> Result<BlockingStorageProvider> {
        let inner = self.modules.build_default(&self.relay)?;
        Ok(self.wrap(inner))
    }

    /// Resolve a specific module's provider with its stored default
    /// configuration.
    pub fn provider_for<M: StorageModule>(&self) -> Result<BlockingStorageProvider> {
        let inner = self.modules.build_for::<M>(None, &self.relay)?;
        Ok(self.wrap(inner))
    }

    /// Resolve a specific module's provider with a per-call configuration
    /// override.
    pub fn provider_with<M: StorageModule>(
        &self,
        configuration: M::Config,
    ) -> Result<BlockingStorageProvider> {
        let inner = self.modules.build_for::<M>(Some(&configuration), &self.relay)?;
        Ok(self.wrap(inner))
    }

    fn wrap(&self, inner: Arc<dyn AsyncStorageProvider>) -> BlockingStorageProvider {
        BlockingStorageProvider {
            inner,
            runtime: Arc::clone(&self.runtime),
        }
    }
}

/// Blocking view over an async storage provider.
pub struct BlockingStorageProvider {
    inner: Arc<dyn AsyncStorageProvider>,
    runtime: Arc<Runtime>,
}

impl BlockingStorageProvider {
    /// Provider name.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Separator character the provider interprets pointers with.
    pub fn directory_separator(&self) -> char {
        self.inner.directory_separator()
    }

    /// Perform a write, blocking until it finishes.
    ///
    /// Progress events are emitted from this thread while the write runs.
    pub fn write(&self, request: WriteRequest) -> Result<()> {
        self.runtime.block_on(self.inner.write(request))
    }

    /// Read the full content of a stored file.
    pub fn read(&self, storage_pointer: &str) -> Result<Vec<u8>> {
        self.runtime.block_on(async {
            let mut stream = self.inner.read(storage_pointer).await?;
            let mut data = Vec::new();
            while let Some(chunk) = stream.next().await {
                data.extend_from_slice(&chunk?);
            }
            Ok(data)
        })
    }

    /// Delete the item at the pointer.
    pub fn delete(&self, storage_pointer: &str) -> Result<()> {
        self.runtime.block_on(self.inner.delete(storage_pointer))
    }

    /// Delete many items, skipping pointers that resolve to nothing.
    pub fn delete_all(&self, storage_pointers: &[String]) -> Result<()> {
        self.runtime.block_on(self.inner.delete_all(storage_pointers))
    }

    /// Check whether an item exists at the pointer.
    pub fn exists(&self, storage_pointer: &str) -> Result<bool> {
        self.runtime.block_on(self.inner.exists(storage_pointer))
    }

    /// Check existence for many pointers at once.
    pub fn exists_all(&self, storage_pointers: &[String]) -> Result<HashMap<String, bool>> {
        self.runtime.block_on(self.inner.exists_all(storage_pointers))
    }

    /// Determine the kind of item at the pointer, if any.
    pub fn stored_item_type(&self, storage_pointer: &str) -> Result<Option<StoredItemType>> {
        self.runtime.block_on(self.inner.stored_item_type(storage_pointer))
    }

    /// Fetch metadata for the item at the pointer.
    pub fn information(&self, storage_pointer: &str) -> Result<StoredItemInformation> {
        self.runtime.block_on(self.inner.information(storage_pointer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryConfig, MemoryModule};
    use crate::model::{Payload, WriteMode};
    use crate::progress::SubscriptionRegistry;

    fn blocking_factory() -> BlockingStorageFactory {
        let modules = Arc::new(ModuleRegistry::new());
        modules.add_module::<MemoryModule>(MemoryConfig::default());
        let relay = Arc::new(ProgressRelay::new(Arc::new(SubscriptionRegistry::new())));
        BlockingStorageFactory::new(modules, relay).unwrap()
    }

    #[test]
    fn test_blocking_write_read_round_trip() {
        let provider = blocking_factory().provider().unwrap();
        let data = b"hello blocking".to_vec();

        let request = WriteRequest::new("f1", Payload::from_bytes(data.clone()), WriteMode::Create);
        provider.write(request).unwrap();

        assert!(provider.exists("f1").unwrap());
        assert_eq!(provider.read("f1").unwrap(), data);

        provider.delete("f1").unwrap();
        assert!(!provider.exists("f1").unwrap());
    }

    #[test]
    fn test_blocking_information() {
        let provider = blocking_factory().provider().unwrap();
        let request = WriteRequest::new(
            "dir/f2",
            Payload::from_bytes(vec![0u8; 64]),
            WriteMode::Create,
        );
        provider.write(request).unwrap();

        let info = provider.information("dir/f2").unwrap();
        assert_eq!(info.size, Some(64));
        assert_eq!(info.name, "f2");
    }
}
