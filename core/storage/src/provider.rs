//! Storage provider trait definitions.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::model::{ByteStream, StoredItemInformation, StoredItemType, WriteRequest};
use stowage_common::Result;

/// Backend-specific provider configuration.
///
/// Every configuration exposes the directory separator its pointers are
/// interpreted against.
pub trait ProviderConfiguration: Send + Sync + 'static {
    /// Separator character between pointer components.
    fn directory_separator(&self) -> char;
}

/// Anything that interprets storage pointers against a separator character.
pub trait UseDirectorySeparator {
    /// Separator character between pointer components.
    fn directory_separator(&self) -> char;
}

/// Read-side capability of a storage provider.
///
/// Cancellation follows the tokio convention: dropping the returned future
/// abandons the operation.
#[async_trait]
pub trait AsyncStorageReader: UseDirectorySeparator + Send + Sync {
    /// Stream the content of a stored file.
    ///
    /// # Errors
    /// - `NotFound` when the pointer resolves to nothing
    /// - `MustBeFile` when it resolves to a directory
    async fn read(&self, storage_pointer: &str) -> Result<ByteStream>;

    /// Check whether an item exists at the pointer.
    async fn exists(&self, storage_pointer: &str) -> Result<bool>;

    /// Check existence for many pointers at once.
    ///
    /// Returns a map of pointer to existence.
    async fn exists_all(&self, storage_pointers: &[String]) -> Result<HashMap<String, bool>>;

    /// Determine the kind of item at the pointer, if any.
    async fn stored_item_type(&self, storage_pointer: &str) -> Result<Option<StoredItemType>>;

    /// Fetch metadata for the item at the pointer.
    ///
    /// # Errors
    /// - `NotFound` when the pointer resolves to nothing
    async fn information(&self, storage_pointer: &str) -> Result<StoredItemInformation>;
}

/// Write-side capability of a storage provider.
#[async_trait]
pub trait AsyncStorageWriter: UseDirectorySeparator + Send + Sync {
    /// Perform a write, emitting progress ticks at chunk boundaries.
    ///
    /// # Errors
    /// - `AlreadyExists` when mode is `Create` and the target exists
    /// - `NotFound` when mode is `Replace` and the target is absent
    async fn write(&self, request: WriteRequest) -> Result<()>;

    /// Delete the item at the pointer.
    ///
    /// # Errors
    /// - `NotFound` when the pointer resolves to nothing
    async fn delete(&self, storage_pointer: &str) -> Result<()>;

    /// Delete many items, skipping pointers that resolve to nothing.
    async fn delete_all(&self, storage_pointers: &[String]) -> Result<()>;
}

/// A full storage provider: reader plus writer.
#[async_trait]
pub trait AsyncStorageProvider: AsyncStorageReader + AsyncStorageWriter {
    /// Provider name (e.g. "filesystem", "s3", "memory").
    fn name(&self) -> &str;
}
