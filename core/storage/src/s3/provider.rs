//! Storage provider over the S3 client.

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;

use crate::model::{
    ByteStream, StoredItemInformation, StoredItemType, WriteMode, WriteRequest,
};
use crate::progress::ProgressEmitter;
use crate::provider::{
    AsyncStorageProvider, AsyncStorageReader, AsyncStorageWriter, ProviderConfiguration,
    UseDirectorySeparator,
};
use crate::registry::{Dependencies, StorageModule};
use crate::s3::client::S3Client;
use crate::s3::config::{DefaultCredentialResolver, S3Config, SharedCredentialResolver};
use stowage_common::{pointer, Error, Result};

/// Upper bound on buffer preallocation from the declared payload size.
/// The declared size is caller input and must not drive allocation alone.
const PREALLOC_LIMIT: u64 = 1 << 20;

/// The S3 module tag.
pub struct S3Module;

impl StorageModule for S3Module {
    type Config = S3Config;

    fn name() -> &'static str {
        "s3"
    }

    fn dependencies() -> Dependencies {
        let resolver: SharedCredentialResolver = Arc::new(DefaultCredentialResolver);
        Dependencies::new().with(resolver)
    }

    fn provider(
        config: &Self::Config,
        dependencies: &Dependencies,
        emitter: ProgressEmitter,
    ) -> Result<Arc<dyn AsyncStorageProvider>> {
        let resolver = dependencies
            .get::<SharedCredentialResolver>()
            .unwrap_or_else(|| Arc::new(DefaultCredentialResolver));
        let credentials = resolver.resolve(config.credentials())?;
        let client = S3Client::new(config, credentials)?;
        Ok(Arc::new(S3Provider::new(config.clone(), client, emitter)))
    }
}

/// Storage provider backed by one S3 bucket.
///
/// Objects are keyed by normalized pointer; directories exist implicitly
/// as key prefixes, mirroring S3's flat namespace.
pub struct S3Provider {
    config: S3Config,
    client: S3Client,
    emitter: ProgressEmitter,
}

impl S3Provider {
    pub fn new(config: S3Config, client: S3Client, emitter: ProgressEmitter) -> Self {
        Self {
            config,
            client,
            emitter,
        }
    }

    fn key(&self, storage_pointer: &str) -> Result<String> {
        pointer::require_value(storage_pointer)?;
        let sep = self.config.directory_separator();
        Ok(pointer::components(storage_pointer, sep).join(&sep.to_string()))
    }

    async fn item_type_of(&self, key: &str) -> Result<Option<StoredItemType>> {
        if self.client.head_object(key).await?.is_some() {
            return Ok(Some(StoredItemType::File));
        }
        let prefix = format!("{}{}", key, self.config.directory_separator());
        if self.client.any_with_prefix(&prefix).await? {
            return Ok(Some(StoredItemType::Directory));
        }
        Ok(None)
    }
}

impl UseDirectorySeparator for S3Provider {
    fn directory_separator(&self) -> char {
        self.config.directory_separator()
    }
}

#[async_trait]
impl AsyncStorageReader for S3Provider {
    async fn read(&self, storage_pointer: &str) -> Result<ByteStream> {
        let key = self.key(storage_pointer)?;
        match self.client.get_object(&key).await {
            Ok(response) => {
                let stream = response.bytes_stream().map(|chunk| {
                    chunk
                        .map(|b| b.to_vec())
                        .map_err(|e| Error::Unknown(format!("S3 body stream failed: {}", e)))
                });
                Ok(Box::pin(stream) as ByteStream)
            }
            Err(Error::NotFound(_)) => match self.item_type_of(&key).await? {
                Some(StoredItemType::Directory) => {
                    Err(Error::MustBeFile(storage_pointer.to_string()))
                }
                _ => Err(Error::NotFound(storage_pointer.to_string())),
            },
            Err(e) => Err(e),
        }
    }

    async fn exists(&self, storage_pointer: &str) -> Result<bool> {
        let key = self.key(storage_pointer)?;
        Ok(self.item_type_of(&key).await?.is_some())
    }

    async fn exists_all(&self, storage_pointers: &[String]) -> Result<HashMap<String, bool>> {
        let mut result = HashMap::with_capacity(storage_pointers.len());
        for p in storage_pointers {
            let key = self.key(p)?;
            result.insert(p.clone(), self.item_type_of(&key).await?.is_some());
        }
        Ok(result)
    }

    async fn stored_item_type(&self, storage_pointer: &str) -> Result<Option<StoredItemType>> {
        let key = self.key(storage_pointer)?;
        self.item_type_of(&key).await
    }

    async fn information(&self, storage_pointer: &str) -> Result<StoredItemInformation> {
        let key = self.key(storage_pointer)?;
        let (directory_path, name) = pointer::split_name(&key, self.config.directory_separator());

        if let Some(head) = self.client.head_object(&key).await? {
            let mut properties = HashMap::new();
            if let Some(etag) = &head.etag {
                properties.insert("etag".to_string(), serde_json::Value::String(etag.clone()));
            }
            return Ok(StoredItemInformation {
                item_type: StoredItemType::File,
                directory_path,
                name,
                storage_pointer: key,
                size: Some(head.size),
                created_at: None,
                modified_at: head.modified_at,
                properties,
            });
        }

        let prefix = format!("{}{}", key, self.config.directory_separator());
        if self.client.any_with_prefix(&prefix).await? {
            return Ok(StoredItemInformation {
                item_type: StoredItemType::Directory,
                directory_path,
                name,
                storage_pointer: key,
                size: None,
                created_at: None,
                modified_at: None,
                properties: HashMap::new(),
            });
        }

        Err(Error::NotFound(storage_pointer.to_string()))
    }
}

#[async_trait]
impl AsyncStorageWriter for S3Provider {
    async fn write(&self, request: WriteRequest) -> Result<()> {
        let key = self.key(request.storage_pointer())?;
        let existing = self.item_type_of(&key).await?;

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

        // PutObject takes the whole body, so the payload is buffered;
        // progress still ticks per incoming chunk.
        let mut body = Vec::with_capacity(total.min(PREALLOC_LIMIT) as usize);
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk?);
            self.emitter
                .emit(request_id, &key, body.len() as u64, total, requested_at);
        }
        if total == 0 {
            self.emitter.emit(request_id, &key, 0, 0, requested_at);
        }

        self.client.put_object(&key, body).await
    }

    async fn delete(&self, storage_pointer: &str) -> Result<()> {
        let key = self.key(storage_pointer)?;
        match self.item_type_of(&key).await? {
            Some(StoredItemType::File) => self.client.delete_object(&key).await,
            Some(StoredItemType::Directory) => {
                let prefix = format!("{}{}", key, self.config.directory_separator());
                for object_key in self.client.list_keys(&prefix).await? {
                    self.client.delete_object(&object_key).await?;
                }
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
impl AsyncStorageProvider for S3Provider {
    fn name(&self) -> &str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{ProgressRelay, ProgressSource, SubscriptionRegistry};
    use crate::registry::ModuleRegistry;
    use crate::s3::config::CredentialSource;

    fn config() -> S3Config {
        S3Config::new("bucket", "us-east-1").with_credentials(CredentialSource::Static {
            access_key: "AKID".to_string(),
            secret_key: "secret".to_string(),
            session_token: None,
        })
    }

    fn provider() -> S3Provider {
        let relay = Arc::new(ProgressRelay::new(Arc::new(SubscriptionRegistry::new())));
        let emitter = ProgressEmitter::new(relay, ProgressSource::new("s3"));
        let credentials = crate::s3::config::Credentials {
            access_key: "AKID".to_string(),
            secret_key: "secret".to_string(),
            session_token: None,
        };
        let client = S3Client::new(&config(), credentials).unwrap();
        S3Provider::new(config(), client, emitter)
    }

    #[test]
    fn test_key_normalization() {
        let provider = provider();
        assert_eq!(provider.key("/dir//file.txt").unwrap(), "dir/file.txt");
        assert!(matches!(
            provider.key("  "),
            Err(Error::MissingStoragePointer)
        ));
    }

    #[test]
    fn test_module_resolution_builds_provider() {
        let registry = ModuleRegistry::new();
        registry.add_module::<S3Module>(config());

        let relay = Arc::new(ProgressRelay::new(Arc::new(SubscriptionRegistry::new())));
        let provider = registry.build_default(&relay).unwrap();
        assert_eq!(provider.name(), "s3");
        assert_eq!(provider.directory_separator(), '/');
    }
}
