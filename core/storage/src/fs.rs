//! Local filesystem storage provider.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::debug;

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

/// Copy granularity for writes; one progress tick per chunk.
const WRITE_CHUNK_SIZE: usize = 4096;

/// Configuration for the filesystem backend.
#[derive(Debug, Clone)]
pub struct FsConfig {
    base_path: PathBuf,
    separator: char,
}

impl FsConfig {
    /// Configuration rooted at a base directory.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            separator: std::path::MAIN_SEPARATOR,
        }
    }

    /// Use a custom separator for interpreting pointers.
    pub fn with_separator(mut self, separator: char) -> Self {
        self.separator = separator;
        self
    }

    /// The base directory pointers are resolved against.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

impl ProviderConfiguration for FsConfig {
    fn directory_separator(&self) -> char {
        self.separator
    }
}

/// The filesystem module tag.
pub struct FsModule;

impl StorageModule for FsModule {
    type Config = FsConfig;

    fn name() -> &'static str {
        "filesystem"
    }

    fn provider(
        config: &Self::Config,
        _dependencies: &Dependencies,
        emitter: ProgressEmitter,
    ) -> Result<Arc<dyn AsyncStorageProvider>> {
        Ok(Arc::new(FsProvider::new(config.clone(), emitter)))
    }
}

/// Local filesystem storage provider rooted at a base path.
pub struct FsProvider {
    config: FsConfig,
    emitter: ProgressEmitter,
}

impl FsProvider {
    /// Create a provider over the configured base path.
    pub fn new(config: FsConfig, emitter: ProgressEmitter) -> Self {
        Self { config, emitter }
    }

    /// Resolve a storage pointer to a path under the base directory.
    ///
    /// Relative components are rejected; every resolved path stays under
    /// the configured base.
    fn resolve(&self, storage_pointer: &str) -> Result<PathBuf> {
        pointer::require_value(storage_pointer)?;
        let mut path = self.config.base_path.clone();
        for component in pointer::components(storage_pointer, self.config.separator) {
            if component == "." || component == ".." {
                return Err(Error::InvalidConfiguration(format!(
                    "storage pointer '{}' contains a relative path component",
                    storage_pointer
                )));
            }
            path.push(component);
        }
        Ok(path)
    }

    async fn metadata_of(path: &Path) -> Result<Option<std::fs::Metadata>> {
        match fs::metadata(path).await {
            Ok(meta) => Ok(Some(meta)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn item_type(meta: &std::fs::Metadata) -> StoredItemType {
        if meta.is_dir() {
            StoredItemType::Directory
        } else {
            StoredItemType::File
        }
    }
}

impl UseDirectorySeparator for FsProvider {
    fn directory_separator(&self) -> char {
        self.config.separator
    }
}

#[async_trait]
impl AsyncStorageReader for FsProvider {
    async fn read(&self, storage_pointer: &str) -> Result<ByteStream> {
        let path = self.resolve(storage_pointer)?;
        let meta = Self::metadata_of(&path)
            .await?
            .ok_or_else(|| Error::NotFound(storage_pointer.to_string()))?;
        if meta.is_dir() {
            return Err(Error::MustBeFile(storage_pointer.to_string()));
        }

        let file = fs::File::open(&path).await?;
        let stream = ReaderStream::new(file)
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(Error::from));
        Ok(Box::pin(stream) as ByteStream)
    }

    async fn exists(&self, storage_pointer: &str) -> Result<bool> {
        let path = self.resolve(storage_pointer)?;
        Ok(Self::metadata_of(&path).await?.is_some())
    }

    async fn exists_all(&self, storage_pointers: &[String]) -> Result<HashMap<String, bool>> {
        let mut result = HashMap::with_capacity(storage_pointers.len());
        for p in storage_pointers {
            let exists = self.exists(p).await?;
            result.insert(p.clone(), exists);
        }
        Ok(result)
    }

    async fn stored_item_type(&self, storage_pointer: &str) -> Result<Option<StoredItemType>> {
        let path = self.resolve(storage_pointer)?;
        Ok(Self::metadata_of(&path).await?.as_ref().map(Self::item_type))
    }

    async fn information(&self, storage_pointer: &str) -> Result<StoredItemInformation> {
        let path = self.resolve(storage_pointer)?;
        let meta = Self::metadata_of(&path)
            .await?
            .ok_or_else(|| Error::NotFound(storage_pointer.to_string()))?;

        let (directory_path, name) =
            pointer::split_name(storage_pointer, self.config.separator);
        let created_at: Option<DateTime<Utc>> = meta.created().ok().map(Into::into);
        let modified_at: Option<DateTime<Utc>> = meta.modified().ok().map(Into::into);

        Ok(StoredItemInformation {
            item_type: Self::item_type(&meta),
            directory_path,
            name,
            storage_pointer: storage_pointer.to_string(),
            size: meta.is_file().then(|| meta.len()),
            created_at,
            modified_at,
            properties: HashMap::new(),
        })
    }
}

#[async_trait]
impl AsyncStorageWriter for FsProvider {
    async fn write(&self, request: WriteRequest) -> Result<()> {
        let storage_pointer = request.storage_pointer().to_string();
        let path = self.resolve(&storage_pointer)?;
        let exists = Self::metadata_of(&path).await?.is_some();

        match (exists, request.mode()) {
            (true, WriteMode::Create) => {
                return Err(Error::AlreadyExists(storage_pointer));
            }
            (false, WriteMode::Replace) => {
                return Err(Error::NotFound(storage_pointer));
            }
            _ => {}
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let request_id = request.id();
        let requested_at = request.created_at();
        let (mut stream, total) = request.into_payload().into_parts();

        debug!(pointer = %storage_pointer, total, "writing file");
        let mut file = fs::File::create(&path).await?;
        let mut transferred: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for slice in chunk.chunks(WRITE_CHUNK_SIZE) {
                file.write_all(slice).await?;
                transferred += slice.len() as u64;
                self.emitter
                    .emit(request_id, &storage_pointer, transferred, total, requested_at);
            }
        }
        file.flush().await?;

        if total == 0 {
            self.emitter
                .emit(request_id, &storage_pointer, 0, 0, requested_at);
        }
        Ok(())
    }

    async fn delete(&self, storage_pointer: &str) -> Result<()> {
        let path = self.resolve(storage_pointer)?;
        match Self::metadata_of(&path).await? {
            Some(meta) if meta.is_dir() => Ok(fs::remove_dir_all(&path).await?),
            Some(_) => Ok(fs::remove_file(&path).await?),
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
impl AsyncStorageProvider for FsProvider {
    fn name(&self) -> &str {
        "filesystem"
    }
}
