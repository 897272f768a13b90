//! Provider resolution API.
//!
//! The factory is the caller-facing surface: it resolves the configured
//! default provider, a specific module's provider, or a provider built
//! from a per-call configuration override, and narrows providers to
//! reader/writer capabilities. Every provider it hands out is already
//! wired to the shared progress relay.

use std::sync::Arc;
use tracing::debug;

use crate::blocking::BlockingStorageFactory;
use crate::progress::ProgressRelay;
use crate::provider::{AsyncStorageProvider, AsyncStorageReader, AsyncStorageWriter};
use crate::registry::{ModuleRegistry, StorageModule};
use stowage_common::{Error, Result};

/// Resolves storage providers from the module registry.
#[derive(Clone)]
pub struct StorageFactory {
    modules: Arc<ModuleRegistry>,
    relay: Arc<ProgressRelay>,
}

impl StorageFactory {
    /// Create a factory over a registry and the shared relay.
    pub fn new(modules: Arc<ModuleRegistry>, relay: Arc<ProgressRelay>) -> Self {
        Self { modules, relay }
    }

    /// Resolve the default module's provider.
    ///
    /// "Default" is the explicitly-set module when one was set, otherwise
    /// the most-recently-registered module.
    pub async fn provider(&self) -> Result<Arc<dyn AsyncStorageProvider>> {
        self.modules.build_default(&self.relay)
    }

    /// Resolve a specific module's provider with its stored default
    /// configuration.
    pub async fn provider_for<M: StorageModule>(&self) -> Result<Arc<dyn AsyncStorageProvider>> {
        self.modules.build_for::<M>(None, &self.relay)
    }

    /// Resolve a specific module's provider with a per-call configuration
    /// override. The stored default configuration is left untouched.
    pub async fn provider_with<M: StorageModule>(
        &self,
        configuration: M::Config,
    ) -> Result<Arc<dyn AsyncStorageProvider>> {
        self.modules.build_for::<M>(Some(&configuration), &self.relay)
    }

    /// Resolve the default provider narrowed to its read capability.
    pub async fn reader(&self) -> Result<Arc<dyn AsyncStorageReader>> {
        let provider: Arc<dyn AsyncStorageReader> = self.provider().await?;
        Ok(provider)
    }

    /// Resolve a module's provider narrowed to its read capability.
    pub async fn reader_for<M: StorageModule>(&self) -> Result<Arc<dyn AsyncStorageReader>> {
        let provider: Arc<dyn AsyncStorageReader> = self.provider_for::<M>().await?;
        Ok(provider)
    }

    /// Resolve with a configuration override, narrowed to reading.
    pub async fn reader_with<M: StorageModule>(
        &self,
        configuration: M::Config,
    ) -> Result<Arc<dyn AsyncStorageReader>> {
        let provider: Arc<dyn AsyncStorageReader> = self.provider_with::<M>(configuration).await?;
        Ok(provider)
    }

    /// Resolve the default provider narrowed to its write capability.
    pub async fn writer(&self) -> Result<Arc<dyn AsyncStorageWriter>> {
        let provider: Arc<dyn AsyncStorageWriter> = self.provider().await?;
        Ok(provider)
    }

    /// Resolve a module's provider narrowed to its write capability.
    pub async fn writer_for<M: StorageModule>(&self) -> Result<Arc<dyn AsyncStorageWriter>> {
        let provider: Arc<dyn AsyncStorageWriter> = self.provider_for::<M>().await?;
        Ok(provider)
    }

    /// Resolve with a configuration override, narrowed to writing.
    pub async fn writer_with<M: StorageModule>(
        &self,
        configuration: M::Config,
    ) -> Result<Arc<dyn AsyncStorageWriter>> {
        let provider: Arc<dyn AsyncStorageWriter> = self.provider_with::<M>(configuration).await?;
        Ok(provider)
    }

    /// Retarget the default module, optionally replacing its stored
    /// default configuration for future no-config resolutions.
    ///
    /// # Errors
    /// - `ProviderNotRegistered` when the module was never registered
    pub fn change_default_module<M: StorageModule>(
        &self,
        configuration: Option<M::Config>,
    ) -> Result<()> {
        if !self.modules.contains::<M>() {
            return Err(Error::ProviderNotRegistered(M::name().to_string()));
        }

        self.modules.set_default_module::<M>();
        debug!(module = M::name(), "default module changed");

        if let Some(configuration) = configuration {
            self.modules.set_default_config::<M>(configuration)?;
        }
        Ok(())
    }

    /// Blocking facade over this factory for non-async callers.
    ///
    /// The returned factory owns a dedicated current-thread runtime that
    /// drives the async providers; it must not be used from inside an
    /// async context.
    pub fn blocking(&self) -> Result<BlockingStorageFactory> {
        BlockingStorageFactory::new(Arc::clone(&self.modules), Arc::clone(&self.relay))
    }

    /// The registry this factory resolves from.
    pub fn modules(&self) -> &Arc<ModuleRegistry> {
        &self.modules
    }
}
