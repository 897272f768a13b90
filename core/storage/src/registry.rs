//! Module registry: maps backend modules to construction recipes and
//! default configurations.
//!
//! A module is a named backend family (filesystem, S3, ...) bundling a
//! provider construction recipe, a default configuration, and any
//! auxiliary services the recipe needs. The registry is an explicit
//! object owned by the composition root; nothing here is process-global.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::debug;

use crate::progress::{ProgressEmitter, ProgressRelay, ProgressSource};
use crate::provider::{AsyncStorageProvider, ProviderConfiguration};
use stowage_common::{Error, Result};

/// A backend family that can be registered with the registry.
///
/// Modules are zero-sized type tags; all behavior lives in associated
/// functions so a module can be named purely through a type parameter.
pub trait StorageModule: Send + Sync + 'static {
    /// Configuration the module's providers are constructed from.
    type Config: ProviderConfiguration + Clone;

    /// Human-readable module name, also used as the provider name.
    fn name() -> &'static str;

    /// Auxiliary services contributed at registration time.
    ///
    /// Constructor-injected collaborators (credential resolvers and the
    /// like) go here so callers can swap them per registration.
    fn dependencies() -> Dependencies {
        Dependencies::new()
    }

    /// Construct a provider from a configuration.
    ///
    /// The emitter is already bound to the shared relay; the provider
    /// must raise all write progress through it.
    fn provider(
        config: &Self::Config,
        dependencies: &Dependencies,
        emitter: ProgressEmitter,
    ) -> Result<Arc<dyn AsyncStorageProvider>>;
}

/// Type-keyed bag of auxiliary services for a module's recipe.
#[derive(Default)]
pub struct Dependencies {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Dependencies {
    /// Create an empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a service, replacing any previous value of the same type.
    pub fn insert<T: Clone + Send + Sync + 'static>(&mut self, value: T) {
        self.map.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Insert a service, builder style.
    pub fn with<T: Clone + Send + Sync + 'static>(mut self, value: T) -> Self {
        self.insert(value);
        self
    }

    /// Fetch a clone of a service by type.
    pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref::<T>())
            .cloned()
    }
}

type BuildFn = Box<
    dyn Fn(&(dyn Any + Send + Sync), &Dependencies, ProgressEmitter) -> Result<Arc<dyn AsyncStorageProvider>>
        + Send
        + Sync,
>;

struct ModuleEntry {
    module: TypeId,
    name: &'static str,
    default_config: Box<dyn Any + Send + Sync>,
    dependencies: Dependencies,
    build: BuildFn,
}

/// Registry of module construction recipes and default configurations.
///
/// Entries are kept in registration order; module-agnostic resolution
/// falls back to the most-recently-registered module when no explicit
/// default has been set. Exactly one entry exists per module type.
#[derive(Default)]
pub struct ModuleRegistry {
    entries: RwLock<Vec<ModuleEntry>>,
    default_module: Mutex<Option<(TypeId, &'static str)>>,
}

impl ModuleRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module with its default configuration.
    ///
    /// Re-registering an already-known module replaces its default
    /// configuration and makes it the most recently registered, without
    /// duplicating its construction wiring.
    pub fn add_module<M: StorageModule>(&self, default_config: M::Config) {
        let module = TypeId::of::<M>();
        let mut entries = self.entries.write().unwrap();

        if let Some(pos) = entries.iter().position(|e| e.module == module) {
            let mut entry = entries.remove(pos);
            entry.default_config = Box::new(default_config);
            entries.push(entry);
            debug!(module = M::name(), "module re-registered, configuration replaced");
            return;
        }

        entries.push(ModuleEntry {
            module,
            name: M::name(),
            default_config: Box::new(default_config),
            dependencies: M::dependencies(),
            build: Box::new(|config, deps, emitter| {
                let config = config
                    .downcast_ref::<M::Config>()
                    .ok_or_else(|| {
                        Error::InvalidConfiguration(format!(
                            "configuration is not valid for module '{}'",
                            M::name()
                        ))
                    })?;
                M::provider(config, deps, emitter)
            }),
        });
        debug!(module = M::name(), "module registered");
    }

    /// Mark a module as the one module-agnostic resolution returns.
    ///
    /// Last call wins. Setting an unregistered module is accepted here
    /// and surfaces as `ProviderNotRegistered` at resolution time.
    pub fn set_default_module<M: StorageModule>(&self) {
        *self.default_module.lock().unwrap() = Some((TypeId::of::<M>(), M::name()));
    }

    /// Replace a registered module's stored default configuration.
    pub fn set_default_config<M: StorageModule>(&self, config: M::Config) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        let entry = entries
            .iter_mut()
            .find(|e| e.module == TypeId::of::<M>())
            .ok_or_else(|| Error::ProviderNotRegistered(M::name().to_string()))?;
        entry.default_config = Box::new(config);
        Ok(())
    }

    /// Whether a module is registered.
    pub fn contains<M: StorageModule>(&self) -> bool {
        self.entries
            .read()
            .unwrap()
            .iter()
            .any(|e| e.module == TypeId::of::<M>())
    }

    /// Names of registered modules, in registration order.
    pub fn module_names(&self) -> Vec<&'static str> {
        self.entries.read().unwrap().iter().map(|e| e.name).collect()
    }

    /// Build the default module's provider with its stored configuration.
    ///
    /// The default is the explicitly-set module when one was set,
    /// otherwise the most-recently-registered module.
    pub fn build_default(&self, relay: &Arc<ProgressRelay>) -> Result<Arc<dyn AsyncStorageProvider>> {
        let default = *self.default_module.lock().unwrap();
        let entries = self.entries.read().unwrap();

        let entry = match default {
            Some((module, name)) => entries
                .iter()
                .rev()
                .find(|e| e.module == module)
                .ok_or_else(|| Error::ProviderNotRegistered(name.to_string()))?,
            None => entries
                .last()
                .ok_or_else(|| Error::ProviderNotRegistered("no modules registered".to_string()))?,
        };

        Self::build_entry(entry, None, relay)
    }

    /// Build a specific module's provider, optionally overriding its
    /// stored default configuration for this call only.
    pub fn build_for<M: StorageModule>(
        &self,
        override_config: Option<&M::Config>,
        relay: &Arc<ProgressRelay>,
    ) -> Result<Arc<dyn AsyncStorageProvider>> {
        let entries = self.entries.read().unwrap();
        let entry = entries
            .iter()
            .rev()
            .find(|e| e.module == TypeId::of::<M>())
            .ok_or_else(|| Error::ProviderNotRegistered(M::name().to_string()))?;

        Self::build_entry(
            entry,
            override_config.map(|c| c as &(dyn Any + Send + Sync)),
            relay,
        )
    }

    fn build_entry(
        entry: &ModuleEntry,
        override_config: Option<&(dyn Any + Send + Sync)>,
        relay: &Arc<ProgressRelay>,
    ) -> Result<Arc<dyn AsyncStorageProvider>> {
        let emitter = ProgressEmitter::new(Arc::clone(relay), ProgressSource::new(entry.name));
        let config = override_config.unwrap_or(entry.default_config.as_ref());
        debug!(module = entry.name, "resolving storage provider");
        (entry.build)(config, &entry.dependencies, emitter)
    }
}
