//! Application composition root.
//!
//! [`Stowage`] owns the subscription registry, the relay, the module
//! registry, and the factory. It is constructed once per application
//! through the builder; there are no process-wide statics, so tests and
//! tenants never share registration state by accident.

use std::sync::Arc;

use crate::factory::StorageFactory;
use crate::progress::{ProgressRelay, SubscriptionRegistry};
use crate::registry::{ModuleRegistry, StorageModule};

/// A configured storage stack: registry, relay, and factory.
pub struct Stowage {
    subscriptions: Arc<SubscriptionRegistry>,
    relay: Arc<ProgressRelay>,
    modules: Arc<ModuleRegistry>,
    factory: StorageFactory,
}

impl Stowage {
    /// Start configuring a storage stack.
    pub fn builder() -> StowageBuilder {
        StowageBuilder {
            modules: ModuleRegistry::new(),
        }
    }

    /// The provider resolution surface.
    pub fn factory(&self) -> &StorageFactory {
        &self.factory
    }

    /// The write-progress subscription registry.
    pub fn subscriptions(&self) -> &Arc<SubscriptionRegistry> {
        &self.subscriptions
    }

    /// The relay providers emit through.
    pub fn relay(&self) -> &Arc<ProgressRelay> {
        &self.relay
    }

    /// The module registry.
    pub fn modules(&self) -> &Arc<ModuleRegistry> {
        &self.modules
    }
}

/// Builder for [`Stowage`].
pub struct StowageBuilder {
    modules: ModuleRegistry,
}

impl StowageBuilder {
    /// Register a module with its default configuration.
    pub fn module<M: StorageModule>(self, default_config: M::Config) -> Self {
        self.modules.add_module::<M>(default_config);
        self
    }

    /// Mark a module as the default for module-agnostic resolution.
    pub fn default_module<M: StorageModule>(self) -> Self {
        self.modules.set_default_module::<M>();
        self
    }

    /// Finish configuration.
    pub fn build(self) -> Stowage {
        let subscriptions = Arc::new(SubscriptionRegistry::new());
        let relay = Arc::new(ProgressRelay::new(Arc::clone(&subscriptions)));
        let modules = Arc::new(self.modules);
        let factory = StorageFactory::new(Arc::clone(&modules), Arc::clone(&relay));

        Stowage {
            subscriptions,
            relay,
            modules,
            factory,
        }
    }
}
