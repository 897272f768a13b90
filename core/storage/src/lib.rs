//! Storage abstraction for Stowage.
//!
//! This crate provides a uniform interface over heterogeneous storage
//! backends (local filesystem, in-memory, S3-compatible object storage),
//! a write-progress subscription registry with a relay that fans events
//! out to global and per-request subscribers, and a module registry plus
//! factory for resolving configured providers at runtime.
//!
//! # Design Principles
//! - Provider isolation: backend-specific faults never cross the boundary
//! - Async operations: all I/O is async; a blocking facade drives a
//!   dedicated runtime for non-async callers
//! - Explicit composition: modules are registered on a builder, never in
//!   process-wide statics
//! - Uniform observability: every resolved provider emits write progress
//!   through the shared relay

pub mod blocking;
pub mod factory;
pub mod fs;
pub mod memory;
pub mod model;
pub mod progress;
pub mod provider;
pub mod registry;
pub mod s3;
pub mod stowage;

pub use blocking::{BlockingStorageFactory, BlockingStorageProvider};
pub use factory::StorageFactory;
pub use fs::{FsConfig, FsModule, FsProvider};
pub use memory::{MemoryConfig, MemoryModule, MemoryProvider};
pub use model::{
    ByteStream, Payload, RequestId, StoredItemInformation, StoredItemType, WriteMode,
    WriteProgress, WriteRequest,
};
pub use progress::{
    ProgressEmitter, ProgressEvent, ProgressHandler, ProgressRelay, ProgressSource,
    SubscriptionId, SubscriptionRegistry,
};
pub use provider::{
    AsyncStorageProvider, AsyncStorageReader, AsyncStorageWriter, ProviderConfiguration,
    UseDirectorySeparator,
};
pub use registry::{Dependencies, ModuleRegistry, StorageModule};
pub use stowage::{Stowage, StowageBuilder};
