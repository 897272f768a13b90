//! Common error types for Stowage.

use thiserror::Error;

/// Top-level error type for Stowage operations.
///
/// Providers catch their backend-specific faults at the boundary and
/// re-signal them as one of these kinds; raw backend error types never
/// cross the abstraction.
#[derive(Debug, Error)]
pub enum Error {
    /// The requested file or directory does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The file or directory already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The request must target a file, not a directory.
    #[error("Must be a file: {0}")]
    MustBeFile(String),

    /// The provider configuration is invalid or of the wrong kind.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The storage pointer cannot be empty or blank.
    #[error("Storage pointer must have a value")]
    MissingStoragePointer,

    /// No provider is registered for the requested module.
    #[error("Storage provider not registered: {0}")]
    ProviderNotRegistered(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An unclassified backend fault.
    #[error("Storage error: {0}")]
    Unknown(String),
}

impl Error {
    /// Stable short code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Unknown(_) => "SW-000",
            Error::NotFound(_) => "SW-001",
            Error::AlreadyExists(_) => "SW-002",
            Error::MustBeFile(_) => "SW-003",
            Error::MissingStoragePointer => "SW-004",
            Error::InvalidConfiguration(_) => "SW-005",
            Error::ProviderNotRegistered(_) => "SW-006",
            Error::Io(_) => "SW-007",
        }
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
