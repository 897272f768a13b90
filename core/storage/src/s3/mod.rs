//! S3-compatible object storage backend.
//!
//! The configuration carries bucket/region/endpoint details plus a tagged
//! credential source; the client is a thin SigV4-signed REST wrapper over
//! reqwest. Session-token negotiation (STS) is out of scope; callers with
//! temporary credentials pass them in as a static source.

pub mod client;
pub mod config;
pub mod provider;

pub use client::{ObjectHead, S3Client};
pub use config::{
    CredentialResolver, CredentialSource, Credentials, DefaultCredentialResolver, S3Config,
};
pub use provider::{S3Module, S3Provider};
