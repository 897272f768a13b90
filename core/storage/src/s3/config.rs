//! Configuration and credential resolution for the S3 backend.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

use crate::provider::ProviderConfiguration;
use stowage_common::{Error, Result};

/// Configuration for the S3-compatible backend.
#[derive(Debug, Clone)]
pub struct S3Config {
    bucket: String,
    region: String,
    endpoint: Option<Url>,
    credentials: CredentialSource,
    separator: char,
}

impl S3Config {
    /// Configuration for a bucket in a region, using environment
    /// credentials by default.
    pub fn new(bucket: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: region.into(),
            endpoint: None,
            credentials: CredentialSource::Environment,
            separator: '/',
        }
    }

    /// Point at an S3-compatible endpoint (MinIO, LocalStack, ...) using
    /// path-style addressing instead of the AWS virtual-host form.
    pub fn with_endpoint(mut self, endpoint: Url) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Select the credential source.
    pub fn with_credentials(mut self, credentials: CredentialSource) -> Self {
        self.credentials = credentials;
        self
    }

    /// Use a custom separator for interpreting pointers.
    pub fn with_separator(mut self, separator: char) -> Self {
        self.separator = separator;
        self
    }

    /// Target bucket name.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Bucket region.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Endpoint override, when addressing a non-AWS service.
    pub fn endpoint(&self) -> Option<&Url> {
        self.endpoint.as_ref()
    }

    /// The configured credential source.
    pub fn credentials(&self) -> &CredentialSource {
        &self.credentials
    }
}

impl ProviderConfiguration for S3Config {
    fn directory_separator(&self) -> char {
        self.separator
    }
}

/// Where credentials come from.
///
/// A closed set: resolution matches exhaustively, so an unsupported
/// source is a compile error rather than a silent fallthrough.
#[derive(Debug, Clone)]
pub enum CredentialSource {
    /// `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` (and optionally
    /// `AWS_SESSION_TOKEN`) from the process environment.
    Environment,
    /// A fixed key pair, optionally with a pre-negotiated session token.
    Static {
        access_key: String,
        secret_key: String,
        session_token: Option<String>,
    },
    /// A named profile in the shared credentials file.
    Profile {
        name: String,
        /// Overrides the default `~/.aws/credentials` location.
        location: Option<PathBuf>,
    },
}

/// Resolved signing material.
#[derive(Clone)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"[REDACTED]")
            .field("session_token", &self.session_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Turns a credential source into signing material.
///
/// Registered as a module dependency so callers can substitute their own
/// resolution (e.g. an instance-metadata client) at registration time.
pub trait CredentialResolver: Send + Sync {
    fn resolve(&self, source: &CredentialSource) -> Result<Credentials>;
}

/// Default resolver: environment, static, and shared-profile sources.
pub struct DefaultCredentialResolver;

impl CredentialResolver for DefaultCredentialResolver {
    fn resolve(&self, source: &CredentialSource) -> Result<Credentials> {
        match source {
            CredentialSource::Environment => {
                let access_key = std::env::var("AWS_ACCESS_KEY_ID").map_err(|_| {
                    Error::InvalidConfiguration("AWS_ACCESS_KEY_ID is not set".to_string())
                })?;
                let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY").map_err(|_| {
                    Error::InvalidConfiguration("AWS_SECRET_ACCESS_KEY is not set".to_string())
                })?;
                Ok(Credentials {
                    access_key,
                    secret_key,
                    session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
                })
            }
            CredentialSource::Static {
                access_key,
                secret_key,
                session_token,
            } => Ok(Credentials {
                access_key: access_key.clone(),
                secret_key: secret_key.clone(),
                session_token: session_token.clone(),
            }),
            CredentialSource::Profile { name, location } => {
                let path = match location {
                    Some(path) => path.clone(),
                    None => dirs::home_dir()
                        .map(|home| home.join(".aws").join("credentials"))
                        .ok_or_else(|| {
                            Error::InvalidConfiguration(
                                "cannot locate the shared credentials file".to_string(),
                            )
                        })?,
                };
                let contents = std::fs::read_to_string(&path).map_err(|e| {
                    Error::InvalidConfiguration(format!(
                        "cannot read credentials file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                parse_profile(&contents, name).ok_or_else(|| {
                    Error::InvalidConfiguration(format!("profile '{}' not found or incomplete", name))
                })
            }
        }
    }
}

/// Extract one profile's key pair from an INI-style credentials file.
fn parse_profile(contents: &str, profile: &str) -> Option<Credentials> {
    let mut in_profile = false;
    let mut access_key = None;
    let mut secret_key = None;
    let mut session_token = None;

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            in_profile = section.trim() == profile;
            continue;
        }
        if !in_profile {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().to_string();
            match key.trim() {
                "aws_access_key_id" => access_key = Some(value),
                "aws_secret_access_key" => secret_key = Some(value),
                "aws_session_token" => session_token = Some(value),
                _ => {}
            }
        }
    }

    Some(Credentials {
        access_key: access_key?,
        secret_key: secret_key?,
        session_token,
    })
}

/// Shared handle to a credential resolver, as stored in the module
/// dependency bag.
pub type SharedCredentialResolver = Arc<dyn CredentialResolver>;
