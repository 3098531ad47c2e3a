//! Registry queries a template can depend on.
//!
//! A dependency is an immutable, value-typed description of one registry
//! query. Equality and identity are carried by the [`fingerprint`], a
//! variant-prefixed canonical string, so two structurally equal
//! dependencies always collide in the brain no matter where they were
//! parsed.
//!
//! [`fingerprint`]: Dependency::fingerprint

mod key;
mod key_prefix;
mod service;

pub use key::KeyDependency;
pub use key_prefix::KeyPrefixDependency;
pub use service::ServiceDependency;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::registry::{QueryMeta, QueryOptions, RegistryClient, RegistryError, RegistryValue};

/// Errors produced while parsing a dependency spec.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("cannot specify empty service dependency")]
    EmptyService,

    #[error("invalid service dependency format")]
    InvalidService,

    #[error("invalid port in service dependency: {0}")]
    InvalidPort(String),

    #[error("cannot specify empty key dependency")]
    EmptyKey,

    #[error("invalid key dependency format")]
    InvalidKey,

    #[error("invalid key prefix dependency format")]
    InvalidKeyPrefix,
}

/// One externally observable input of a template.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dependency {
    Service(ServiceDependency),
    Key(KeyDependency),
    KeyPrefix(KeyPrefixDependency),
}

impl Dependency {
    /// Stable identity of this query. The variant prefix keeps
    /// structurally different query kinds from ever colliding.
    pub fn fingerprint(&self) -> String {
        match self {
            Dependency::Service(d) => format!("Service|{}", d.raw()),
            Dependency::Key(d) => format!("Key|{}", d.raw()),
            Dependency::KeyPrefix(d) => format!("KeyPrefix|{}", d.raw()),
        }
    }

    /// Perform one blocking query against the registry.
    ///
    /// The dependency's datacenter is copied onto a fresh options value;
    /// the caller's options are never mutated.
    pub async fn fetch(
        &self,
        client: &Arc<dyn RegistryClient>,
        options: &QueryOptions,
    ) -> Result<(RegistryValue, QueryMeta), RegistryError> {
        debug!(dependency = %self, index = options.wait_index, "querying registry");

        match self {
            Dependency::Service(d) => {
                let options = d.query_options(options);
                let (mut records, meta) = client.services(&d.name, d.tag.as_deref(), &options).await?;
                if let Some(port) = d.port {
                    for record in &mut records {
                        record.port = port;
                    }
                }
                Ok((RegistryValue::Services(records), meta))
            }
            Dependency::Key(d) => {
                let options = d.query_options(options);
                let (value, meta) = client.key(&d.path, &options).await?;
                Ok((RegistryValue::Key(value.unwrap_or_default()), meta))
            }
            Dependency::KeyPrefix(d) => {
                let options = d.query_options(options);
                let (pairs, meta) = client.key_prefix(&d.prefix, &options).await?;
                Ok((RegistryValue::KeyPairs(pairs), meta))
            }
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dependency::Service(d) => write!(f, "service {:?}", d.raw()),
            Dependency::Key(d) => write!(f, "key {:?}", d.raw()),
            Dependency::KeyPrefix(d) => write!(f, "keyPrefix {:?}", d.raw()),
        }
    }
}
