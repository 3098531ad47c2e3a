//! The registry client seam.
//!
//! Dependencies fetch through [`RegistryClient`], an opaque interface
//! over blocking queries: every call carries the index of the last
//! result seen, and the registry holds the request open until its index
//! advances past it or the wait time elapses.

mod http;
mod memory;

pub use http::HttpRegistry;
pub use memory::MemoryRegistry;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by registry queries.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("registry returned unexpected status {status} for {path}")]
    UnexpectedStatus { status: u16, path: String },

    #[error("could not decode registry response: {0}")]
    Decode(String),
}

/// Options attached to one blocking query. A fresh value is built for
/// every fetch; clients never mutate the caller's copy.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub datacenter: Option<String>,
    /// Index of the last result seen; 0 means return immediately.
    pub wait_index: u64,
    /// Long-poll horizon for the blocking query.
    pub wait_time: Duration,
    /// Opaque credential passed through to the registry.
    pub token: Option<String>,
}

/// Metadata returned alongside every query result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryMeta {
    /// Monotonic index that drives the next long poll.
    pub last_index: u64,
}

/// One service instance from the registry catalog.
///
/// Serializes with the field names templates address: `Node`, `Address`,
/// `ID`, `Name`, `Tags`, `Port`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceRecord {
    pub node: String,
    pub address: String,
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    pub tags: Vec<String>,
    pub port: u16,
}

/// One key/value pair under a watched prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeyPair {
    pub key: String,
    pub value: String,
}

/// A typed value produced by fetching one dependency.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryValue {
    Services(Vec<ServiceRecord>),
    Key(String),
    KeyPairs(Vec<KeyPair>),
}

/// Blocking-query access to the registry.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// List the instances of a service, optionally filtered by tag.
    async fn services(
        &self,
        name: &str,
        tag: Option<&str>,
        options: &QueryOptions,
    ) -> Result<(Vec<ServiceRecord>, QueryMeta), RegistryError>;

    /// Read a single key. Absent keys resolve to `None`.
    async fn key(&self, path: &str, options: &QueryOptions) -> Result<(Option<String>, QueryMeta), RegistryError>;

    /// List every pair under a prefix, ordered by key.
    async fn key_prefix(
        &self,
        prefix: &str,
        options: &QueryOptions,
    ) -> Result<(Vec<KeyPair>, QueryMeta), RegistryError>;
}
