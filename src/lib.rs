//! consul-template - render file templates from registry state.
//!
//! A long-lived daemon: every configured template is scanned for the
//! registry queries it references, each distinct query gets a long-poll
//! view, and fresh values trigger atomic re-renders of the output files
//! plus optional post-render commands.
//!
//! # Modules
//!
//! - [`dependency`] - parsed registry queries with stable fingerprints
//! - [`registry`] - the client seam (HTTP and in-memory backends)
//! - [`brain`] - latest-value cache keyed by fingerprint
//! - [`template`] - double-pass template evaluation
//! - [`watcher`] - one long-poll task per watched dependency
//! - [`runner`] - the reactive scan loop, atomic writes, commands
//! - [`cli`] / [`config`] - flags, config file loading, exit codes

pub mod brain;
pub mod cli;
pub mod config;
pub mod dependency;
pub mod registry;
pub mod runner;
pub mod template;
pub mod watcher;

/// Current version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export commonly used types
pub use brain::{Brain, TemplateContext};
pub use config::{Config, ConfigTemplate, Wait};
pub use dependency::{Dependency, KeyDependency, KeyPrefixDependency, ServiceDependency};
pub use registry::{
    HttpRegistry, KeyPair, MemoryRegistry, QueryMeta, QueryOptions, RegistryClient, RegistryValue, ServiceRecord,
};
pub use runner::{Runner, RunnerCommand, ScanSummary};
pub use template::{RenderPolicy, RenderResult, Template};
pub use watcher::{WatchError, Watcher, WatcherConfig};
