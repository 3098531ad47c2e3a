//! Configuration types and loading.
//!
//! The same options can arrive from a YAML file or from flags; flags win
//! for scalar fields and template declarations concatenate, file first.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Registry address used when none is configured.
pub const DEFAULT_REGISTRY_ADDR: &str = "127.0.0.1:8500";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Registry address as `host:port`.
    pub consul: Option<String>,

    /// Opaque credential passed through to the registry.
    pub token: Option<String>,

    /// Raw `min[:max]` wait window.
    pub wait: Option<String>,

    /// Templates to render, in declaration order.
    pub templates: Vec<ConfigTemplate>,
}

impl Config {
    /// Load a YAML config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .wrap_err_with(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Overlay `other` (typically flag values) on top of this config.
    /// Scalars from `other` win; template lists concatenate with this
    /// config's entries first.
    pub fn merge(&mut self, other: Config) {
        if other.consul.is_some() {
            self.consul = other.consul;
        }
        if other.token.is_some() {
            self.token = other.token;
        }
        if other.wait.is_some() {
            self.wait = other.wait;
        }
        self.templates.extend(other.templates);
    }

    pub fn registry_addr(&self) -> &str {
        self.consul.as_deref().unwrap_or(DEFAULT_REGISTRY_ADDR)
    }
}

/// One template declaration: where to read, where to write, what to run
/// after a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigTemplate {
    pub source: PathBuf,
    pub destination: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

/// Errors from parsing a `source:destination[:command]` declaration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseTemplateError {
    #[error("cannot specify empty template declaration")]
    Empty,

    #[error("invalid template declaration format, expected 'source:destination[:command]'")]
    Invalid,
}

impl ConfigTemplate {
    /// Parse a `source:destination[:command]` declaration. The command
    /// part may itself contain colons.
    pub fn parse(s: &str) -> Result<Self, ParseTemplateError> {
        if s.is_empty() {
            return Err(ParseTemplateError::Empty);
        }

        let mut parts = s.splitn(3, ':');
        let source = parts.next().unwrap_or_default();
        let destination = parts.next().unwrap_or_default();
        let command = parts.next().filter(|c| !c.is_empty()).map(str::to_string);

        if source.is_empty() || destination.is_empty() {
            return Err(ParseTemplateError::Invalid);
        }

        Ok(Self {
            source: source.into(),
            destination: destination.into(),
            command,
        })
    }
}

impl FromStr for ConfigTemplate {
    type Err = ParseTemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Render coalescing window: wait at least `min` after the latest
/// update, but never more than `max` after the first pending one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wait {
    pub min: Duration,
    pub max: Duration,
}

/// Errors from parsing a `min[:max]` wait window.
#[derive(Debug, Error)]
pub enum ParseWaitError {
    #[error("cannot specify empty wait interval")]
    Empty,

    #[error("invalid duration {0:?}")]
    Duration(String),

    #[error("wait interval max must be at least the min")]
    MaxBelowMin,
}

impl Wait {
    /// Parse `min[:max]`. When only `min` is given, `max` defaults to
    /// four times `min`.
    pub fn parse(s: &str) -> Result<Self, ParseWaitError> {
        if s.is_empty() {
            return Err(ParseWaitError::Empty);
        }

        let mut parts = s.splitn(2, ':');
        let min_raw = parts.next().unwrap_or_default();
        let min = humantime::parse_duration(min_raw).map_err(|_| ParseWaitError::Duration(min_raw.to_string()))?;

        let max = match parts.next() {
            Some(max_raw) => {
                humantime::parse_duration(max_raw).map_err(|_| ParseWaitError::Duration(max_raw.to_string()))?
            }
            None => min * 4,
        };

        if max < min {
            return Err(ParseWaitError::MaxBelowMin);
        }

        Ok(Self { min, max })
    }
}
