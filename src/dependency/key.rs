//! Single-key dependencies against the key/value store.

use once_cell::sync::Lazy;
use regex::Regex;

use super::ParseError;
use crate::registry::QueryOptions;

static KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\A(?P<key>[[:word:].:\-/]+)(?:@(?P<datacenter>[[:word:]\-.]+))?\z").unwrap());

/// A dependency on one key's value, parsed from `path[@datacenter]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyDependency {
    raw: String,
    pub path: String,
    pub datacenter: Option<String>,
}

impl KeyDependency {
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        if s.is_empty() {
            return Err(ParseError::EmptyKey);
        }

        let caps = KEY_RE.captures(s).ok_or(ParseError::InvalidKey)?;
        let path = caps
            .name("key")
            .map(|m| m.as_str().to_string())
            .ok_or(ParseError::InvalidKey)?;

        Ok(Self {
            raw: s.to_string(),
            path,
            datacenter: caps.name("datacenter").map(|m| m.as_str().to_string()),
        })
    }

    /// The spec exactly as it was written in the template.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub(crate) fn query_options(&self, base: &QueryOptions) -> QueryOptions {
        let mut options = base.clone();
        if let Some(dc) = &self.datacenter {
            options.datacenter = Some(dc.clone());
        }
        options
    }
}
