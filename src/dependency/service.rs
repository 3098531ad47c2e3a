//! Service catalog dependencies.

use once_cell::sync::Lazy;
use regex::Regex;

use super::ParseError;
use crate::registry::QueryOptions;

static SERVICE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\A(?:(?P<tag>[[:word:]\-.]+)\.)?(?P<name>[[:word:]\-/_]+)(?:@(?P<datacenter>[[:word:]\-.]+))?(?::(?P<port>[0-9]+))?\z",
    )
    .unwrap()
});

/// A dependency on the instances of one service, parsed from
/// `[tag.]name[@datacenter[:port]]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceDependency {
    raw: String,
    pub name: String,
    pub tag: Option<String>,
    pub datacenter: Option<String>,
    /// When set, overrides the port reported for every fetched instance.
    pub port: Option<u16>,
}

impl ServiceDependency {
    /// Parse a service spec. The whole input must match; whitespace is
    /// not trimmed.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        if s.is_empty() {
            return Err(ParseError::EmptyService);
        }

        let caps = SERVICE_RE.captures(s).ok_or(ParseError::InvalidService)?;
        let name = caps
            .name("name")
            .map(|m| m.as_str().to_string())
            .ok_or(ParseError::InvalidService)?;
        let port = match caps.name("port") {
            Some(m) => Some(
                m.as_str()
                    .parse()
                    .map_err(|_| ParseError::InvalidPort(m.as_str().to_string()))?,
            ),
            None => None,
        };

        Ok(Self {
            raw: s.to_string(),
            name,
            tag: caps.name("tag").map(|m| m.as_str().to_string()),
            datacenter: caps.name("datacenter").map(|m| m.as_str().to_string()),
            port,
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
