//! Key-prefix dependencies against the key/value store.

use once_cell::sync::Lazy;
use regex::Regex;

use super::ParseError;
use crate::registry::QueryOptions;

static KEY_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\A(?P<prefix>[[:word:].:\-/]+)?(?:@(?P<datacenter>[[:word:]\-.]+))?\z").unwrap());

/// A dependency on every pair under a key prefix, parsed from
/// `prefix[@datacenter]`. The empty prefix is legal and matches the
/// whole store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct KeyPrefixDependency {
    raw: String,
    pub prefix: String,
    pub datacenter: Option<String>,
}

impl KeyPrefixDependency {
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        if s.is_empty() {
            return Ok(Self::default());
        }

        let caps = KEY_PREFIX_RE.captures(s).ok_or(ParseError::InvalidKeyPrefix)?;

        Ok(Self {
            raw: s.to_string(),
            prefix: caps.name("prefix").map(|m| m.as_str().to_string()).unwrap_or_default(),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_is_legal() {
        let kpd = KeyPrefixDependency::parse("").unwrap();
        assert_eq!(kpd, KeyPrefixDependency::default());
    }

    #[test]
    fn test_parse_prefix() {
        let kpd = KeyPrefixDependency::parse("config/redis").unwrap();
        assert_eq!(kpd.raw(), "config/redis");
        assert_eq!(kpd.prefix, "config/redis");
        assert_eq!(kpd.datacenter, None);
    }

    #[test]
    fn test_parse_prefix_datacenter() {
        let kpd = KeyPrefixDependency::parse("config/redis@nyc1").unwrap();
        assert_eq!(kpd.prefix, "config/redis");
        assert_eq!(kpd.datacenter.as_deref(), Some("nyc1"));
    }

    #[test]
    fn test_parse_datacenter_only() {
        let kpd = KeyPrefixDependency::parse("@nyc1").unwrap();
        assert_eq!(kpd.prefix, "");
        assert_eq!(kpd.datacenter.as_deref(), Some("nyc1"));
    }
}
