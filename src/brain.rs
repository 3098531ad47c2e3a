//! Latest-value cache for satisfied dependencies.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::dependency::Dependency;
use crate::registry::{KeyPair, RegistryValue, ServiceRecord};

/// Immutable snapshot of the brain handed to render passes. Each map is
/// keyed by dependency fingerprint.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    pub services: HashMap<String, Vec<ServiceRecord>>,
    pub keys: HashMap<String, String>,
    pub key_prefixes: HashMap<String, Vec<KeyPair>>,
}

/// In-memory cache of the latest value seen for every fingerprint.
///
/// Values live in one typed partition per dependency variant plus a
/// received-set recording which fingerprints have ever been satisfied.
/// The runner is the sole owner; exclusive access comes from the borrow
/// checker rather than a lock.
#[derive(Debug, Default)]
pub struct Brain {
    services: HashMap<String, Vec<ServiceRecord>>,
    keys: HashMap<String, String>,
    key_prefixes: HashMap<String, Vec<KeyPair>>,
    received: HashSet<String>,
}

impl Brain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the latest value for a dependency, overwriting any previous
    /// one. Values never merge.
    pub fn remember(&mut self, dependency: &Dependency, value: RegistryValue) {
        let fingerprint = dependency.fingerprint();
        match (dependency, value) {
            (Dependency::Service(_), RegistryValue::Services(records)) => {
                self.services.insert(fingerprint.clone(), records);
            }
            (Dependency::Key(_), RegistryValue::Key(value)) => {
                self.keys.insert(fingerprint.clone(), value);
            }
            (Dependency::KeyPrefix(_), RegistryValue::KeyPairs(pairs)) => {
                self.key_prefixes.insert(fingerprint.clone(), pairs);
            }
            (dependency, value) => {
                warn!(dependency = %dependency, ?value, "mismatched value type; not storing");
                return;
            }
        }
        self.received.insert(fingerprint);
    }

    /// Latest value for a dependency, or `None` if it was never received
    /// or has been forgotten.
    pub fn recall(&self, dependency: &Dependency) -> Option<RegistryValue> {
        let fingerprint = dependency.fingerprint();
        if !self.received.contains(&fingerprint) {
            return None;
        }
        match dependency {
            Dependency::Service(_) => self.services.get(&fingerprint).cloned().map(RegistryValue::Services),
            Dependency::Key(_) => self.keys.get(&fingerprint).cloned().map(RegistryValue::Key),
            Dependency::KeyPrefix(_) => self.key_prefixes.get(&fingerprint).cloned().map(RegistryValue::KeyPairs),
        }
    }

    /// Drop a dependency from its partition and the received set.
    pub fn forget(&mut self, dependency: &Dependency) {
        let fingerprint = dependency.fingerprint();
        self.services.remove(&fingerprint);
        self.keys.remove(&fingerprint);
        self.key_prefixes.remove(&fingerprint);
        self.received.remove(&fingerprint);
    }

    /// True when a value for this dependency has been received and not
    /// forgotten.
    pub fn remembered(&self, dependency: &Dependency) -> bool {
        self.received.contains(&dependency.fingerprint())
    }

    /// Clone the current contents into a context for rendering.
    pub fn snapshot(&self) -> TemplateContext {
        TemplateContext {
            services: self.services.clone(),
            keys: self.keys.clone(),
            key_prefixes: self.key_prefixes.clone(),
        }
    }
}
