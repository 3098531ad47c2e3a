//! In-memory registry with blocking-query semantics.
//!
//! Every mutation bumps a global index and wakes blocked queries, which
//! mirrors how the real registry's long polls behave. Used by the test
//! suite and handy for driving the runner without a live registry.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{KeyPair, QueryMeta, QueryOptions, RegistryClient, RegistryError, ServiceRecord};

#[derive(Default)]
struct State {
    index: u64,
    services: BTreeMap<String, Vec<ServiceRecord>>,
    kv: BTreeMap<String, String>,
}

/// Registry backed by in-process maps.
pub struct MemoryRegistry {
    state: Mutex<State>,
    changed: Notify,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                index: 1,
                ..State::default()
            }),
            changed: Notify::new(),
        }
    }

    /// Register or replace the instances of a service.
    pub fn set_service(&self, name: &str, records: Vec<ServiceRecord>) {
        {
            let mut state = self.state.lock().unwrap();
            state.index += 1;
            state.services.insert(name.to_string(), records);
        }
        self.changed.notify_waiters();
    }

    /// Set a key's value.
    pub fn set_key(&self, path: &str, value: &str) {
        {
            let mut state = self.state.lock().unwrap();
            state.index += 1;
            state.kv.insert(path.to_string(), value.to_string());
        }
        self.changed.notify_waiters();
    }

    /// Remove a key.
    pub fn delete_key(&self, path: &str) {
        {
            let mut state = self.state.lock().unwrap();
            state.index += 1;
            state.kv.remove(path);
        }
        self.changed.notify_waiters();
    }

    fn current_index(&self) -> u64 {
        self.state.lock().unwrap().index
    }

    /// Hold the query open until the index passes the caller's or the
    /// wait time elapses.
    async fn block_past(&self, options: &QueryOptions) {
        if options.wait_index == 0 {
            return;
        }

        let deadline = tokio::time::sleep(options.wait_time);
        tokio::pin!(deadline);

        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            // Register interest before checking so an update between the
            // check and the await cannot be missed.
            notified.as_mut().enable();

            if self.current_index() > options.wait_index {
                return;
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = &mut deadline => return,
            }
        }
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RegistryClient for MemoryRegistry {
    async fn services(
        &self,
        name: &str,
        tag: Option<&str>,
        options: &QueryOptions,
    ) -> Result<(Vec<ServiceRecord>, QueryMeta), RegistryError> {
        self.block_past(options).await;

        let state = self.state.lock().unwrap();
        let mut records = state.services.get(name).cloned().unwrap_or_default();
        if let Some(tag) = tag {
            records.retain(|r| r.tags.iter().any(|t| t == tag));
        }
        Ok((records, QueryMeta { last_index: state.index }))
    }

    async fn key(&self, path: &str, options: &QueryOptions) -> Result<(Option<String>, QueryMeta), RegistryError> {
        self.block_past(options).await;

        let state = self.state.lock().unwrap();
        Ok((state.kv.get(path).cloned(), QueryMeta { last_index: state.index }))
    }

    async fn key_prefix(
        &self,
        prefix: &str,
        options: &QueryOptions,
    ) -> Result<(Vec<KeyPair>, QueryMeta), RegistryError> {
        self.block_past(options).await;

        let state = self.state.lock().unwrap();
        let pairs = state
            .kv
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| KeyPair {
                key: key.clone(),
                value: value.clone(),
            })
            .collect();
        Ok((pairs, QueryMeta { last_index: state.index }))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_mutations_bump_index() {
        let registry = MemoryRegistry::new();
        let options = QueryOptions::default();

        let (_, first) = registry.key("a", &options).await.unwrap();
        registry.set_key("a", "1");
        let (value, second) = registry.key("a", &options).await.unwrap();

        assert!(second.last_index > first.last_index);
        assert_eq!(value.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_blocking_query_wakes_on_change() {
        let registry = std::sync::Arc::new(MemoryRegistry::new());
        let seen = registry.current_index();

        let waiter = {
            let registry = std::sync::Arc::clone(&registry);
            tokio::spawn(async move {
                let options = QueryOptions {
                    wait_index: seen,
                    wait_time: Duration::from_secs(5),
                    ..QueryOptions::default()
                };
                registry.key("wake", &options).await.unwrap()
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.set_key("wake", "up");

        let (value, meta) = waiter.await.unwrap();
        assert_eq!(value.as_deref(), Some("up"));
        assert!(meta.last_index > seen);
    }

    #[tokio::test]
    async fn test_blocking_query_times_out_unchanged() {
        let registry = MemoryRegistry::new();
        let seen = registry.current_index();

        let options = QueryOptions {
            wait_index: seen,
            wait_time: Duration::from_millis(20),
            ..QueryOptions::default()
        };
        let (_, meta) = registry.key("quiet", &options).await.unwrap();
        assert_eq!(meta.last_index, seen);
    }

    #[tokio::test]
    async fn test_key_prefix_is_ordered() {
        let registry = MemoryRegistry::new();
        registry.set_key("config/b", "2");
        registry.set_key("config/a", "1");
        registry.set_key("other/c", "3");

        let (pairs, _) = registry.key_prefix("config/", &QueryOptions::default()).await.unwrap();
        let keys: Vec<&str> = pairs.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["config/a", "config/b"]);
    }

    #[tokio::test]
    async fn test_services_filters_by_tag() {
        let registry = MemoryRegistry::new();
        registry.set_service(
            "web",
            vec![
                ServiceRecord {
                    name: "web".into(),
                    tags: vec!["release".into()],
                    ..ServiceRecord::default()
                },
                ServiceRecord {
                    name: "web".into(),
                    tags: vec!["staging".into()],
                    ..ServiceRecord::default()
                },
            ],
        );

        let (records, _) = registry
            .services("web", Some("release"), &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tags, vec!["release".to_string()]);
    }
}
