//! Long-poll views over registry dependencies.
//!
//! The watcher keeps exactly one background task per distinct dependency
//! fingerprint. Each task repeats the dependency's blocking query and
//! multiplexes every fresh value onto a single data channel consumed by
//! the runner. Values from one view arrive in registry order; nothing is
//! guaranteed across views.

mod config;

pub use config::WatcherConfig;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::dependency::Dependency;
use crate::registry::{QueryOptions, RegistryClient, RegistryError, RegistryValue};

/// A fetch failure surfaced on the error channel. Never fatal; the view
/// that produced it keeps retrying with backoff.
#[derive(Debug)]
pub struct WatchError {
    pub dependency: Dependency,
    pub error: RegistryError,
}

/// Runtime state for one watched dependency.
struct View {
    dependency: Dependency,
    seq: u64,
    handle: JoinHandle<()>,
}

/// Owner of every active view.
pub struct Watcher {
    client: Arc<dyn RegistryClient>,
    config: WatcherConfig,
    token: Option<String>,
    views: HashMap<String, View>,
    next_seq: u64,
    data_tx: mpsc::Sender<(Dependency, RegistryValue)>,
    err_tx: mpsc::Sender<WatchError>,
}

impl Watcher {
    /// Create a watcher plus the receivers for its data and error
    /// channels. A single receiver of each is expected.
    #[allow(clippy::type_complexity)]
    pub fn new(
        client: Arc<dyn RegistryClient>,
        token: Option<String>,
        config: WatcherConfig,
    ) -> (
        Self,
        mpsc::Receiver<(Dependency, RegistryValue)>,
        mpsc::Receiver<WatchError>,
    ) {
        let (data_tx, data_rx) = mpsc::channel(config.data_buffer);
        let (err_tx, err_rx) = mpsc::channel(config.error_buffer);
        let watcher = Self {
            client,
            config,
            token,
            views: HashMap::new(),
            next_seq: 0,
            data_tx,
            err_tx,
        };
        (watcher, data_rx, err_rx)
    }

    /// Start watching a dependency. Idempotent: returns false when a
    /// view for this fingerprint already exists.
    pub fn add(&mut self, dependency: Dependency) -> bool {
        let fingerprint = dependency.fingerprint();
        if self.views.contains_key(&fingerprint) {
            return false;
        }

        self.next_seq += 1;
        let seq = self.next_seq;
        debug!(dependency = %dependency, seq, "starting view");

        let handle = tokio::spawn(poll_dependency(
            dependency.clone(),
            Arc::clone(&self.client),
            self.token.clone(),
            self.config.clone(),
            self.data_tx.clone(),
            self.err_tx.clone(),
        ));
        self.views.insert(fingerprint, View { dependency, seq, handle });
        true
    }

    /// Stop watching a dependency. Returns false when it was not
    /// watched.
    pub fn remove(&mut self, dependency: &Dependency) -> bool {
        match self.views.remove(&dependency.fingerprint()) {
            Some(view) => {
                debug!(dependency = %view.dependency, seq = view.seq, "stopping view");
                view.handle.abort();
                true
            }
            None => false,
        }
    }

    /// True when a view exists for this dependency's fingerprint.
    pub fn watching(&self, dependency: &Dependency) -> bool {
        self.views.contains_key(&dependency.fingerprint())
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// Cancel every view. Safe to call more than once.
    pub fn stop(&mut self) {
        for (_, view) in self.views.drain() {
            view.handle.abort();
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One view's long-poll cycle: blocking query, publish on index advance,
/// exponential backoff on errors.
async fn poll_dependency(
    dependency: Dependency,
    client: Arc<dyn RegistryClient>,
    token: Option<String>,
    config: WatcherConfig,
    data_tx: mpsc::Sender<(Dependency, RegistryValue)>,
    err_tx: mpsc::Sender<WatchError>,
) {
    let mut last_index: u64 = 0;
    let mut retry = config.retry_initial;

    loop {
        let options = QueryOptions {
            datacenter: None,
            wait_index: last_index,
            wait_time: config.wait_time,
            token: token.clone(),
        };

        match dependency.fetch(&client, &options).await {
            Ok((value, meta)) => {
                retry = config.retry_initial;
                if meta.last_index > last_index {
                    last_index = meta.last_index;
                    debug!(dependency = %dependency, index = last_index, "view received data");
                    if data_tx.send((dependency.clone(), value)).await.is_err() {
                        // Receiver gone; the watcher is shutting down.
                        return;
                    }
                } else {
                    debug!(dependency = %dependency, index = meta.last_index, "long poll returned unchanged");
                }
            }
            Err(error) => {
                warn!(dependency = %dependency, error = %error, retry = ?retry, "fetch failed");
                let _ = err_tx.try_send(WatchError {
                    dependency: dependency.clone(),
                    error,
                });
                tokio::time::sleep(retry).await;
                retry = (retry * 2).min(config.retry_max);
            }
        }
    }
}
