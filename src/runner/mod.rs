//! The reactive render loop.
//!
//! The runner ties templates, watcher, and brain together. A scan pass
//! discovers what every template needs, renders whatever is fully
//! satisfied, writes changed outputs atomically, reconciles watcher
//! membership against what the templates actually referenced, and runs
//! any configured commands. Between passes the event loop blocks on
//! watcher updates and control messages.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use eyre::{eyre, Context as _, Result};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::brain::Brain;
use crate::config::{Config, ConfigTemplate, Wait};
use crate::dependency::Dependency;
use crate::registry::{RegistryClient, RegistryValue};
use crate::template::{RenderPolicy, Template};
use crate::watcher::{WatchError, Watcher, WatcherConfig};

/// External control messages for a running runner. The CLI wires SIGHUP
/// to `Reload` and SIGINT/SIGTERM to `Stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerCommand {
    /// Re-validate templates from the configuration and run a scan pass.
    Reload,
    /// Stop the watcher and return from the event loop.
    Stop,
}

/// Outcome of one scan pass.
#[derive(Debug, Default)]
pub struct ScanSummary {
    /// True when every template had all of its dependencies satisfied.
    pub complete: bool,
    /// Destinations whose contents changed on disk this pass.
    pub rendered: Vec<PathBuf>,
}

/// How long once mode waits for every template to complete before
/// giving up.
const ONCE_TIMEOUT: Duration = Duration::from_secs(30);

/// Orchestrates templates, watcher, and brain.
pub struct Runner {
    config: Config,
    dry: bool,
    once: bool,
    /// One entry per unique source path.
    templates: Vec<Template>,
    /// Fan-out from source path to every declaration sharing it.
    ctemplates: HashMap<PathBuf, Vec<ConfigTemplate>>,
    /// Dependencies currently watched, keyed by fingerprint.
    dependencies: HashMap<String, Dependency>,
    brain: Brain,
    watcher: Watcher,
    data_rx: mpsc::Receiver<(Dependency, RegistryValue)>,
    err_rx: mpsc::Receiver<WatchError>,
    control_tx: mpsc::Sender<RunnerCommand>,
    control_rx: mpsc::Receiver<RunnerCommand>,
    wait: Option<Wait>,
    once_timeout: Duration,
    out_stream: Box<dyn Write + Send>,
}

impl Runner {
    /// Build a runner: parse and validate every source template, build
    /// the fan-out map, and prepare the watcher.
    pub fn new(config: Config, client: Arc<dyn RegistryClient>, dry: bool, once: bool) -> Result<Self> {
        let wait = match &config.wait {
            Some(raw) => Some(Wait::parse(raw).map_err(|e| eyre!("invalid wait {:?}: {}", raw, e))?),
            None => None,
        };

        let (templates, ctemplates) = load_templates(&config.templates)?;
        let (watcher, data_rx, err_rx) = Watcher::new(client, config.token.clone(), WatcherConfig::default());
        let (control_tx, control_rx) = mpsc::channel(4);

        Ok(Self {
            config,
            dry,
            once,
            templates,
            ctemplates,
            dependencies: HashMap::new(),
            brain: Brain::new(),
            watcher,
            data_rx,
            err_rx,
            control_tx,
            control_rx,
            wait,
            once_timeout: ONCE_TIMEOUT,
            out_stream: Box::new(std::io::stdout()),
        })
    }

    /// Sender for reload/stop control messages.
    pub fn control(&self) -> mpsc::Sender<RunnerCommand> {
        self.control_tx.clone()
    }

    /// Redirect dry-run output (stdout by default).
    pub fn set_out_stream(&mut self, out: Box<dyn Write + Send>) {
        self.out_stream = out;
    }

    pub fn set_once_timeout(&mut self, timeout: Duration) {
        self.once_timeout = timeout;
    }

    /// Store a fresh value for a dependency.
    pub fn receive(&mut self, dependency: &Dependency, value: RegistryValue) {
        self.brain.remember(dependency, value);
    }

    /// One scan pass over every template.
    pub async fn run(&mut self) -> Result<ScanSummary> {
        debug!(templates = self.templates.len(), "starting scan pass");

        let context = Arc::new(self.brain.snapshot());
        let templates = self.templates.clone();
        let mut current: HashMap<String, Dependency> = HashMap::new();
        let mut rendered_sources: HashSet<PathBuf> = HashSet::new();
        let mut summary = ScanSummary {
            complete: true,
            rendered: Vec::new(),
        };

        for template in &templates {
            for dependency in template.dependencies()? {
                current.entry(dependency.fingerprint()).or_insert(dependency);
            }

            let result = template.render(&context, RenderPolicy::Lenient)?;
            if !result.missing.is_empty() {
                debug!(
                    source = %template.source().display(),
                    missing = result.missing.len(),
                    "template is missing data; skipping render"
                );
                summary.complete = false;
                continue;
            }

            let configs = self.ctemplates.get(template.source()).cloned().unwrap_or_default();
            for ct in &configs {
                if contents_match(&ct.destination, &result.output) {
                    debug!(destination = %ct.destination.display(), "contents unchanged");
                    continue;
                }

                if self.dry {
                    writeln!(self.out_stream, "> {}", ct.destination.display())?;
                    self.out_stream.write_all(&result.output)?;
                    self.out_stream.write_all(b"\n")?;
                } else {
                    match atomic_write(&ct.destination, &result.output) {
                        Ok(()) => {
                            info!(destination = %ct.destination.display(), "rendered template");
                            rendered_sources.insert(ct.source.clone());
                            summary.rendered.push(ct.destination.clone());
                        }
                        Err(err) => {
                            // Left for the next scan pass to retry.
                            error!(destination = %ct.destination.display(), error = %err, "failed to write");
                        }
                    }
                }
            }
        }

        self.reconcile(current);

        if !self.dry {
            self.run_commands(&rendered_sources).await;
        }

        Ok(summary)
    }

    /// Run the reactive loop until stopped.
    ///
    /// In once mode, returns after the first pass in which every
    /// template rendered completely, or errors when the once timeout
    /// elapses first.
    pub async fn start(&mut self) -> Result<()> {
        info!(once = self.once, dry = self.dry, "runner starting");

        if self.once {
            return self.run_once().await;
        }

        self.run().await?;

        // A pending coalesced scan: the instant the first update arrived
        // and the deadline to scan at.
        let mut pending: Option<(Instant, Instant)> = None;

        loop {
            let scan_at = pending
                .map(|(_, deadline)| deadline)
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                maybe = self.data_rx.recv() => {
                    let Some((dependency, value)) = maybe else {
                        return Err(eyre!("watcher data channel closed"));
                    };
                    if !self.dependencies.contains_key(&dependency.fingerprint()) {
                        // A view cancelled mid-flight can still deliver one
                        // last value.
                        debug!(dependency = %dependency, "discarding value for unwatched dependency");
                        continue;
                    }

                    debug!(dependency = %dependency, "received data");
                    self.brain.remember(&dependency, value);

                    match self.wait {
                        Some(wait) => {
                            let now = Instant::now();
                            let first = pending.map(|(first, _)| first).unwrap_or(now);
                            let deadline = (now + wait.min).min(first + wait.max);
                            pending = Some((first, deadline));
                        }
                        None => {
                            self.run().await?;
                        }
                    }
                }

                Some(watch_error) = self.err_rx.recv() => {
                    error!(
                        dependency = %watch_error.dependency,
                        error = %watch_error.error,
                        "watch error"
                    );
                }

                maybe = self.control_rx.recv() => {
                    match maybe {
                        Some(RunnerCommand::Reload) => {
                            info!("reloading templates");
                            match self.reload() {
                                Ok(()) => {
                                    self.run().await?;
                                }
                                Err(err) => {
                                    error!(error = %err, "reload failed; keeping previous templates");
                                }
                            }
                        }
                        Some(RunnerCommand::Stop) | None => break,
                    }
                }

                _ = tokio::time::sleep_until(scan_at), if pending.is_some() => {
                    pending = None;
                    self.run().await?;
                }
            }
        }

        info!("runner stopping");
        self.watcher.stop();
        // Drain in-flight values so cancelled views cannot leave stale
        // data behind.
        while self.data_rx.try_recv().is_ok() {}
        Ok(())
    }

    async fn run_once(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.once_timeout;
        let mut summary = self.run().await?;

        while !summary.complete {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or_else(|| eyre!("once mode timed out with incomplete templates"))?;

            match tokio::time::timeout(remaining, self.data_rx.recv()).await {
                Ok(Some((dependency, value))) => {
                    if self.dependencies.contains_key(&dependency.fingerprint()) {
                        self.brain.remember(&dependency, value);
                    }
                    summary = self.run().await?;
                }
                Ok(None) => return Err(eyre!("watcher data channel closed")),
                Err(_) => return Err(eyre!("once mode timed out with incomplete templates")),
            }
        }

        self.watcher.stop();
        info!("runner finished");
        Ok(())
    }

    /// Re-validate every template from the current configuration. The
    /// brain is retained so values received so far are not lost.
    pub fn reload(&mut self) -> Result<()> {
        let (templates, ctemplates) = load_templates(&self.config.templates)?;
        self.templates = templates;
        self.ctemplates = ctemplates;
        Ok(())
    }

    /// Align watcher membership and brain contents with the dependencies
    /// referenced this pass.
    fn reconcile(&mut self, current: HashMap<String, Dependency>) {
        for (fingerprint, dependency) in &current {
            if !self.dependencies.contains_key(fingerprint) {
                self.watcher.add(dependency.clone());
            }
        }

        let stale: Vec<Dependency> = self
            .dependencies
            .values()
            .filter(|d| !current.contains_key(&d.fingerprint()))
            .cloned()
            .collect();
        for dependency in stale {
            debug!(dependency = %dependency, "dependency no longer referenced");
            self.watcher.remove(&dependency);
            self.brain.forget(&dependency);
        }

        self.dependencies = current;
    }

    /// Run each configured command for the sources that produced new
    /// output. A given command string runs at most once per pass.
    async fn run_commands(&mut self, rendered_sources: &HashSet<PathBuf>) {
        let mut ran: HashSet<String> = HashSet::new();

        for source in rendered_sources {
            let Some(configs) = self.ctemplates.get(source) else {
                continue;
            };
            for ct in configs {
                let Some(command) = &ct.command else {
                    continue;
                };
                if !ran.insert(command.clone()) {
                    continue;
                }

                info!(command = %command, "running command");
                match tokio::process::Command::new("sh").arg("-c").arg(command).status().await {
                    Ok(status) if status.success() => {
                        debug!(command = %command, "command finished");
                    }
                    Ok(status) => {
                        warn!(command = %command, code = ?status.code(), "command exited nonzero");
                    }
                    Err(err) => {
                        error!(command = %command, error = %err, "failed to run command");
                    }
                }
            }
        }
    }
}

/// Parse every declared template once, deduplicating by source path.
fn load_templates(configs: &[ConfigTemplate]) -> Result<(Vec<Template>, HashMap<PathBuf, Vec<ConfigTemplate>>)> {
    let mut templates = Vec::new();
    let mut ctemplates: HashMap<PathBuf, Vec<ConfigTemplate>> = HashMap::new();

    for ct in configs {
        if !ctemplates.contains_key(&ct.source) {
            templates.push(Template::new(ct.source.clone())?);
        }
        ctemplates.entry(ct.source.clone()).or_default().push(ct.clone());
    }

    Ok((templates, ctemplates))
}

/// Compare rendered bytes against what is on disk. A missing destination
/// never matches.
fn contents_match(destination: &Path, contents: &[u8]) -> bool {
    match std::fs::read(destination) {
        Ok(existing) => existing == contents,
        Err(_) => false,
    }
}

/// Write `contents` to `destination` so readers observe either the old
/// file or the new one, never a partial write: temp file in the same
/// directory, write, fsync, rename.
fn atomic_write(destination: &Path, contents: &[u8]) -> Result<()> {
    let parent = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if !parent.exists() {
        create_dirs(parent)?;
    }

    let mut file = tempfile::NamedTempFile::new_in(parent)
        .wrap_err_with(|| format!("failed to create temp file in {}", parent.display()))?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let permissions = match std::fs::metadata(destination) {
            Ok(meta) => meta.permissions(),
            Err(_) => std::fs::Permissions::from_mode(0o644),
        };
        file.as_file().set_permissions(permissions)?;
    }

    file.persist(destination)
        .map_err(|e| e.error)
        .wrap_err_with(|| format!("failed to rename temp file over {}", destination.display()))?;
    Ok(())
}

#[cfg(unix)]
fn create_dirs(path: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(path)
        .wrap_err_with(|| format!("failed to create directory {}", path.display()))?;
    Ok(())
}

#[cfg(not(unix))]
fn create_dirs(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).wrap_err_with(|| format!("failed to create directory {}", path.display()))?;
    Ok(())
}
