//! Command line interface: flag definitions, exit codes, and the daemon
//! bootstrap.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::error::ErrorKind;
use clap::Parser;
use eyre::Result;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::config::{Config, ConfigTemplate, Wait};
use crate::registry::HttpRegistry;
use crate::runner::{Runner, RunnerCommand};

/// Exit codes surfaced to the operating system. Callers can check these
/// to determine the cause of a failure without parsing output.
pub const EXIT_OK: i32 = 0;
pub const EXIT_ERROR: i32 = 500;
pub const EXIT_PARSE_FLAGS_ERROR: i32 = 501;
pub const EXIT_PARSE_WAIT_ERROR: i32 = 502;
pub const EXIT_PARSE_CONFIG_ERROR: i32 = 503;

/// Watch templates on disk and re-render them when registry state
/// changes.
#[derive(Debug, Parser)]
#[command(
    name = "consul-template",
    about = "Renders file templates from service-registry and key/value state",
    disable_version_flag = true
)]
pub struct Cli {
    /// Address of the registry instance as host:port.
    #[arg(long, value_name = "ADDRESS")]
    pub consul: Option<String>,

    /// Registry API token.
    #[arg(long, value_name = "TOKEN")]
    pub token: Option<String>,

    /// Template declaration as 'source:destination[:command]'. May be
    /// given more than once.
    #[arg(long = "template", value_name = "TEMPLATE")]
    pub templates: Vec<ConfigTemplate>,

    /// Minimum(:maximum) time to wait before rendering and running
    /// commands, e.g. '2s' or '2s:10s'.
    #[arg(long, value_name = "WAIT")]
    pub wait: Option<String>,

    /// Path to a YAML configuration file. Flags override file values;
    /// template lists concatenate.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Render every template once and exit.
    #[arg(long)]
    pub once: bool,

    /// Write rendered templates to stdout instead of disk and run no
    /// commands.
    #[arg(long)]
    pub dry: bool,

    /// Print the version and exit.
    #[arg(long)]
    pub version: bool,

    /// Log filter, e.g. 'info' or 'consul_template=debug'.
    #[arg(long, default_value = "info", value_name = "FILTER")]
    pub log_level: String,
}

/// The process entry point, parameterized over its output streams so the
/// whole flow is testable against in-memory buffers.
pub struct App {
    out: Box<dyn Write + Send>,
    err: Box<dyn Write + Send>,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    pub fn new() -> Self {
        Self {
            out: Box::new(std::io::stdout()),
            err: Box::new(std::io::stderr()),
        }
    }

    pub fn with_streams(out: Box<dyn Write + Send>, err: Box<dyn Write + Send>) -> Self {
        Self { out, err }
    }

    /// Parse flags, build configuration, and run the daemon. Returns the
    /// process exit code.
    pub async fn run(&mut self, args: Vec<String>) -> i32 {
        let cli = match Cli::try_parse_from(&args) {
            Ok(cli) => cli,
            Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
                let _ = write!(self.out, "{}", e.render());
                return EXIT_OK;
            }
            Err(e) => {
                let _ = write!(self.err, "{}", e.render());
                return EXIT_PARSE_FLAGS_ERROR;
            }
        };

        if cli.version {
            let _ = writeln!(self.err, "consul-template v{}", crate::VERSION);
            return EXIT_OK;
        }

        init_logging(&cli.log_level);

        // Validate the wait window up front so a bad value gets its own
        // exit code.
        if let Some(raw) = &cli.wait {
            if let Err(e) = Wait::parse(raw) {
                let _ = writeln!(self.err, "{}", e);
                return EXIT_PARSE_WAIT_ERROR;
            }
        }

        let mut config = match &cli.config {
            Some(path) => match Config::from_file(path) {
                Ok(config) => config,
                Err(e) => {
                    let _ = writeln!(self.err, "{:#}", e);
                    return EXIT_PARSE_CONFIG_ERROR;
                }
            },
            None => Config::default(),
        };
        config.merge(Config {
            consul: cli.consul,
            token: cli.token,
            wait: cli.wait,
            templates: cli.templates,
        });

        if config.templates.is_empty() {
            let _ = writeln!(self.err, "at least one --template declaration is required");
            return EXIT_PARSE_FLAGS_ERROR;
        }

        match self.execute(config, cli.dry, cli.once).await {
            Ok(()) => EXIT_OK,
            Err(e) => {
                let _ = writeln!(self.err, "{:#}", e);
                EXIT_ERROR
            }
        }
    }

    async fn execute(&mut self, config: Config, dry: bool, once: bool) -> Result<()> {
        let client = HttpRegistry::new(config.registry_addr())?;
        let mut runner = Runner::new(config, Arc::new(client), dry, once)?;

        if dry {
            runner.set_out_stream(std::mem::replace(&mut self.out, Box::new(std::io::sink())));
        }

        let signal_task = tokio::spawn(forward_signals(runner.control()));
        let result = runner.start().await;
        signal_task.abort();
        result
    }
}

#[cfg(unix)]
async fn forward_signals(control: mpsc::Sender<RunnerCommand>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGHUP handler");
            return;
        }
    };
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = hangup.recv() => {
                info!("received SIGHUP; scheduling reload");
                if control.send(RunnerCommand::Reload).await.is_err() {
                    return;
                }
            }
            _ = terminate.recv() => {
                info!("received SIGTERM; stopping");
                let _ = control.send(RunnerCommand::Stop).await;
                return;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received interrupt; stopping");
                let _ = control.send(RunnerCommand::Stop).await;
                return;
            }
        }
    }
}

#[cfg(not(unix))]
async fn forward_signals(control: mpsc::Sender<RunnerCommand>) {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("received interrupt; stopping");
        let _ = control.send(RunnerCommand::Stop).await;
    }
}

fn init_logging(filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
