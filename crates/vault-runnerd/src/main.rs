//! vault-runnerd - Main entry point.
//!
//! Starts the daemon that bridges a launcher to a password vault. On startup
//! it asks an already running instance to exit and takes over its socket.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};

use vault_runner_core::{
    default_socket_path, BackendKind, ClipboardSink, Config, MatchSettings, Matcher, Session,
    SocketProvider,
};
use vault_runnerd::{
    backend, prompt, take_over, Daemon, ManualSocketProvider, Runner, RunnerSettings,
    SystemClipboard, Takeover,
};

use tracing::{debug, error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Launcher bridge to Bitwarden, rbw and Secret Service vaults.
#[derive(Parser)]
#[command(name = "vault-runnerd")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file [default: ~/.config/vault-runner/config.toml]
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Path to Unix socket [default: $XDG_RUNTIME_DIR/vault-runner/socket]
    #[arg(short, long, value_name = "PATH")]
    socket: Option<PathBuf>,

    /// Backend to use, overriding the config file (bitwarden, rbw, secret-service)
    #[arg(short, long, value_name = "KIND")]
    backend: Option<BackendKind>,

    /// Increase log verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Only show errors
    #[arg(short, long)]
    quiet: bool,
}

fn setup_logging(level: &str) {
    // RUST_LOG wins over the CLI flags
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // JOURNAL_STREAM is set when stderr goes to the journal
    if std::env::var("JOURNAL_STREAM").is_ok() {
        if let Ok(journald_layer) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(journald_layer)
                .with(filter)
                .init();
            return;
        }
    }

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration from specified path");
            Config::load_from(path).context("Failed to load configuration")
        }
        None => {
            let config = Config::load().context("Failed to load configuration")?;
            if let Some(path) = Config::default_path() {
                if path.exists() {
                    info!(path = %path.display(), "Loaded configuration");
                } else {
                    debug!("No config file found, using defaults");
                }
            }
            Ok(config)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    setup_logging(log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting vault-runnerd");

    let mut config = load_config(cli.config.as_ref())?;
    if let Some(kind) = cli.backend {
        config.backend.kind = kind;
    }

    let vault = backend::from_config(&config);
    let unlock_prompt = prompt::from_config(&config).context("Failed to set up unlock prompt")?;
    let clipboard = SystemClipboard::spawn().context("Failed to start clipboard thread")?;
    info!(backend = vault.name(), "Backend selected");

    let session = Arc::new(Session::new(vault, unlock_prompt, config.unlock_timeout()));
    let runner = Runner::new(
        session,
        Matcher::new(MatchSettings::from(&config.matching)),
        ClipboardSink::new(Arc::new(clipboard), config.clear_after()),
        RunnerSettings::from(&config.runner),
    );

    let socket_path = cli.socket.unwrap_or_else(default_socket_path);
    match take_over(&socket_path, config.takeover_timeout())
        .await
        .context("Failed to take over socket")?
    {
        Takeover::Vacant => debug!("No previous instance"),
        Takeover::Replaced { pid } => info!(pid, "Replaced previous instance"),
    }

    let socket_provider = ManualSocketProvider::new(&socket_path);
    if let Some(path) = socket_provider.socket_path() {
        info!(path = %path.display(), "Socket path");
    }

    let daemon = Daemon::new(Arc::new(runner), socket_provider, config.sync_interval());

    info!("Daemon starting...");
    if let Err(e) = daemon.run().await {
        error!(error = %e, "Daemon error");
        return Err(e);
    }

    Ok(())
}
