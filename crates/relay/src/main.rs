//! tmux-relay
//!
//! Serves a tmux session to WebSocket clients.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use relay::config::{default_config_path, Config};
use relay::{RelayEngine, RelaySettings, SessionStore, TmuxStore, WebSocketServer};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// tmux-relay - mirror a tmux session to remote clients.
#[derive(Parser, Debug)]
#[command(name = "tmux-relay")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the relay server
    Start {
        /// Listen host (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Listen port (overrides config)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// List tmux sessions
    Sessions {
        /// Print as a JSON array
        #[arg(long)]
        json: bool,
    },

    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = Config::load(&config_path)?;

    init_tracing(cli.verbose, &config.startup_log_level());
    if cli.config.is_some() {
        tracing::info!("Using config file: {:?}", config_path);
    }
    config.apply_env_overrides();

    match cli.command {
        Commands::Start { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            config.validate()?;
            run_server(config).await?;
        }
        Commands::Sessions { json } => {
            config.validate()?;
            print_sessions(&config, json).await?;
        }
        Commands::InitConfig { force } => {
            init_config(&config_path, force)?;
        }
    }

    Ok(())
}

/// Installs the log subscriber.
///
/// `--verbose` wins over `RUST_LOG`, which wins over the configured level.
fn init_tracing(verbose: bool, log_level: &str) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Runs the relay until SIGINT or SIGTERM.
async fn run_server(config: Config) -> anyhow::Result<()> {
    let store = TmuxStore::new(config.session.tmux_binary.clone());
    match store.check_available().await {
        Ok((path, version)) => {
            tracing::info!(path = %path.display(), version = %version, "Found tmux");
        }
        Err(e) => {
            tracing::error!(error = %e, "tmux is not available, refusing to start");
            std::process::exit(1);
        }
    }

    let (engine, engine_task) = RelayEngine::new(store, RelaySettings::from(&config)).spawn();
    let server = WebSocketServer::bind(&config.listen_addr(), engine.clone()).await?;

    let shutdown = CancellationToken::new();
    let server_task = tokio::spawn(server.serve(shutdown.clone()));
    tracing::info!("tmux-relay started on {}", config.listen_addr());

    wait_for_shutdown_signal().await?;
    tracing::info!("Received shutdown signal");

    if let Err(e) = engine.shutdown().await {
        tracing::warn!(error = %e, "Engine already stopped");
    }
    shutdown.cancel();

    server_task.await.context("Server task failed")??;
    engine_task.await.context("Engine task failed")?;

    tracing::info!("tmux-relay stopped");
    Ok(())
}

/// Prints the sessions tmux knows about.
async fn print_sessions(config: &Config, json: bool) -> anyhow::Result<()> {
    let store = TmuxStore::new(config.session.tmux_binary.clone());
    let sessions = store
        .list()
        .await
        .context("Failed to list tmux sessions")?;

    if json {
        println!("{}", serde_json::to_string(&sessions)?);
    } else if sessions.is_empty() {
        println!("No sessions");
    } else {
        for session in sessions {
            println!("{}", session);
        }
    }

    Ok(())
}

/// Writes the default configuration to `path`.
fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {} (use --force to overwrite)",
            path.display()
        );
    }

    Config::default().save(path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }

    Ok(())
}
