//! Apollo Agent
//!
//! Connects to the Apollo control plane and serves shell sessions to its
//! operators until interrupted.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use apollo_agent::action::ActionRegistry;
use apollo_agent::auth::OAuthClient;
use apollo_agent::logging;
use apollo_agent::pty::{SessionManager, ShellSettings};
use apollo_agent::tunnel::{ClientSettings, ExponentialBackoff, ProtocolClient};
use apollo_agent::Middleware;
use apollo_core::config::{self, AgentConfig};
use apollo_core::error::ConfigError;
use apollo_core::net::host_from_url;

#[derive(Parser)]
#[command(name = "apollo-agent")]
#[command(about = "Apollo agent - serves local shell sessions to the Apollo control plane")]
#[command(version)]
struct Args {
    /// Control plane host, with optional port; a URL is accepted too
    /// Example: apollo.example.com:1970
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Agent id issued by the control plane
    #[arg(long)]
    agent_id: Option<String>,

    /// Agent secret issued by the control plane
    #[arg(long, env = "APOLLO_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Shell to start for every session
    #[arg(long)]
    shell: Option<String>,

    /// Seconds to wait before reconnecting after a lost connection
    #[arg(long)]
    reconnect_interval: Option<u64>,

    /// Connect with TLS (wss:// and https://)
    #[arg(long)]
    tls: bool,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,

    /// Verbose output, same as --log-level debug
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    let log_level = if args.verbose {
        "debug"
    } else {
        config.log_level.as_str()
    };
    logging::init(log_level);

    tracing::info!("Apollo Agent {} starting...", env!("CARGO_PKG_VERSION"));
    config.validate().context("Invalid configuration")?;

    let manager = SessionManager::create(
        ShellSettings::from(&config),
        ActionRegistry::from_config(&config.actions),
    )
    .with_context(|| format!("Cannot use shell '{}'", config.shell))?;

    let auth = OAuthClient::from_config(&config)?;
    let terminal = ProtocolClient::new(ClientSettings::from(&config));
    let backoff = ExponentialBackoff::from_config(&config.backoff);

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let middleware = Middleware::new(
        auth,
        terminal,
        manager,
        config.websocket_url(),
        backoff,
        shutdown,
    );

    tracing::info!("Connecting to {} as {}", config.websocket_url(), config.agent_id);
    middleware.start().await.context("Authentication failed")?;

    tracing::info!("Apollo Agent shutdown complete");
    Ok(())
}

/// Config file first, then command line overrides
fn load_config(args: &Args) -> Result<AgentConfig> {
    let mut config = match &args.config {
        Some(path) => config::load_config(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => match config::load_config(&config::default_config_path()) {
            Ok(config) => config,
            Err(ConfigError::NotFound(_)) => AgentConfig::default(),
            Err(e) => return Err(e).context("Failed to load default config"),
        },
    };

    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(agent_id) = &args.agent_id {
        config.agent_id = agent_id.clone();
    }
    if let Some(secret) = &args.secret {
        config.secret = secret.clone();
    }
    if let Some(shell) = &args.shell {
        config.shell = shell.clone();
    }
    if let Some(interval) = args.reconnect_interval {
        config.backoff.initial = Duration::from_secs(interval);
    }
    if args.tls {
        config.tls = true;
    }
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }

    config.host = host_from_url(&config.host);
    Ok(config)
}

/// Cancel `shutdown` on Ctrl+C or SIGTERM
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, shutting down...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, shutting down...");
            }
        }

        shutdown.cancel();
    });
}
