//! termgate broker daemon
//!
//! Serves terminal sessions to local clients over the channel protocol and
//! exposes an optional admin listener for operators.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tg_broker::server::{AdminServer, ChannelServer};
use tg_broker::{DefaultPolicy, TerminalBroker};
use tg_core::config::{self, BrokerConfig};
use tg_core::Environment;

#[derive(Parser)]
#[command(name = "tg-broker")]
#[command(about = "termgate terminal session broker")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Channel bind address (overrides config)
    #[arg(short, long)]
    bind: Option<String>,

    /// Admin bind address (overrides config)
    #[arg(long)]
    admin: Option<String>,

    /// Deployment environment (overrides config)
    #[arg(long, env = "TERMGATE_ENV")]
    environment: Option<Environment>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Write the effective configuration to the config path and exit
    #[arg(long)]
    write_config: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("termgate broker starting...");

    // Load configuration
    let mut config: BrokerConfig = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_config_path();
        if default_path.exists() {
            config::load_config(&default_path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                BrokerConfig::default()
            })
        } else {
            tracing::info!("Using default configuration");
            BrokerConfig::default()
        }
    };

    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }
    if let Some(admin) = args.admin {
        config.server.admin_address = Some(admin);
    }
    if let Some(environment) = args.environment {
        config.environment = environment;
    }
    config.validate().context("Invalid configuration")?;

    if args.write_config {
        let path = args.config.unwrap_or_else(config::default_config_path);
        config::save_config(&path, &config)
            .with_context(|| format!("Failed to write config to {:?}", path))?;
        tracing::info!("Wrote configuration to {:?}", path);
        return Ok(());
    }

    tracing::info!(
        "Environment: {}, max sessions: {:?}, rate limit: {:?} per {:?}",
        config.environment,
        config.max_sessions,
        config.rate_limit,
        config.rate_limit_period
    );
    if config.environment.is_production() && config.require_explicit_authorization {
        tracing::warn!(
            "No authorization policy is installed; every subscription will be rejected"
        );
    }

    let bind_addr = config.server.bind_address.clone();
    let admin_addr = config.server.admin_address.clone();
    let broker = Arc::new(TerminalBroker::new(config, Arc::new(DefaultPolicy)));

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Setup signal handlers
    let cancel_clone = cancel.clone();
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
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel_clone.cancel();
    });

    if let Some(admin_addr) = admin_addr {
        let admin = AdminServer::new(admin_addr, Arc::clone(&broker))
            .with_shutdown_token(cancel.clone());
        tokio::spawn(async move {
            if let Err(e) = admin.run().await {
                tracing::error!("Admin server failed: {:#}", e);
            }
        });
    }

    let server =
        ChannelServer::new(bind_addr, Arc::clone(&broker)).with_shutdown_token(cancel.clone());
    let result = server.run().await;

    // Stop every process before exiting, whatever ended the server
    let closed = broker.force_disconnect_all().await;
    tracing::info!("Closed {} session(s)", closed);

    result?;
    tracing::info!("Broker shutdown complete");
    Ok(())
}
