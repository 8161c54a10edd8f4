//! acserv - SSL-VPN gateway front end
//!
//! Terminates TLS for AnyConnect-compatible clients, serves the login and
//! auth exchange and answers the tunnel CONNECT handshake.

use acserv_config::GatewayConfig;
use acserv_server::{GatewayContext, ListenerManager};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// acserv - SSL-VPN gateway front end
#[derive(Parser, Debug)]
#[command(name = "acserv")]
#[command(about = "SSL-VPN gateway front end for AnyConnect-compatible clients")]
#[command(version = env!("GIT_TAG"))]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
struct Cli {
    /// Path to the gateway configuration file
    #[arg(short, long, env = "ACSERV_CONFIG", default_value = "acserv.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load the configuration and certificates, report problems and exit
    CheckConfig,

    /// Print a configuration template to stdout
    Template,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Fails only if a provider is already installed
    let _ =
        rustls::crypto::CryptoProvider::install_default(rustls::crypto::ring::default_provider());

    match cli.command {
        Some(Commands::Template) => {
            print!("{}", GatewayConfig::template());
            Ok(())
        }
        Some(Commands::CheckConfig) => {
            init_logging(&cli.log_level, None)?;
            let config = load_config(&cli.config)?;
            GatewayContext::from_config(&config).context("Failed to load certificates")?;
            info!("Configuration {} is valid", cli.config.display());
            Ok(())
        }
        None => {
            let config = load_config(&cli.config)?;
            init_logging(&cli.log_level, config.log_file.as_deref())?;
            run(config).await
        }
    }
}

fn load_config(path: &Path) -> Result<GatewayConfig> {
    GatewayConfig::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

async fn run(config: GatewayConfig) -> Result<()> {
    info!("acserv {} starting...", env!("GIT_TAG"));
    log_backends(&config);

    let context = GatewayContext::from_config(&config).context("Failed to build gateway")?;
    let manager = Arc::new(
        ListenerManager::bind(context)
            .await
            .context("Failed to open listeners")?,
    );

    let serving = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.start().await })
    };

    shutdown_signal().await;

    manager.shutdown().await;
    manager.wait_stopped().await;
    if let Err(e) = serving.await {
        error!("Listener task failed: {}", e);
    }

    info!("acserv stopped");
    Ok(())
}

fn log_backends(config: &GatewayConfig) {
    for (name, backend) in &config.auth {
        info!(
            "Auth backend '{}': {} at {}",
            name,
            backend.kind(),
            backend.server()
        );
    }
    for (name, backend) in &config.accounting {
        info!(
            "Accounting backend '{}': {} at {}",
            name,
            backend.kind(),
            backend.server()
        );
    }

    match config.default_auth {
        Some(ref name) => info!("Default auth backend: {}", name),
        None => warn!("No auth backend selected, using the built-in placeholder check"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

/// Log to stderr, or append to `log_file` when one is configured
fn init_logging(log_level: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(log_level))?;

    let (stderr_layer, file_layer) = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let layer = fmt::layer().with_ansi(false).with_writer(Mutex::new(file));
            (None, Some(layer))
        }
        None => (Some(fmt::layer().with_writer(std::io::stderr)), None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Ok(())
}
