//! parley-directory: directory service.
//!
//! Public registry of parley chat gateways. Gateways register and
//! heartbeat; clients browse the listing to pick a server.

mod config;
mod http;
mod store;
mod sweep;

use clap::Parser;
use config::DirectoryConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use store::ServerStore;
use tracing::{error, info};

/// parley-directory — chat server directory
#[derive(Parser, Debug)]
#[command(name = "parley-directory", version, about = "Chat server directory")]
struct Cli {
    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Probe gateway /health endpoints during sweeps
    #[arg(long)]
    probe_health: bool,

    /// Config file path
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let config = match DirectoryConfig::load(cli.config.as_deref(), cli.port, cli.probe_health) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.port,
        probe_health = config.probe_health,
        "starting parley-directory"
    );

    let store = Arc::new(ServerStore::new());
    sweep::spawn(Arc::clone(&store), config.clone());

    let bind_addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    tokio::select! {
        result = http::serve(store, bind_addr) => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    info!("parley-directory stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
