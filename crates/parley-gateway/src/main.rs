//! parley-gateway: chat gateway server.
//!
//! Serves one chat room over WebSocket, issues access tokens over HTTP,
//! applies device-level moderation, and keeps its listing alive in a
//! parley directory service.

mod config;
mod directory;
mod history;
mod http;
mod moderation;
mod server;
mod session;
mod transport;

use clap::Parser;
use config::GatewayConfig;
use server::GatewayServer;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{error, info};

/// parley-gateway — chat gateway server
#[derive(Parser, Debug)]
#[command(name = "parley-gateway", version, about = "Chat gateway server")]
struct Cli {
    /// Gateway display name
    #[arg(long)]
    name: Option<String>,

    /// HTTP port (the WebSocket listener binds port + 1)
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory service base URL (empty runs unlisted)
    #[arg(long)]
    directory_url: Option<String>,

    /// Maximum concurrent users
    #[arg(long)]
    max_users: Option<usize>,

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

    let config = match GatewayConfig::load(
        cli.config.as_deref(),
        cli.name.as_deref(),
        cli.port,
        cli.directory_url.as_deref(),
        cli.max_users,
    ) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        name = %config.name,
        port = config.port,
        ws_port = config.ws_port(),
        listed = config.directory_url.is_some(),
        "starting parley-gateway"
    );

    let http_addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    let ws_addr: SocketAddr = ([0, 0, 0, 0], config.ws_port()).into();

    let server = GatewayServer::new(config);
    if let Err(e) = server.clone().run_ws(ws_addr).await {
        error!(error = %e, "failed to start WebSocket listener");
        std::process::exit(1);
    }
    server.clone().spawn_background();

    tokio::select! {
        result = http::serve(server.clone(), http_addr) => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    server.shutdown().await;
    info!("parley-gateway stopped");
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
