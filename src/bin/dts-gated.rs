//! dts-gated - forward-auth daemon for the Diabetes Treatment System front-end

use anyhow::{Context, Result};
use clap::Parser;
use dts_gate::server::run_server;
use dts_gate::GateConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "dts-gated")]
#[command(about = "Forward-auth daemon gating page navigations by role")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "127.0.0.1:4180", env = "DTS_GATE_BIND")]
    bind: String,

    /// Gate configuration file (JSON); built-in defaults when omitted
    #[arg(long, env = "DTS_GATE_CONFIG")]
    config: Option<PathBuf>,

    /// HS256 secret for the local resolver
    #[arg(long, env = "DTS_GATE_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Log level
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    run(args).await
}

async fn run(args: Args) -> Result<()> {
    let mut config = GateConfig::load_or_default(args.config.as_deref())
        .context("Failed to load gate configuration")?;
    config.override_secret(args.secret);

    let gate = config.build_gate().context("Invalid gate configuration")?;

    let bind_addr: SocketAddr = args.bind.parse().context("Invalid bind address")?;

    info!(
        addr = %bind_addr,
        strategy = gate.resolver().strategy(),
        rules = gate.rules().permissions.len(),
        "dts-gated starting"
    );

    run_server(bind_addr, gate, shutdown_signal()).await?;

    info!("dts-gated stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping server");
}
