//! pbprox: authenticating reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌───────────────────────────────────────────────────────┐
//!                      │                        pbprox                         │
//!                      │                                                       │
//!   Client Request     │  ┌──────────┐   ┌───────────┐   ┌─────────────────┐   │
//!   ───────────────────┼─▶│   http   │──▶│  routing  │──▶│      auth       │   │
//!                      │  │  server  │   │ exemption │   │ session / OAuth2│   │
//!                      │  └──────────┘   └─────┬─────┘   └────────┬────────┘   │
//!                      │                       │ exempt           │ authed     │
//!                      │                       ▼                  ▼            │
//!   Client Response    │               ┌────────────────────────────────┐      │
//!   ◀──────────────────┼───────────────│  upstream forwarder (+retry)   │◀─────┼── internal_host
//!                      │               └────────────────────────────────┘      │
//!                      │                                                       │
//!                      │  provider: store → validation → resolver (snapshot)   │
//!                      │  config: TOML → validation → watcher (hot reload)     │
//!                      └───────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use pbprox::auth::OidcClient;
use pbprox::config::load_config;
use pbprox::config::watcher::ConfigWatcher;
use pbprox::net::tls::load_tls_config;
use pbprox::observability::{logging, metrics};
use pbprox::{GatewayServer, Shutdown};

#[derive(Parser)]
#[command(name = "pbprox")]
#[command(about = "Authenticating reverse proxy for a passbook proxy provider", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "pbprox.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args.config)?;

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "pbprox starting");
    tracing::info!(
        config = ?args.config,
        bind_address = %config.listener.bind_address,
        provider = %config.provider_id,
        tls = config.listener.tls.is_some(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let oauth2 = OidcClient::new(
        &config.oauth2,
        Duration::from_secs(config.timeouts.request_secs),
    )?;
    let server = GatewayServer::new(config.clone(), Arc::new(oauth2))?;

    let (watcher, updates) = ConfigWatcher::new(&args.config);
    // Dropping the watcher stops it.
    let _watcher = watcher.run()?;

    let shutdown = Shutdown::new();
    shutdown.trigger_on_signal();

    match &config.listener.tls {
        Some(tls) => {
            let addr: SocketAddr = config.listener.bind_address.parse()?;
            let tls = load_tls_config(tls).await?;
            server.run_tls(addr, tls, updates, shutdown.subscribe()).await?;
        }
        None => {
            let listener = TcpListener::bind(&config.listener.bind_address).await?;
            server.run(listener, updates, shutdown.subscribe()).await?;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
