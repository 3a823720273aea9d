// Daemon: wires the subsystems and the HTTP server together

pub mod lifecycle;
mod subsystems;

pub use lifecycle::{bind_listener, find_available_port, PortFile};
pub use subsystems::Subsystems;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::router::RequestRouter;
use crate::server::{AppState, GatewayServer};

/// Shared HTTP client for probes and forwarding. Timeouts are set per request.
pub fn build_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("saturn/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")
}

/// Run the router until Ctrl-C.
pub async fn run_gateway(config: Config) -> Result<()> {
    let client = build_http_client()?;
    let subsystems = Subsystems::start(&config, client.clone())?;

    let router = RequestRouter::new(subsystems.registry().clone(), client, config.router.clone());
    let server = GatewayServer::new(AppState::new(router), &config.server);

    let listener = match bind_listener(&config.server.bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            subsystems.shutdown().await;
            return Err(e);
        }
    };
    let addr = listener.local_addr().context("Listener has no local address")?;

    let port_file = config.server.port_file.as_ref().map(PortFile::new);
    if let Some(port_file) = &port_file {
        port_file.write(addr)?;
    }

    let shutdown = subsystems.token().child_token();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
        }
        signal_token.cancel();
    });

    let served = server.serve(listener, shutdown).await;

    subsystems.shutdown().await;
    if let Some(port_file) = &port_file {
        if let Err(e) = port_file.cleanup() {
            tracing::warn!("{:#}", e);
        }
    }
    served
}
