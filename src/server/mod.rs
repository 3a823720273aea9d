// HTTP surface
//
// axum router exposing health, models, services and chat completions, all
// backed by the shared registry and the request router.

mod handlers;
pub mod openai_types; // Public for client access

pub use handlers::create_router;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::registry::Registry;
use crate::router::RequestRouter;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Registry,
    pub router: RequestRouter,
}

impl AppState {
    pub fn new(router: RequestRouter) -> Self {
        Self {
            registry: router.registry().clone(),
            router,
        }
    }
}

pub struct GatewayServer {
    state: AppState,
    body_limit: usize,
}

impl GatewayServer {
    pub fn new(state: AppState, config: &ServerConfig) -> Self {
        Self {
            state,
            body_limit: config.body_limit_bytes,
        }
    }

    /// The full application with middleware applied.
    pub fn app(&self) -> axum::Router {
        create_router(self.state.clone())
            .layer(axum::extract::DefaultBodyLimit::max(self.body_limit))
            .layer(TraceLayer::new_for_http())
    }

    /// Serve on an already-bound listener until `shutdown` is cancelled.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let addr = listener
            .local_addr()
            .context("Listener has no local address")?;
        tracing::info!("Saturn router listening on http://{}", addr);

        axum::serve(listener, self.app())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .context("HTTP server failed")?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
