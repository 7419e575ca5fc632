//! HTTP server lifecycle and router construction.

use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, Level};

use crate::allocator::Allocator;
use crate::contract::ContractManager;
use crate::hashrate::GlobalHashrate;

use super::v1;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Address to bind the API server to
    pub bind_addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3001".to_string(),
        }
    }
}

/// Shared application state available to all handlers.
#[derive(Clone)]
pub(crate) struct SharedState {
    pub allocator: Arc<Allocator>,
    pub global: Arc<GlobalHashrate>,
    pub contracts: Option<Arc<ContractManager>>,
}

/// Start the API server; runs until the cancellation token fires.
pub async fn serve(
    config: ApiConfig,
    allocator: Arc<Allocator>,
    global: Arc<GlobalHashrate>,
    contracts: Option<Arc<ContractManager>>,
    shutdown: CancellationToken,
) -> Result<()> {
    let app = build_router(allocator, global, contracts);

    let listener = TcpListener::bind(&config.bind_addr).await?;
    let actual_addr = listener.local_addr()?;
    info!(url = %format!("http://{}", actual_addr), "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
        })
        .await?;

    Ok(())
}

/// Build the application router with all API routes.
pub(crate) fn build_router(
    allocator: Arc<Allocator>,
    global: Arc<GlobalHashrate>,
    contracts: Option<Arc<ContractManager>>,
) -> Router {
    let state = SharedState {
        allocator,
        global,
        contracts,
    };

    Router::new()
        .merge(v1::root_routes())
        .nest("/api/v1", v1::routes())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}
