//! HTTP pull endpoint.
//!
//! # Endpoints
//!
//! - `GET /data` - The most recent cycle's event:
//!   `{"dataChanged": bool, "lastChangeTime": timestamp|null, "data"?: record}`
//! - `GET /health` - Liveness check
//!
//! # Example
//!
//! ```bash
//! curl http://localhost:3001/data
//! ```

use crate::error::{MonitorError, Result};
use crate::notify::PullCache;
use crate::record::ChangeEvent;
use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;
use std::future::Future;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Build the router. Routes are registered once and read the pull cache on
/// every request.
pub fn router(cache: PullCache) -> Router {
    Router::new()
        .route("/data", get(latest_event))
        .route("/health", get(health))
        .with_state(cache)
}

/// Serve the pull endpoint on `listener` until `shutdown` completes.
///
/// # Errors
///
/// Returns an IO error if the server fails while accepting connections.
pub async fn serve<F>(listener: TcpListener, cache: PullCache, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Pull endpoint listening");
    }

    axum::serve(listener, router(cache))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(MonitorError::Io)?;

    info!("Pull endpoint stopped");
    Ok(())
}

/// Latest cycle event
async fn latest_event(State(cache): State<PullCache>) -> Json<ChangeEvent> {
    Json(cache.get().as_ref().clone())
}

/// Health check
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
