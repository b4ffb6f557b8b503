//! HTTP routes.

use crate::auth::bearer_token;
use crate::error::{ServerError, ServerResult};
use crate::server::SyncServer;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tidesync_sync_protocol::{PullRequest, PullResponse, PushRequest, PULL_PATH, PUSH_PATH};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Builds the router: `POST /sync/pull`, `POST /sync/push`, `GET /healthz`.
pub fn router(server: Arc<SyncServer>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(PULL_PATH, post(pull))
        .route(PUSH_PATH, post(push))
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}

/// Binds the configured address and serves until the process stops.
///
/// # Errors
///
/// Returns [`ServerError::Io`] if binding or serving fails.
pub async fn serve(server: Arc<SyncServer>) -> ServerResult<()> {
    let listener = TcpListener::bind(server.config().bind_addr).await?;
    serve_on(listener, server).await
}

/// Serves on an already bound listener.
///
/// # Errors
///
/// Returns [`ServerError::Io`] if serving fails.
pub async fn serve_on(listener: TcpListener, server: Arc<SyncServer>) -> ServerResult<()> {
    info!(addr = %listener.local_addr()?, "tidesync server listening");
    axum::serve(listener, router(server)).await?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    clock: i64,
    records: usize,
}

async fn healthz(State(server): State<Arc<SyncServer>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        clock: server.store().clock(),
        records: server.store().len(),
    })
}

async fn pull(
    State(server): State<Arc<SyncServer>>,
    headers: HeaderMap,
    Json(request): Json<PullRequest>,
) -> Result<Json<PullResponse>, ServerError> {
    let credential = bearer_token(&headers)?;
    Ok(Json(server.handle_pull(credential, &request)?))
}

async fn push(
    State(server): State<Arc<SyncServer>>,
    headers: HeaderMap,
    Json(request): Json<PushRequest>,
) -> Result<Json<Value>, ServerError> {
    let credential = bearer_token(&headers)?;
    server.handle_push(credential, &request)?;
    Ok(Json(json!({})))
}
