//! Relay HTTP routes: commit hook, build status updates, shutdown and the
//! default usage route.

pub mod webhook;

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;

use crate::services::dispatcher::Dispatcher;

const KEY_HEADER: &str = "key";

pub const USAGE: &str = "\
Ping? Pong! This is a default response. Usage:

curl http://botaddress:port/command -H \"key:passphrase\" -d \"param=value&param=value\"

Valid commands:
    /on-commit            params: change=id, client=name, user=name, branch=name
    /build-status-update  params: changeID=...&jobName=...&buildNumber=...&buildID=...&buildStatus=running|succeeded|failed|unstable|aborted
    /shutdown             params: (none required)
";

const KEY_HINT: &str =
    "Request denied. Required format: curl http://botaddress -H \"key:passphrase\"";

/// Shared state for relay route handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    /// Shared secret expected in the `key` header. `None` disables the check.
    pub key: Option<String>,
    pub shutdown: CancellationToken,
}

pub fn relay_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/on-commit", post(webhook::on_commit))
        .route("/build-status-update", post(webhook::on_build_status_update))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_key));

    Router::new()
        .merge(protected)
        .route("/shutdown", get(shutdown))
        .fallback(default_route)
        .with_state(state)
}

async fn require_key(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(expected) = state.key.as_deref() else {
        return next.run(request).await;
    };

    let supplied = request
        .headers()
        .get(KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    if supplied == Some(expected) {
        return next.run(request).await;
    }

    match supplied {
        Some(_) => tracing::warn!(path = %request.uri().path(), "Rejected request with invalid key"),
        None => tracing::warn!(path = %request.uri().path(), "Rejected request without key"),
    }
    crate::metrics::request_received("rejected");
    (StatusCode::FORBIDDEN, KEY_HINT).into_response()
}

async fn shutdown(State(state): State<AppState>) -> (StatusCode, &'static str) {
    crate::metrics::request_received("shutdown");
    tracing::info!("Shutdown requested over HTTP");
    state.shutdown.cancel();
    (StatusCode::OK, "Shutting down!")
}

async fn default_route() -> (StatusCode, &'static str) {
    crate::metrics::request_received("default");
    (StatusCode::OK, USAGE)
}
