//! Inbound webhook handlers for the VCS commit trigger and CI status updates.

use axum::body::Bytes;
use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use serde::de::DeserializeOwned;

use super::AppState;
use crate::errors::DispatchError;
use crate::models::build::BuildStatusParams;
use crate::models::commit::{Commit, CommitParams};

/// Decodes urlencoded parameters from the query string and the body. A
/// parameter present in both takes the body's value.
pub fn merged_params<T: DeserializeOwned>(
    query: Option<&str>,
    body: &[u8],
) -> Result<T, DispatchError> {
    let invalid = |e: serde_urlencoded::de::Error| DispatchError::Validation(e.to_string());

    let mut pairs: Vec<(String, String)> = match query {
        Some(query) => serde_urlencoded::from_str(query).map_err(invalid)?,
        None => Vec::new(),
    };
    let body_pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(body).map_err(invalid)?;

    for (name, value) in body_pairs {
        pairs.retain(|(existing, _)| *existing != name);
        pairs.push((name, value));
    }

    let encoded = serde_urlencoded::to_string(&pairs)
        .map_err(|e| DispatchError::Validation(e.to_string()))?;
    serde_urlencoded::from_str(&encoded).map_err(invalid)
}

/// `POST /on-commit`
pub async fn on_commit(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<(StatusCode, String), DispatchError> {
    crate::metrics::request_received("on-commit");

    let params: CommitParams = merged_params(query.as_deref(), &body)?;
    let commit = Commit::from(params);
    tracing::info!(commit = %commit, "Received commit");

    let outcome = state.dispatcher.handle_commit(commit).await?;
    Ok((StatusCode::OK, outcome.to_string()))
}

/// `POST /build-status-update`
pub async fn on_build_status_update(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<(StatusCode, String), DispatchError> {
    crate::metrics::request_received("build-status-update");

    let params: BuildStatusParams = merged_params(query.as_deref(), &body)?;
    let outcome = state.dispatcher.handle_build_status(params).await?;
    Ok((StatusCode::OK, outcome.to_string()))
}
