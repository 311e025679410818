//! Errors surfaced by the dispatcher and turned into HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::services::build_tracker::TrackerError;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Request parameters missing or malformed.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The relay's own configuration cannot serve the request.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    /// A VCS, CI or chat backend failed in a way the request cannot recover from.
    #[error("collaborator failure: {0}")]
    Collaborator(String),
}

impl DispatchError {
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::Validation(_) => StatusCode::BAD_REQUEST,
            DispatchError::Tracker(TrackerError::DuplicateStart(_))
            | DispatchError::Tracker(TrackerError::NoMatchingRun(_)) => StatusCode::BAD_REQUEST,
            DispatchError::Tracker(TrackerError::PostFailed(_))
            | DispatchError::Configuration(_)
            | DispatchError::Collaborator(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::build::BuildKey;

    #[test]
    fn tracker_rejections_are_client_errors() {
        let key = BuildKey::new("nightly", "42", "abc");
        assert_eq!(
            DispatchError::from(TrackerError::DuplicateStart(key.clone())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            DispatchError::from(TrackerError::NoMatchingRun(key.clone())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            DispatchError::from(TrackerError::PostFailed(key)).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn configuration_errors_are_server_errors() {
        let err = DispatchError::Configuration("no build job named nightly".into());
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "configuration error: no build job named nightly");
    }
}
