//! Error handling for the Flowtree Server API
//!
//! Every failure is rendered as `{"error": {"code": "...", "message": "..."}}`.

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use flowtree_core::CoreError;
use serde_json::json;
use tracing::{error, warn};

use crate::error::ServerError;

/// API Error type for returning standard error responses
#[derive(Debug)]
pub enum ApiError {
    /// Malformed request (400)
    BadRequest(String),
    /// Failure reported by the hierarchy engine
    Core(CoreError),
    /// Wrapped server error
    ServerError(ServerError),
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError::Core(err)
    }
}

impl From<ServerError> for ApiError {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Core(core) => ApiError::Core(core),
            other => ApiError::ServerError(other),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            ApiError::Core(err) => write!(f, "{}", err),
            ApiError::ServerError(err) => write!(f, "Server Error: {}", err),
        }
    }
}

/// HTTP status for a core error
pub fn status_for(err: &CoreError) -> StatusCode {
    match err {
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::Validation(_) => StatusCode::BAD_REQUEST,
        CoreError::Cycle { .. }
        | CoreError::HasChildren(_)
        | CoreError::ConcurrentModification(_) => StatusCode::CONFLICT,
        CoreError::StructuralCorruption(_)
        | CoreError::StateStoreError(_)
        | CoreError::SerializationError(_)
        | CoreError::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, code, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::Core(err) => (status_for(err), err.code(), err.to_string()),
            ApiError::ServerError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_SERVER_ERROR",
                err.to_string(),
            ),
        };

        if status.is_server_error() {
            error!(code, %message, "Request failed");
        } else if status == StatusCode::CONFLICT {
            warn!(code, %message, "Request conflicted");
        }

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = vec![
            (CoreError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (CoreError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (
                CoreError::Cycle {
                    node: "a".into(),
                    target: "b".into(),
                },
                StatusCode::CONFLICT,
            ),
            (CoreError::HasChildren("x".into()), StatusCode::CONFLICT),
            (CoreError::ConcurrentModification("x".into()), StatusCode::CONFLICT),
            (
                CoreError::StructuralCorruption("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (CoreError::StateStoreError("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(status_for(&err), status, "{:?}", err);
        }
    }

    #[test]
    fn test_server_error_unwraps_core() {
        let api: ApiError = ServerError::Core(CoreError::NotFound("n".into())).into();
        assert!(matches!(api, ApiError::Core(CoreError::NotFound(_))));
        assert_eq!(api.into_response().status(), StatusCode::NOT_FOUND);
    }
}
