//! Errors returned by HTTP handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::requester::ForwardError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Forwarding is only available to local clients")]
    Unauthorized,

    #[error(transparent)]
    Forward(#[from] ForwardError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::Forward(ForwardError::Upstream { status, .. }) => (
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
                "upstream_error",
            ),
            ApiError::Forward(ForwardError::Transport(_)) => {
                (StatusCode::BAD_GATEWAY, "communication_error")
            }
            ApiError::Forward(ForwardError::InvalidResponse(_)) => {
                (StatusCode::BAD_GATEWAY, "invalid_response")
            }
            ApiError::Forward(ForwardError::InvalidHeader(_))
            | ApiError::Forward(ForwardError::InvalidBody(_)) => {
                (StatusCode::BAD_REQUEST, "invalid_request")
            }
        };

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": self.to_string()
            }
        }));

        (status, body).into_response()
    }
}
