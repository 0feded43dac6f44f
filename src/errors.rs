use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("endpoint name is required (format: /{{endpoint_name}}/{{path}})")]
    MissingEndpoint,

    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("invalid target URL for endpoint: {0}")]
    InvalidTarget(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("upstream timeout: {0}")]
    UpstreamTimeout(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            AppError::MissingEndpoint => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::UnknownEndpoint(_) => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::InvalidTarget(name) => {
                tracing::error!("invalid target URL for endpoint {name}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
            AppError::Upstream(e) => (StatusCode::BAD_GATEWAY, e.clone()),
            AppError::UpstreamTimeout(e) => (StatusCode::GATEWAY_TIMEOUT, e.clone()),
            AppError::Internal(e) => {
                tracing::error!("internal error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({ "error": msg }));
        (status, body).into_response()
    }
}
