//! Error types for the relay server and the client-side store.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Server-side errors (HTTP handlers, channel service, Redis).
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid channel name: {0}")]
    InvalidChannel(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Redis(e) => (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("Redis error: {}", e),
            ),
            AppError::Serialization(e) => (
                StatusCode::BAD_REQUEST,
                format!("Invalid payload: {}", e),
            ),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::InvalidChannel(msg) => (
                StatusCode::BAD_REQUEST,
                format!("Invalid channel name: {}", msg),
            ),
            AppError::Internal(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Internal error: {}", e),
            ),
        };

        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Failures detected by the event relay store and its transports.
///
/// The store never returns these to callers; they are logged where they are
/// detected, or reported to connection-state observers as `false`.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("subject must not be empty")]
    EmptySubject,

    #[error("no file.<id> or project.<id> segment in url: {0}")]
    UnrecognizedUrl(String),

    #[error("invalid url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("malformed event: {0}")]
    MalformedEvent(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected status {0} from event stream")]
    UnexpectedStatus(u16),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invalid_channel_maps_to_bad_request() {
        let res = AppError::InvalidChannel("user.1".to_string()).into_response();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Invalid channel name: user.1");
    }

    #[test]
    fn relay_error_messages() {
        assert_eq!(RelayError::EmptySubject.to_string(), "subject must not be empty");
        assert_eq!(
            RelayError::UnexpectedStatus(404).to_string(),
            "unexpected status 404 from event stream"
        );
    }
}
