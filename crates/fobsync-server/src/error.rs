//! HTTP-facing errors for the publisher endpoints.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Seconds a client is asked to back off while the cache warms up.
pub const WARMING_RETRY_AFTER_SECS: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The `wait` query parameter is not a duration.
    #[error("invalid wait duration {value:?}: {source}")]
    InvalidWait {
        value: String,
        #[source]
        source: humantime::DurationError,
    },

    /// The body of `POST /v1/events` is not an access event.
    #[error("invalid event: {0}")]
    InvalidEvent(#[source] serde_json::Error),

    /// No successful fill has happened yet.
    #[error("cache not yet warmed")]
    NotWarmed,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidWait { .. } | Self::InvalidEvent(_) => StatusCode::BAD_REQUEST,
            Self::NotWarmed => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({ "error": self.to_string() }));
        let mut response = (status, body).into_response();
        if matches!(self, Self::NotWarmed) {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(WARMING_RETRY_AFTER_SECS));
        }
        response
    }
}
