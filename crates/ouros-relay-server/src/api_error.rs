//! Mapping of relay errors onto HTTP responses.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ouros_relay::RelayError;
use serde_json::json;

/// A [`RelayError`] on its way out of an HTTP handler.
///
/// The body is `{"error": <message>, "kind": <snake_case kind>}`.
#[derive(Debug)]
pub struct ApiError(pub RelayError);

impl ApiError {
    /// HTTP status for each error kind.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self.0 {
            RelayError::Validation(_) => StatusCode::BAD_REQUEST,
            RelayError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            RelayError::SessionBusy(_) => StatusCode::CONFLICT,
            RelayError::EngineUnavailable(_) => StatusCode::BAD_GATEWAY,
            RelayError::CapacityExceeded(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(error: RelayError) -> Self {
        Self(error)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(RelayError::Validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self.0, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self.0, "request rejected");
        }
        let body = json!({
            "error": self.0.to_string(),
            "kind": self.0.kind(),
        });
        (status, Json(body)).into_response()
    }
}
