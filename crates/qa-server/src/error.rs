//! HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use qa_core::QaError;

/// A [`QaError`] rendered as a JSON response.
#[derive(Debug)]
pub struct ApiError(pub QaError);

impl From<QaError> for ApiError {
    fn from(e: QaError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            QaError::DocumentNotFound { .. } => StatusCode::NOT_FOUND,
            e if e.is_collaborator_error() => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }

        let body = Json(json!({
            "error": {
                "code": self.0.error_code(),
                "message": self.0.to_string(),
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
        let status = |e: QaError| ApiError(e).status();

        assert_eq!(status(QaError::invalid_argument("k")), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(QaError::DocumentNotFound { id: "x".into() }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(status(QaError::embedding("down")), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status(QaError::internal("bug")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
