use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use lifeline_core::EngineError;
use lifeline_shared::RecordError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Missing caller identity: {0}")]
    Unauthorized(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Emergency alert was NOT sent, try again or call emergency services: {0}")]
    AlertNotSent(String),

    #[error("Encoding error: {0}")]
    Record(#[from] RecordError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<EngineError> for ServerError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NoIdentity => ServerError::Unauthorized(e.to_string()),
            EngineError::AlertNotSent(source) => ServerError::AlertNotSent(source.to_string()),
            EngineError::NotFound(what) => ServerError::NotFound(what.to_string()),
            EngineError::NotVictim
            | EngineError::NotAlertRecipient
            | EngineError::NotParticipant => ServerError::Forbidden(e.to_string()),
            EngineError::EmptyMessage
            | EngineError::ReservedKind
            | EngineError::InvalidContact(_)
            | EngineError::Location(_) => ServerError::BadRequest(e.to_string()),
            EngineError::Store(_) | EngineError::Discovery(_) | EngineError::FeedClosed => {
                ServerError::Internal(e.to_string())
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::AlertNotSent(_) => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            ServerError::Record(_) | ServerError::Internal(_) => {
                tracing::error!(error = %self, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
