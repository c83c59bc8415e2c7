use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Error taxonomy for the booking core and its webhook surface.
///
/// `RemoteUnavailable` is transient and retried internally before it ever
/// reaches a caller; `UndeterminedCommit` is deliberately distinct from both
/// success and failure so the user can be told to verify rather than told the
/// booking definitely failed.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("remote platform unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("concurrent modification, please retry")]
    ConcurrentModification,

    #[error("commit outcome undetermined — verify manually")]
    UndeterminedCommit,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("unauthorized")]
    Unauthorized,
}

impl IntoResponse for BotError {
    fn into_response(self) -> Response {
        let status = match &self {
            BotError::InvalidTransition(_) => StatusCode::CONFLICT,
            BotError::RemoteUnavailable(_) => StatusCode::BAD_GATEWAY,
            BotError::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            BotError::ConcurrentModification => StatusCode::CONFLICT,
            BotError::UndeterminedCommit => StatusCode::ACCEPTED,
            BotError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            BotError::Unauthorized => StatusCode::FORBIDDEN,
        };

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
