use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("not a member of this conversation")]
    NotMember,
    #[error("membership in this conversation is inactive")]
    InactiveMember,
    #[error("invalid reply target: {0}")]
    InvalidReply(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("cannot remove the last admin of a group")]
    LastElevatedMember,
    #[error("infrastructure unavailable: {0}")]
    Infrastructure(String),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("database error")]
    Database(#[from] sqlx::Error),
}

impl ChatError {
    /// Stable code sent to clients in error frames.
    pub fn kind(&self) -> &'static str {
        match self {
            ChatError::NotMember => "NOT_MEMBER",
            ChatError::InactiveMember => "INACTIVE_MEMBER",
            ChatError::InvalidReply(_) => "INVALID_REPLY",
            ChatError::NotFound(_) => "NOT_FOUND",
            ChatError::PermissionDenied(_) => "PERMISSION_DENIED",
            ChatError::LastElevatedMember => "LAST_ELEVATED_MEMBER",
            ChatError::Infrastructure(_) => "INFRASTRUCTURE",
            ChatError::Validation(_) => "VALIDATION",
            ChatError::Database(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::NotMember
            | ChatError::InactiveMember
            | ChatError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            ChatError::InvalidReply(_) | ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::LastElevatedMember => StatusCode::CONFLICT,
            ChatError::Infrastructure(_) => StatusCode::SERVICE_UNAVAILABLE,
            ChatError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let message = match &self {
            ChatError::Database(e) => {
                tracing::error!("database error: {e}");
                "Database error".to_string()
            }
            other => other.to_string(),
        };
        let body = serde_json::json!({ "error": message, "code": self.kind() });
        (self.status(), axum::Json(body)).into_response()
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
