use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Workflow-level errors. Best-effort side effects (push notifications,
/// secondary record creation) are logged where they fail and never surface
/// through this type.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found")]
    NotFound,

    /// The session user has no complete profile; messaging and offers are
    /// blocked until the profile-completion flow finishes. A distinguished
    /// state rather than a remote failure.
    #[error("profile incomplete")]
    ProfileIncomplete,

    /// Non-2xx reply from the remote marketplace API.
    #[error("remote api error ({status}): {detail}")]
    Remote { status: u16, detail: String },

    /// Transport failure talking to the remote marketplace API.
    #[error("remote api unreachable: {0}")]
    Transport(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) | AppError::ProfileIncomplete => StatusCode::FORBIDDEN,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Remote { .. } | AppError::Transport(_) => StatusCode::BAD_GATEWAY,
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for clients (the profile-completion
    /// redirect keys off `profile_incomplete`).
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config",
            AppError::Validation(_) => "validation",
            AppError::Unauthorized => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::NotFound => "not_found",
            AppError::ProfileIncomplete => "profile_incomplete",
            AppError::Remote { .. } => "remote",
            AppError::Transport(_) => "remote_unreachable",
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::Transport(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.code(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}
