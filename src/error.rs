// src/error.rs

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Global Application Error Enum.
/// Centralizes error handling and mapping to HTTP responses.
///
/// The state-machine and contention variants are expected conditions and are
/// surfaced with a stable `code` so clients can retry or resync; they are not
/// server faults and are never logged as errors.
#[derive(Debug)]
pub enum AppError {
    // 500 Internal Server Error
    InternalServerError(String),

    // 400 Bad Request
    BadRequest(String),

    // 401 Unauthorized (missing/invalid principal)
    AuthError(String),

    // 403 Forbidden (principal lacks the role for the action)
    Unauthorized(String),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict (e.g., duplicate resource)
    Conflict(String),

    // Exam/attempt state machine violation
    InvalidTransition(String),

    // Join window has elapsed; existing attempts continue unaffected
    JoinWindowClosed(String),

    // An unsubmitted attempt already exists for (exam, student)
    AttemptAlreadyActive(String),

    // Attempt already submitted; no further writes accepted
    AttemptClosed(String),

    // An autosave raced a newer save; the caller must resync
    StaleWrite(String),

    // Question kind has no scoring rule; fail closed instead of scoring zero
    UnsupportedQuestionType(String),

    // Attempt marked graded while a response remains ungraded.
    // Internal invariant breach: logged loudly, blocks result publication.
    InconsistentGradingState(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// Stable machine-readable code included in the response body.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InternalServerError(_) => "internal_error",
            AppError::BadRequest(_) => "bad_request",
            AppError::AuthError(_) => "auth_error",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::InvalidTransition(_) => "invalid_transition",
            AppError::JoinWindowClosed(_) => "join_window_closed",
            AppError::AttemptAlreadyActive(_) => "attempt_already_active",
            AppError::AttemptClosed(_) => "attempt_closed",
            AppError::StaleWrite(_) => "stale_write",
            AppError::UnsupportedQuestionType(_) => "unsupported_question_type",
            AppError::InconsistentGradingState(_) => "inconsistent_grading_state",
        }
    }
}

/// Implements `IntoResponse` for `AppError`.
/// Converts the error into a JSON response with appropriate HTTP status code.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        let (status, error_message) = match self {
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
            AppError::InconsistentGradingState(msg) => {
                // Staff review tooling sees the code; students never reach
                // the endpoints that can produce this.
                tracing::error!("Inconsistent grading state: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::AuthError(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Unauthorized(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::InvalidTransition(msg) => (StatusCode::CONFLICT, msg),
            AppError::JoinWindowClosed(msg) => (StatusCode::CONFLICT, msg),
            AppError::AttemptAlreadyActive(msg) => (StatusCode::CONFLICT, msg),
            AppError::AttemptClosed(msg) => (StatusCode::CONFLICT, msg),
            AppError::StaleWrite(msg) => (StatusCode::CONFLICT, msg),
            AppError::UnsupportedQuestionType(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
        };
        let body = Json(json!({
            "error": error_message,
            "code": code,
        }));

        (status, body).into_response()
    }
}

/// Converts `sqlx::Error` into `AppError::InternalServerError`.
/// Allows using `?` operator on database queries.
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::InternalServerError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(err.to_string())
    }
}
