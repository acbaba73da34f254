use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use salesdesk_core::error::CoreError;
use salesdesk_core::validator::BlockingIssue;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds HTTP-specific variants.
/// Every variant renders as `{ "error": ..., "code": ... }`; a blocked
/// commit adds the open `issues`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `salesdesk_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A failure outside the domain, such as a commit task that panicked.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

fn internal(detail: &dyn std::fmt::Display) -> (StatusCode, &'static str, String) {
    tracing::error!(error = %detail, "Internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut issues: Option<&[BlockingIssue]> = None;

        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} with id {id} not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Parse(err) => (StatusCode::BAD_REQUEST, "PARSE_ERROR", err.to_string()),
                CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
                CoreError::ValidationBlocked { issues: open } => {
                    issues = Some(open.as_slice());
                    (
                        StatusCode::UNPROCESSABLE_ENTITY,
                        "VALIDATION_BLOCKED",
                        core.to_string(),
                    )
                }
                CoreError::Catalog(err) => internal(err),
                CoreError::Store(err) => internal(err),
            },

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => internal(msg),
        };

        let mut body = json!({
            "error": message,
            "code": code,
        });
        if let Some(issues) = issues {
            body["issues"] = json!(issues);
        }

        (status, axum::Json(body)).into_response()
    }
}
