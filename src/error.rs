use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Convenience type alias for Results with [`CoreError`]
pub type Result<T> = std::result::Result<T, CoreError>;

/// A single field-level validation failure, rendered into the error envelope's `fields` array.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

/// Main error type for the coordination engine.
///
/// Every variant knows how to render itself into the §6.1 error envelope
/// (`{success:false, error, code, status, hint?, fields?, details?, gate?}`).
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("validation failed")]
    Fields(Vec<FieldError>),

    #[error("gate {gate} rejected the transition: {message}")]
    Gate {
        gate: &'static str,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("ambiguous id {input}")]
    Ambiguous {
        input: String,
        suggestions: Vec<String>,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("invalid task references: {refs:?}")]
    InvalidTaskRefs {
        refs: Vec<String>,
        reject_id: String,
    },

    #[error("test task rejected")]
    TestTaskRejected,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    fn code(&self) -> &'static str {
        match self {
            CoreError::Validation(_) | CoreError::Fields(_) => "BAD_REQUEST",
            CoreError::Gate { gate, .. } => match *gate {
                "qa_bundle" => "qa_bundle",
                "artifacts" => "artifacts",
                "reviewer_signoff" => "reviewer_signoff",
                "wip_cap" => "wip_cap",
                _ => "BAD_REQUEST",
            },
            CoreError::NotFound(_) => "NOT_FOUND",
            CoreError::Ambiguous { .. } => "CONFLICT",
            CoreError::Conflict(_) => "CONFLICT",
            CoreError::Forbidden(_) => "FORBIDDEN",
            CoreError::UpstreamUnavailable(_) => "INTERNAL_ERROR",
            CoreError::InvalidTaskRefs { .. } => "INVALID_TASK_REFS",
            CoreError::TestTaskRejected => "TEST_TASK_REJECTED",
            CoreError::Serialization(_) => "BAD_REQUEST",
            CoreError::Configuration(_) => "INTERNAL_ERROR",
            CoreError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            CoreError::Validation(_)
            | CoreError::Fields(_)
            | CoreError::Serialization(_)
            | CoreError::TestTaskRejected
            | CoreError::InvalidTaskRefs { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            CoreError::Gate { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Ambiguous { .. } => StatusCode::CONFLICT,
            CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::Forbidden(_) => StatusCode::FORBIDDEN,
            CoreError::UpstreamUnavailable(_) => StatusCode::OK,
            CoreError::Configuration(_) | CoreError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let mut body = json!({
            "success": false,
            "error": self.to_string(),
            "code": code,
            "status": status.as_u16(),
        });

        match &self {
            CoreError::Gate {
                gate, details, ..
            } => {
                body["gate"] = json!(gate);
                if let Some(d) = details {
                    body["details"] = d.clone();
                }
            }
            CoreError::Fields(fields) => {
                body["fields"] = json!(fields);
            }
            CoreError::Ambiguous { suggestions, .. } => {
                body["details"] = json!({ "suggestions": suggestions });
            }
            CoreError::InvalidTaskRefs { refs, reject_id } => {
                body["details"] = json!({
                    "invalid_task_refs": refs,
                    "reject_id": reject_id,
                });
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}
