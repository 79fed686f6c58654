// crates/server/src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use novel_dl_db::{DbError, Task};
use serde::Serialize;
use thiserror::Error;

use crate::jobs::DispatchError;
use crate::lifecycle::LifecycleError;

/// Structured JSON error response for API errors
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// The task the conflict is about.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<Box<Task>>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
            task: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
            task: None,
        }
    }
}

/// API error types that map to HTTP status codes
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Task not found: {0}")]
    TaskNotFound(i64),

    #[error("Novel not found: {0}")]
    ResourceNotFound(i64),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    /// Another task is active for the pair; carries that task.
    #[error("Conflict: {message}")]
    Conflict { message: String, task: Box<Task> },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Task store error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match self {
            ApiError::TaskNotFound(id) => {
                tracing::warn!(task_id = id, "Task not found");
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::with_details("Task not found", format!("Task ID: {id}")),
                )
            }
            ApiError::ResourceNotFound(id) => {
                tracing::warn!(resource_id = id, "Novel not found");
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::with_details(
                        "Novel not found",
                        format!("Novel with ID {id} not found"),
                    ),
                )
            }
            ApiError::ExecutionNotFound(handle) => {
                tracing::warn!(handle = %handle, "Execution not found");
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::with_details(
                        "Execution not found",
                        format!("Execution handle: {handle}"),
                    ),
                )
            }
            ApiError::Conflict { message, task } => {
                tracing::info!(task_id = task.id, status = %task.status, "Conflict");
                (
                    StatusCode::CONFLICT,
                    ErrorResponse {
                        error: "Conflict".to_string(),
                        details: Some(message),
                        task: Some(task),
                    },
                )
            }
            ApiError::BadRequest(msg) => {
                tracing::warn!(message = %msg, "Bad request");
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::with_details("Bad request", msg),
                )
            }
            ApiError::Dispatch(err) => {
                tracing::error!(error = %err, "Dispatch failed");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ErrorResponse::with_details("Dispatch failed", err.to_string()),
                )
            }
            ApiError::Database(db_err) => {
                tracing::error!(error = %db_err, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::with_details("Database error", db_err.to_string()),
                )
            }
            ApiError::Lifecycle(err) => {
                tracing::error!(error = %err, "Task store error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::with_details("Task store error", err.to_string()),
                )
            }
            ApiError::Internal(msg) => {
                tracing::error!(message = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("Internal server error"),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
