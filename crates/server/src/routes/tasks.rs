// crates/server/src/routes/tasks.rs
//! Task control endpoints.
//!
//! - POST /novels: admit and queue a download
//! - GET /tasks/list: list tasks
//! - POST /tasks/{id}/terminate: stop a task
//! - DELETE /tasks/{id}: delete a task
//! - POST /tasks/{id}/redownload: queue a finished task again
//! - GET /tasks/status/{handle}: execution status

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use novel_dl_db::Task;
use serde::{Deserialize, Serialize};

use crate::control::Termination;
use crate::error::{ApiError, ApiResult};
use crate::jobs::ExecutionStatus;
use crate::state::AppState;

/// The control surface carries no session; requests default to this owner.
pub const DEFAULT_OWNER_ID: i64 = 1;

fn default_owner() -> i64 {
    DEFAULT_OWNER_ID
}

#[derive(Debug, Deserialize)]
pub struct AdmitRequest {
    #[serde(alias = "novel_id")]
    pub resource_id: i64,
    #[serde(default = "default_owner")]
    pub owner_id: i64,
    /// Preview cap on the number of units fetched.
    #[serde(default, alias = "max_chapters")]
    pub max_units: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub owner_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub message: String,
    pub task: Task,
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<Task>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub message: String,
    pub task_id: i64,
}

#[derive(Debug, Serialize)]
pub struct ExecutionStatusResponse {
    pub handle: String,
    pub status: ExecutionStatus,
    pub description: String,
}

/// POST /api/novels
///
/// Answers 202 with the new task, or 409 carrying the active one.
async fn admit(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AdmitRequest>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    if req.resource_id <= 0 {
        return Err(ApiError::BadRequest("resource_id must be positive".into()));
    }
    if req.max_units.is_some_and(|m| m <= 0) {
        return Err(ApiError::BadRequest("max_units must be positive".into()));
    }

    let task = state
        .control
        .admit(req.owner_id, req.resource_id, req.max_units)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(task)))
}

/// GET /api/tasks/list?owner_id=
async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<TaskListResponse>> {
    let owner = query.owner_id.unwrap_or(DEFAULT_OWNER_ID);
    let tasks = state.control.list(Some(owner)).await?;
    Ok(Json(TaskListResponse { tasks }))
}

/// POST /api/tasks/{id}/terminate
async fn terminate(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<i64>,
) -> ApiResult<Json<TaskResponse>> {
    let response = match state.control.terminate(task_id).await? {
        Termination::Terminated(task) => TaskResponse {
            message: "Task termination signal sent.".into(),
            task,
        },
        Termination::AlreadyFinished(task) => TaskResponse {
            message: "Task is already finished.".into(),
            task,
        },
    };
    Ok(Json(response))
}

/// DELETE /api/tasks/{id}
async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<i64>,
) -> ApiResult<Json<DeleteResponse>> {
    state.control.delete(task_id).await?;
    Ok(Json(DeleteResponse {
        message: "Task deleted successfully.".into(),
        task_id,
    }))
}

/// POST /api/tasks/{id}/redownload
async fn redownload(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<i64>,
) -> ApiResult<(StatusCode, Json<TaskResponse>)> {
    let task = state.control.redownload(task_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(TaskResponse {
            message: "Re-download task queued.".into(),
            task,
        }),
    ))
}

/// GET /api/tasks/status/{handle}
async fn execution_status(
    State(state): State<Arc<AppState>>,
    Path(handle): Path<String>,
) -> ApiResult<Json<ExecutionStatusResponse>> {
    let status = state.control.execution_status(&handle)?;
    Ok(Json(ExecutionStatusResponse {
        handle,
        status,
        description: status.description().to_string(),
    }))
}

/// Build the tasks router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/novels", post(admit))
        .route("/tasks/list", get(list_tasks))
        .route("/tasks/status/{handle}", get(execution_status))
        .route("/tasks/{id}/terminate", post(terminate))
        .route("/tasks/{id}/redownload", post(redownload))
        .route("/tasks/{id}", delete(delete_task))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admit_request_aliases() {
        let req: AdmitRequest =
            serde_json::from_str(r#"{"novel_id": 42, "max_chapters": 5}"#).unwrap();
        assert_eq!(req.resource_id, 42);
        assert_eq!(req.owner_id, DEFAULT_OWNER_ID);
        assert_eq!(req.max_units, Some(5));

        let req: AdmitRequest =
            serde_json::from_str(r#"{"resource_id": 7, "owner_id": 3}"#).unwrap();
        assert_eq!((req.resource_id, req.owner_id, req.max_units), (7, 3, None));
    }

    #[test]
    fn test_router_creation() {
        let _router = router();
    }
}
