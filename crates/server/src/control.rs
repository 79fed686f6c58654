// crates/server/src/control.rs
//! Control operations on tasks: admit, terminate, delete, redownload.
//!
//! Each operation coordinates the task record and the dispatcher so that a
//! task is never left PENDING without a live execution handle.

use std::sync::Arc;

use novel_dl_core::TaskStatus;
use novel_dl_db::{Admission, Database, Task};
use tracing::{info, warn};

use crate::error::{ApiError, ApiResult};
use crate::jobs::{ExecutionHandle, ExecutionStatus, JobDispatcher, JobRequest};
use crate::lifecycle::{LifecycleError, TaskLifecycle};

pub const TERMINATED_MESSAGE: &str = "Task terminated by user.";
pub const REDOWNLOAD_MESSAGE: &str = "Re-download requested.";
pub const NO_HANDLE_MESSAGE: &str = "No execution handle found to terminate.";

/// Result of a terminate request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    Terminated(Task),
    /// The task had already reached a terminal state; nothing changed.
    AlreadyFinished(Task),
}

impl Termination {
    pub fn task(&self) -> &Task {
        match self {
            Termination::Terminated(t) | Termination::AlreadyFinished(t) => t,
        }
    }
}

pub struct TaskControl {
    db: Database,
    lifecycle: TaskLifecycle,
    dispatcher: Arc<JobDispatcher>,
}

impl TaskControl {
    pub fn new(lifecycle: TaskLifecycle, dispatcher: Arc<JobDispatcher>) -> Self {
        Self {
            db: lifecycle.db().clone(),
            lifecycle,
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &Arc<JobDispatcher> {
        &self.dispatcher
    }

    /// Create a task for the pair and queue its job.
    ///
    /// A pair with an active task yields a conflict carrying that task. If
    /// the job cannot be queued the new task is removed again.
    pub async fn admit(
        &self,
        owner_id: i64,
        resource_id: i64,
        max_units: Option<i64>,
    ) -> ApiResult<Task> {
        let task = match self.db.admit(owner_id, resource_id, max_units).await? {
            Admission::Conflict(existing) => {
                info!(owner_id, resource_id, task_id = existing.id, "Admission conflict");
                return Err(ApiError::Conflict {
                    message: format!("Task is already active with status {}.", existing.status),
                    task: Box::new(existing),
                });
            }
            Admission::Admitted(task) => task,
        };
        info!(owner_id, resource_id, task_id = task.id, "Task admitted");
        self.lifecycle.publish(&task);

        match self.dispatcher.dispatch(job_request(&task)) {
            Ok(handle) => self.attach(task.id, &handle).await,
            Err(e) => {
                warn!(task_id = task.id, error = %e, "Dispatch failed, rolling back admission");
                if let Err(rollback) = self.lifecycle.remove(task.owner_id, task.id).await {
                    warn!(task_id = task.id, error = %rollback, "Rollback failed, failing task instead");
                    self.lifecycle
                        .fail(task.id, &format!("Failed to queue download: {e}"))
                        .await?;
                }
                Err(e.into())
            }
        }
    }

    /// Stop a task's execution and mark it TERMINATED.
    pub async fn terminate(&self, task_id: i64) -> ApiResult<Termination> {
        let task = self.task(task_id).await?;
        if task.status.is_finished() {
            return Ok(Termination::AlreadyFinished(task));
        }

        let Some(raw) = task.execution_handle.clone() else {
            warn!(task_id, status = %task.status, "Active task has no execution handle");
            self.lifecycle.fail(task_id, NO_HANDLE_MESSAGE).await?;
            return Err(ApiError::BadRequest(
                "Task has no associated execution handle".to_string(),
            ));
        };

        let handle = ExecutionHandle::from(raw);
        let signalled = self.dispatcher.cancel(&handle);
        info!(task_id, handle = %handle, signalled, "Termination requested");

        match self
            .lifecycle
            .transition(task_id, TaskStatus::Terminated, None, TERMINATED_MESSAGE)
            .await?
        {
            Some(task) => Ok(Termination::Terminated(task)),
            // Finished between the read and the write.
            None => Ok(Termination::AlreadyFinished(self.task(task_id).await?)),
        }
    }

    /// Remove a task, cancelling its execution first if it is active.
    pub async fn delete(&self, task_id: i64) -> ApiResult<Task> {
        let task = self.task(task_id).await?;
        if let Some(raw) = task.execution_handle.clone() {
            let handle = ExecutionHandle::from(raw);
            if task.status.is_active() {
                self.dispatcher.cancel(&handle);
            }
            self.dispatcher.forget(&handle);
        }

        if !self.lifecycle.remove(task.owner_id, task_id).await? {
            return Err(ApiError::TaskNotFound(task_id));
        }
        info!(task_id, owner_id = task.owner_id, "Task deleted");
        Ok(task)
    }

    /// Reset a finished task to PENDING and queue it again.
    ///
    /// On dispatch failure the task is FAILED with the dispatch error.
    pub async fn redownload(&self, task_id: i64) -> ApiResult<Task> {
        let task = self.task(task_id).await?;
        if task.status.is_active() {
            return Err(ApiError::Conflict {
                message: format!("Cannot re-download active task ({}).", task.status),
                task: Box::new(task),
            });
        }
        if let Some(raw) = task.execution_handle.clone() {
            self.dispatcher.forget(&ExecutionHandle::from(raw));
        }

        let reset = match self
            .lifecycle
            .transition(task_id, TaskStatus::Pending, Some(0), REDOWNLOAD_MESSAGE)
            .await
        {
            Ok(Some(task)) => task,
            Ok(None) => {
                let current = self.task(task_id).await?;
                return Err(ApiError::Conflict {
                    message: format!("Cannot re-download active task ({}).", current.status),
                    task: Box::new(current),
                });
            }
            Err(LifecycleError::ActiveConflict) => {
                return match self.db.active_task(task.owner_id, task.resource_id).await? {
                    Some(active) => Err(ApiError::Conflict {
                        message: format!("Task is already active with status {}.", active.status),
                        task: Box::new(active),
                    }),
                    None => Err(ApiError::Internal(format!(
                        "re-download of task {task_id} refused without an active task"
                    ))),
                };
            }
            Err(e) => return Err(e.into()),
        };
        info!(task_id, "Re-download requested");

        match self.dispatcher.dispatch(job_request(&reset)) {
            Ok(handle) => self.attach(task_id, &handle).await,
            Err(e) => {
                let message = format!("Failed to queue re-download: {e}");
                self.lifecycle.fail(task_id, &message).await?;
                Err(e.into())
            }
        }
    }

    /// Tasks of one owner, or of everyone, newest first.
    pub async fn list(&self, owner_id: Option<i64>) -> ApiResult<Vec<Task>> {
        Ok(self.db.list_tasks(owner_id).await?)
    }

    /// The dispatcher's view of an execution.
    pub fn execution_status(&self, handle: &str) -> ApiResult<ExecutionStatus> {
        self.dispatcher
            .status(&ExecutionHandle::from(handle.to_string()))
            .ok_or_else(|| ApiError::ExecutionNotFound(handle.to_string()))
    }

    async fn task(&self, task_id: i64) -> ApiResult<Task> {
        self.db
            .get_task(task_id)
            .await?
            .ok_or(ApiError::TaskNotFound(task_id))
    }

    /// Record the handle of a freshly dispatched job. A job fast enough to
    /// finish first leaves the task without one, which is fine once it is
    /// terminal.
    async fn attach(&self, task_id: i64, handle: &ExecutionHandle) -> ApiResult<Task> {
        match self.lifecycle.assign_handle(task_id, handle).await? {
            Some(task) => Ok(task),
            None => self.task(task_id).await,
        }
    }
}

fn job_request(task: &Task) -> JobRequest {
    JobRequest {
        task_id: task.id,
        owner_id: task.owner_id,
        resource_id: task.resource_id,
        max_units: task.max_units.and_then(|m| usize::try_from(m).ok()),
    }
}
