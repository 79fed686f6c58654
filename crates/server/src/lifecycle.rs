// crates/server/src/lifecycle.rs
//! Task mutations paired with their push events.
//!
//! Task writes after admission go through `TaskLifecycle`, so each state,
//! progress or message change is followed by exactly one publish to the
//! owner.

use std::future::Future;
use std::time::Duration;

use novel_dl_core::TaskStatus;
use novel_dl_db::{Database, DbError, DbResult, Task};
use thiserror::Error;
use tracing::{debug, warn};

use crate::jobs::ExecutionHandle;
use crate::notify::{NotificationBus, ServerMessage};

const STORE_ATTEMPTS: u32 = 3;
const STORE_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Another task for the same (owner, resource) pair is active.
    #[error("another task for this resource is already active")]
    ActiveConflict,

    #[error("task store unavailable after {attempts} attempts: {source}")]
    Unavailable {
        attempts: u32,
        #[source]
        source: DbError,
    },
}

#[derive(Clone)]
pub struct TaskLifecycle {
    db: Database,
    bus: NotificationBus,
}

impl TaskLifecycle {
    pub fn new(db: Database, bus: NotificationBus) -> Self {
        Self { db, bus }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Apply a state transition and publish the result.
    ///
    /// `Ok(None)` means the edge is not legal from the task's current state
    /// (or the task is gone); nothing is written or published.
    pub async fn transition(
        &self,
        task_id: i64,
        to: TaskStatus,
        progress: Option<i64>,
        message: &str,
    ) -> Result<Option<Task>, LifecycleError> {
        let db = &self.db;
        let task = self
            .with_retry("transition", task_id, || {
                db.transition(task_id, to, progress, message)
            })
            .await?;
        self.announce(task.as_ref());
        Ok(task)
    }

    pub async fn fail(&self, task_id: i64, message: &str) -> Result<Option<Task>, LifecycleError> {
        self.transition(task_id, TaskStatus::Failed, None, message).await
    }

    /// Raise the progress of a downloading task.
    pub async fn report_progress(
        &self,
        task_id: i64,
        percent: u8,
        message: &str,
    ) -> Result<Option<Task>, LifecycleError> {
        let db = &self.db;
        let task = self
            .with_retry("progress", task_id, || {
                db.update_progress(task_id, i64::from(percent), message)
            })
            .await?;
        self.announce(task.as_ref());
        Ok(task)
    }

    /// Record the execution handle of an active task. Not published: push
    /// events do not carry the handle.
    pub async fn assign_handle(
        &self,
        task_id: i64,
        handle: &ExecutionHandle,
    ) -> Result<Option<Task>, LifecycleError> {
        let db = &self.db;
        self.with_retry("assign_handle", task_id, || {
            db.assign_handle(task_id, handle.as_str())
        })
        .await
    }

    /// Publish the current state of a task written outside the lifecycle,
    /// such as a freshly admitted one.
    pub fn publish(&self, task: &Task) {
        self.announce(Some(task));
    }

    /// Delete a task record and tell the owner. `Ok(false)` means it was
    /// already gone.
    pub async fn remove(&self, owner_id: i64, task_id: i64) -> Result<bool, LifecycleError> {
        let db = &self.db;
        let removed = self
            .with_retry("delete", task_id, || db.delete_task(task_id))
            .await?;
        if removed {
            self.deleted(owner_id, task_id);
        }
        Ok(removed)
    }

    /// Tell the owner a task record is gone.
    fn deleted(&self, owner_id: i64, task_id: i64) {
        self.bus
            .publish(owner_id, &ServerMessage::task_deleted(task_id, owner_id));
    }

    fn announce(&self, task: Option<&Task>) {
        if let Some(task) = task {
            self.bus
                .publish(task.owner_id, &ServerMessage::task_update(task));
        }
    }

    async fn with_retry<T, F, Fut>(
        &self,
        op: &'static str,
        task_id: i64,
        mut f: F,
    ) -> Result<T, LifecycleError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_unique_violation() => {
                    debug!(task_id, op, "Write refused by the one-active-task rule");
                    return Err(LifecycleError::ActiveConflict);
                }
                Err(e) if attempt >= STORE_ATTEMPTS => {
                    return Err(LifecycleError::Unavailable {
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => {
                    warn!(task_id, op, attempt, error = %e, "Task store write failed, retrying");
                    tokio::time::sleep(STORE_BACKOFF * 2u32.pow(attempt - 1)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::ConnectionRegistry;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    async fn setup() -> (TaskLifecycle, mpsc::UnboundedReceiver<String>) {
        let db = Database::new_in_memory().await.unwrap();
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let id = registry.register(tx);
        registry.bind(id, 1);
        (TaskLifecycle::new(db, NotificationBus::new(registry)), rx)
    }

    fn next_event(rx: &mut mpsc::UnboundedReceiver<String>) -> serde_json::Value {
        serde_json::from_str(&rx.try_recv().expect("event published")).unwrap()
    }

    #[tokio::test]
    async fn test_transition_publishes_once() {
        let (lifecycle, mut rx) = setup().await;
        let task = lifecycle.db().admit(1, 42, None).await.unwrap().task().clone();

        let moved = lifecycle
            .transition(task.id, TaskStatus::Downloading, Some(0), "Fetching chapter list")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(moved.status, TaskStatus::Downloading);

        let event = next_event(&mut rx);
        assert_eq!(event["type"], "task_update");
        assert_eq!(event["state"], "DOWNLOADING");
        assert_eq!(event["message"], "Fetching chapter list");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_illegal_transition_is_silent() {
        let (lifecycle, mut rx) = setup().await;
        let task = lifecycle.db().admit(1, 42, None).await.unwrap().task().clone();

        let result = lifecycle
            .transition(task.id, TaskStatus::Completed, Some(100), "done")
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let (lifecycle, mut rx) = setup().await;
        let task = lifecycle.db().admit(1, 42, None).await.unwrap().task().clone();
        lifecycle
            .transition(task.id, TaskStatus::Downloading, Some(0), "start")
            .await
            .unwrap();
        next_event(&mut rx);

        lifecycle.report_progress(task.id, 60, "6/10").await.unwrap();
        let stale = lifecycle.report_progress(task.id, 40, "4/10").await.unwrap().unwrap();
        assert_eq!(stale.progress, 60);

        assert_eq!(next_event(&mut rx)["progress"], 60);
        assert_eq!(next_event(&mut rx)["progress"], 60);
    }

    #[tokio::test]
    async fn test_reset_into_second_active_task_is_conflict() {
        let (lifecycle, _rx) = setup().await;
        let old = lifecycle.db().admit(1, 42, None).await.unwrap().task().clone();
        lifecycle.fail(old.id, "boom").await.unwrap();
        lifecycle.db().admit(1, 42, None).await.unwrap();

        let err = lifecycle
            .transition(old.id, TaskStatus::Pending, Some(0), "Re-download requested.")
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::ActiveConflict));
    }

    #[tokio::test]
    async fn test_remove_publishes_deleted_event() {
        let (lifecycle, mut rx) = setup().await;
        let task = lifecycle.db().admit(1, 42, None).await.unwrap().task().clone();

        assert!(lifecycle.remove(1, task.id).await.unwrap());
        let event = next_event(&mut rx);
        assert_eq!(event["type"], "task_deleted");
        assert_eq!(event["task_id"], task.id);
        assert!(lifecycle.db().get_task(task.id).await.unwrap().is_none());

        // A second remove finds nothing and stays quiet.
        assert!(!lifecycle.remove(1, task.id).await.unwrap());
        assert!(rx.try_recv().is_err());
    }
}
