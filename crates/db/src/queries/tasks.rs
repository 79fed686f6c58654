//! Download task records: admission, guarded transitions, and reconciliation.
//!
//! Every mutation is a single `UPDATE ... WHERE status IN (...) RETURNING`
//! statement, so two concurrent transitions on the same task are linearized by
//! SQLite and the loser observes `None`.

use novel_dl_core::TaskStatus;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, info, warn};

use super::catalog::insert_placeholder;
use crate::{now_ts, Database, DbResult};

const TASK_COLUMNS: &str = "id, user_id, novel_id, status, progress, message, \
     execution_handle, max_units, created_at, updated_at";

/// One acquisition job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub id: i64,
    pub owner_id: i64,
    pub resource_id: i64,
    pub status: TaskStatus,
    pub progress: i64,
    pub message: Option<String>,
    pub execution_handle: Option<String>,
    /// Preview cap applied on every run of this task.
    pub max_units: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for Task {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        let status = status
            .parse::<TaskStatus>()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        Ok(Self {
            id: row.try_get("id")?,
            owner_id: row.try_get("user_id")?,
            resource_id: row.try_get("novel_id")?,
            status,
            progress: row.try_get("progress")?,
            message: row.try_get("message")?,
            execution_handle: row.try_get("execution_handle")?,
            max_units: row.try_get("max_units")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Result of an admission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// A new PENDING task was created.
    Admitted(Task),
    /// An active task already exists for the pair; nothing was created.
    Conflict(Task),
}

impl Admission {
    pub fn task(&self) -> &Task {
        match self {
            Admission::Admitted(t) | Admission::Conflict(t) => t,
        }
    }
}

/// `'A','B'` list for an `IN (...)` clause. Only ever fed enum names.
fn status_list(states: &[TaskStatus]) -> String {
    states
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

impl Database {
    /// Create a PENDING task for `(owner_id, resource_id)` unless one is active.
    ///
    /// Runs in one transaction: placeholder catalog entry, active-task check,
    /// insert. The placeholder insert is the first statement so the
    /// transaction takes the write lock before it reads. A concurrent winner
    /// that slips past the check is caught by the partial unique index and
    /// reported as a conflict.
    pub async fn admit(
        &self,
        owner_id: i64,
        resource_id: i64,
        max_units: Option<i64>,
    ) -> DbResult<Admission> {
        let now = now_ts();
        let mut tx = self.pool().begin().await?;

        insert_placeholder(&mut *tx, resource_id, &format!("Novel {resource_id}"), now).await?;

        let existing: Option<Task> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM download_tasks \
             WHERE user_id = ? AND novel_id = ? AND status IN ({}) \
             ORDER BY id DESC LIMIT 1",
            status_list(&TaskStatus::ACTIVE)
        ))
        .bind(owner_id)
        .bind(resource_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(task) = existing {
            tx.commit().await?;
            debug!(task_id = task.id, owner_id, resource_id, "Admission conflict");
            return Ok(Admission::Conflict(task));
        }

        let inserted: Result<Task, sqlx::Error> = sqlx::query_as(&format!(
            "INSERT INTO download_tasks \
             (user_id, novel_id, status, progress, message, max_units, created_at, updated_at) \
             VALUES (?, ?, 'PENDING', 0, 'Task queued', ?, ?, ?) \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(owner_id)
        .bind(resource_id)
        .bind(max_units)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await;

        match inserted {
            Ok(task) => {
                tx.commit().await?;
                info!(task_id = task.id, owner_id, resource_id, "Task admitted");
                Ok(Admission::Admitted(task))
            }
            Err(e) if is_unique_violation(&e) => {
                tx.rollback().await?;
                warn!(owner_id, resource_id, "Lost admission race");
                match self.active_task(owner_id, resource_id).await? {
                    Some(task) => Ok(Admission::Conflict(task)),
                    None => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The active task for a pair, if any.
    pub async fn active_task(&self, owner_id: i64, resource_id: i64) -> DbResult<Option<Task>> {
        let task = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM download_tasks \
             WHERE user_id = ? AND novel_id = ? AND status IN ({}) \
             ORDER BY id DESC LIMIT 1",
            status_list(&TaskStatus::ACTIVE)
        ))
        .bind(owner_id)
        .bind(resource_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(task)
    }

    pub async fn get_task(&self, id: i64) -> DbResult<Option<Task>> {
        let task = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM download_tasks WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        Ok(task)
    }

    /// Tasks newest first, optionally restricted to one owner.
    pub async fn list_tasks(&self, owner_id: Option<i64>) -> DbResult<Vec<Task>> {
        let tasks = match owner_id {
            Some(owner) => {
                sqlx::query_as(&format!(
                    "SELECT {TASK_COLUMNS} FROM download_tasks WHERE user_id = ? \
                     ORDER BY created_at DESC, id DESC"
                ))
                .bind(owner)
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT {TASK_COLUMNS} FROM download_tasks ORDER BY created_at DESC, id DESC"
                ))
                .fetch_all(self.pool())
                .await?
            }
        };
        Ok(tasks)
    }

    /// Atomically move a task to `to` if its current state allows it.
    ///
    /// Returns `None` when the task does not exist or the edge is not legal
    /// from its current state. Progress never decreases except on the reset
    /// into PENDING; `progress = None` keeps the stored value. Entering
    /// PENDING also clears the execution handle.
    pub async fn transition(
        &self,
        id: i64,
        to: TaskStatus,
        progress: Option<i64>,
        message: &str,
    ) -> DbResult<Option<Task>> {
        let from = TaskStatus::predecessors(to);
        if from.is_empty() {
            return Ok(None);
        }
        let progress = progress.map(|p| p.clamp(0, 100));

        let (progress_expr, handle_expr) = if to == TaskStatus::Pending {
            ("COALESCE(?, progress)", "NULL")
        } else {
            ("MAX(progress, COALESCE(?, progress))", "execution_handle")
        };

        let task: Option<Task> = sqlx::query_as(&format!(
            "UPDATE download_tasks \
             SET status = ?, progress = {progress_expr}, message = ?, \
                 execution_handle = {handle_expr}, updated_at = ? \
             WHERE id = ? AND status IN ({}) \
             RETURNING {TASK_COLUMNS}",
            status_list(&from)
        ))
        .bind(to.as_str())
        .bind(progress)
        .bind(message)
        .bind(now_ts())
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        match &task {
            Some(t) => debug!(task_id = id, status = %t.status, progress = t.progress, "Task transitioned"),
            None => debug!(task_id = id, to = %to, "Transition rejected"),
        }
        Ok(task)
    }

    /// Raise progress of a DOWNLOADING task. Lower values are ignored.
    pub async fn update_progress(
        &self,
        id: i64,
        progress: i64,
        message: &str,
    ) -> DbResult<Option<Task>> {
        let task = sqlx::query_as(&format!(
            "UPDATE download_tasks \
             SET progress = MAX(progress, ?), message = ?, updated_at = ? \
             WHERE id = ? AND status = 'DOWNLOADING' \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(progress.clamp(0, 100))
        .bind(message)
        .bind(now_ts())
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        Ok(task)
    }

    /// Record the execution handle of an active task.
    pub async fn assign_handle(&self, id: i64, handle: &str) -> DbResult<Option<Task>> {
        let task = sqlx::query_as(&format!(
            "UPDATE download_tasks SET execution_handle = ?, updated_at = ? \
             WHERE id = ? AND status IN ({}) \
             RETURNING {TASK_COLUMNS}",
            status_list(&TaskStatus::ACTIVE)
        ))
        .bind(handle)
        .bind(now_ts())
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        Ok(task)
    }

    /// Forget the execution handle, whatever the state.
    pub async fn clear_handle(&self, id: i64) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE download_tasks SET execution_handle = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(now_ts())
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove a task record. Returns whether a row existed.
    pub async fn delete_task(&self, id: i64) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM download_tasks WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Fail every task left active by a previous process.
    pub async fn fail_orphaned_tasks(&self, message: &str) -> DbResult<Vec<Task>> {
        let tasks: Vec<Task> = sqlx::query_as(&format!(
            "UPDATE download_tasks \
             SET status = 'FAILED', message = ?, execution_handle = NULL, updated_at = ? \
             WHERE status IN ({}) \
             RETURNING {TASK_COLUMNS}",
            status_list(&TaskStatus::ACTIVE)
        ))
        .bind(message)
        .bind(now_ts())
        .fetch_all(self.pool())
        .await?;
        if !tasks.is_empty() {
            info!(count = tasks.len(), "Failed tasks orphaned by restart");
        }
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn db() -> Database {
        Database::new_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn test_admit_creates_pending_task_and_placeholder() {
        let db = db().await;
        let admission = db.admit(1, 42, Some(5)).await.unwrap();

        let Admission::Admitted(task) = admission else {
            panic!("expected admission");
        };
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress, 0);
        assert_eq!(task.owner_id, 1);
        assert_eq!(task.resource_id, 42);
        assert_eq!(task.max_units, Some(5));
        assert!(task.execution_handle.is_none());

        let resource = db.get_resource(42).await.unwrap().unwrap();
        assert_eq!(resource.title, "Novel 42");
    }

    #[tokio::test]
    async fn test_second_admit_conflicts_with_existing() {
        let db = db().await;
        let first = db.admit(1, 42, None).await.unwrap();
        let second = db.admit(1, 42, None).await.unwrap();

        assert!(matches!(second, Admission::Conflict(_)));
        assert_eq!(second.task().id, first.task().id);
        assert_eq!(db.list_tasks(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_other_owner_or_resource_is_independent() {
        let db = db().await;
        assert!(matches!(db.admit(1, 42, None).await.unwrap(), Admission::Admitted(_)));
        assert!(matches!(db.admit(2, 42, None).await.unwrap(), Admission::Admitted(_)));
        assert!(matches!(db.admit(1, 43, None).await.unwrap(), Admission::Admitted(_)));
    }

    #[tokio::test]
    async fn test_admit_after_finish_creates_new_task() {
        let db = db().await;
        let first = db.admit(1, 42, None).await.unwrap().task().clone();
        db.transition(first.id, TaskStatus::Failed, None, "boom")
            .await
            .unwrap()
            .unwrap();

        let again = db.admit(1, 42, None).await.unwrap();
        assert!(matches!(again, Admission::Admitted(ref t) if t.id != first.id));
    }

    #[tokio::test]
    async fn test_transition_follows_lifecycle() {
        let db = db().await;
        let id = db.admit(1, 1, None).await.unwrap().task().id;

        // PENDING -> PROCESSING is not an edge.
        assert!(db
            .transition(id, TaskStatus::Processing, None, "x")
            .await
            .unwrap()
            .is_none());

        let t = db
            .transition(id, TaskStatus::Downloading, Some(0), "Fetching chapter list")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(t.status, TaskStatus::Downloading);

        let t = db
            .transition(id, TaskStatus::Processing, Some(100), "Saving")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(t.progress, 100);

        let t = db
            .transition(id, TaskStatus::Completed, None, "done")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(t.status, TaskStatus::Completed);
        assert_eq!(t.message.as_deref(), Some("done"));

        // Finished tasks ignore everything but the redownload reset.
        assert!(db
            .transition(id, TaskStatus::Terminated, None, "late")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_progress_never_decreases_until_reset() {
        let db = db().await;
        let id = db.admit(1, 1, None).await.unwrap().task().id;
        db.transition(id, TaskStatus::Downloading, None, "go").await.unwrap();
        db.assign_handle(id, "h-1").await.unwrap();

        assert_eq!(db.update_progress(id, 40, "a").await.unwrap().unwrap().progress, 40);
        assert_eq!(db.update_progress(id, 20, "b").await.unwrap().unwrap().progress, 40);
        let failed = db
            .transition(id, TaskStatus::Failed, Some(10), "x")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failed.progress, 40);

        let reset = db
            .transition(id, TaskStatus::Pending, Some(0), "Re-download requested")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reset.progress, 0);
        assert!(reset.execution_handle.is_none());
    }

    #[tokio::test]
    async fn test_update_progress_only_while_downloading() {
        let db = db().await;
        let id = db.admit(1, 1, None).await.unwrap().task().id;
        assert!(db.update_progress(id, 10, "early").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_assign_and_clear_handle() {
        let db = db().await;
        let id = db.admit(1, 1, None).await.unwrap().task().id;
        let t = db.assign_handle(id, "job-1").await.unwrap().unwrap();
        assert_eq!(t.execution_handle.as_deref(), Some("job-1"));

        assert!(db.clear_handle(id).await.unwrap());
        assert!(db.get_task(id).await.unwrap().unwrap().execution_handle.is_none());
        assert!(!db.clear_handle(999).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_tasks_newest_first_per_owner() {
        let db = db().await;
        let a = db.admit(1, 1, None).await.unwrap().task().id;
        let b = db.admit(1, 2, None).await.unwrap().task().id;
        db.admit(2, 3, None).await.unwrap();

        let ids: Vec<i64> = db.list_tasks(Some(1)).await.unwrap().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![b, a]);
        assert_eq!(db.list_tasks(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_delete_task() {
        let db = db().await;
        let id = db.admit(1, 1, None).await.unwrap().task().id;
        assert!(db.delete_task(id).await.unwrap());
        assert!(!db.delete_task(id).await.unwrap());
        assert!(db.get_task(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fail_orphaned_tasks() {
        let db = db().await;
        let active = db.admit(1, 1, None).await.unwrap().task().id;
        let done = db.admit(1, 2, None).await.unwrap().task().id;
        db.transition(done, TaskStatus::Terminated, None, "stop").await.unwrap();

        let failed = db.fail_orphaned_tasks("Interrupted by server restart").await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, active);
        assert_eq!(failed[0].status, TaskStatus::Failed);
        assert_eq!(
            db.get_task(done).await.unwrap().unwrap().status,
            TaskStatus::Terminated
        );
    }
}
