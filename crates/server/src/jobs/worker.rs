// crates/server/src/jobs/worker.rs
//! The download job: list a resource's units, fetch them, store them.

use std::sync::Arc;

use async_trait::async_trait;
use novel_dl_core::{BatchProgress, BatchRetriever, TaskStatus};
use novel_dl_db::Task;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::dispatcher::JobExecutor;
use super::types::JobRequest;
use crate::lifecycle::TaskLifecycle;

/// Drives one task from PENDING to a terminal state.
///
/// A batch COMPLETES when at least one unit was retrieved and FAILS when
/// none were; partial failures are summarised in the completion message.
/// A cancelled job returns without touching the task, the canceller owns
/// the TERMINATED transition.
pub struct DownloadWorker {
    lifecycle: TaskLifecycle,
    retriever: Arc<BatchRetriever>,
}

impl DownloadWorker {
    pub fn new(lifecycle: TaskLifecycle, retriever: Arc<BatchRetriever>) -> Self {
        Self {
            lifecycle,
            retriever,
        }
    }

    /// Apply a transition. A write the store keeps refusing ends the task
    /// as FAILED so it does not stay active without an execution.
    async fn advance(
        &self,
        task_id: i64,
        to: TaskStatus,
        progress: Option<i64>,
        message: &str,
    ) -> Result<Option<Task>, String> {
        match self.lifecycle.transition(task_id, to, progress, message).await {
            Ok(task) => Ok(task),
            Err(e) => {
                self.fail(task_id, format!("Failed to record {to} state: {e}"))
                    .await?;
                Ok(None)
            }
        }
    }

    async fn fail(&self, task_id: i64, message: String) -> Result<(), String> {
        warn!(task_id, reason = %message, "Task failed");
        if let Err(e) = self.lifecycle.fail(task_id, &message).await {
            warn!(task_id, error = %e, "Could not record task failure");
        }
        Err(message)
    }
}

#[async_trait]
impl JobExecutor for DownloadWorker {
    async fn execute(&self, job: JobRequest, cancel: CancellationToken) -> Result<(), String> {
        let task_id = job.task_id;

        let started = self
            .advance(task_id, TaskStatus::Downloading, Some(0), "Fetching chapter list")
            .await?;
        if started.is_none() {
            info!(task_id, "Task is no longer pending, skipping");
            return Ok(());
        }

        let listed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            listed = self.retriever.fetcher().list_units(job.resource_id) => listed,
        };
        let units = match listed {
            Ok(units) => units,
            Err(e) => {
                return self
                    .fail(task_id, format!("Failed to fetch chapter list: {e}"))
                    .await
            }
        };
        if units.is_empty() {
            return self
                .fail(task_id, format!("No units found for resource {}", job.resource_id))
                .await;
        }
        info!(task_id, resource_id = job.resource_id, units = units.len(), max_units = ?job.max_units, "Directory fetched");

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<BatchProgress>();
        let fetch = async {
            let report = self
                .retriever
                .retrieve(&units, job.max_units, &cancel, |p| {
                    let _ = progress_tx.send(p);
                })
                .await;
            drop(progress_tx);
            report
        };
        let record = async {
            while let Some(mut latest) = progress_rx.recv().await {
                while let Ok(newer) = progress_rx.try_recv() {
                    latest = newer;
                }
                let message = format!("Downloading: {}/{} units", latest.completed, latest.total);
                if let Err(e) = self
                    .lifecycle
                    .report_progress(task_id, latest.percent(), &message)
                    .await
                {
                    warn!(task_id, error = %e, "Could not record progress");
                }
            }
        };
        let (report, ()) = tokio::join!(fetch, record);

        if report.cancelled || cancel.is_cancelled() {
            info!(task_id, "Job cancelled during retrieval");
            return Ok(());
        }

        let total = report.total();
        let succeeded = report.succeeded();
        let failed = report.failed();
        if succeeded == 0 {
            let reason = report
                .first_failure()
                .unwrap_or_else(|| "no units attempted".to_string());
            return self
                .fail(task_id, format!("0/{total} units retrieved: {reason}"))
                .await;
        }

        let processing = self
            .advance(
                task_id,
                TaskStatus::Processing,
                Some(100),
                &format!("Saving {succeeded} units"),
            )
            .await?;
        if processing.is_none() {
            info!(task_id, "Task left DOWNLOADING before save, stopping");
            return Ok(());
        }

        let db = self.lifecycle.db();
        let saved = match db
            .ensure_placeholder(job.resource_id, &format!("Novel {}", job.resource_id))
            .await
        {
            Ok(resource) => db.persist_units(resource.id, &report).await,
            Err(e) => Err(e),
        };
        if let Err(e) = saved {
            return self.fail(task_id, format!("Failed to save units: {e}")).await;
        }

        let mut message = format!("{succeeded}/{total} units retrieved");
        if failed > 0 {
            if let Some(first) = report.first_failure() {
                message.push_str(&format!(" ({failed} failed; first: {first})"));
            }
        }
        if self
            .advance(task_id, TaskStatus::Completed, Some(100), &message)
            .await?
            .is_some()
        {
            info!(task_id, succeeded, failed, "Task completed");
        }
        Ok(())
    }
}
