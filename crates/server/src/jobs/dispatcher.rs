// crates/server/src/jobs/dispatcher.rs
//! Bounded queue feeding a fixed pool of job workers.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::types::{ExecutionHandle, ExecutionStatus, JobRequest};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("job queue is full")]
    QueueFull,

    #[error("job queue is closed")]
    QueueClosed,
}

/// The work a dispatched job performs.
///
/// `cancel` fires when the execution is revoked. Executors should check it
/// between units of work; one that ignores it is aborted after the
/// dispatcher's cancel grace period.
#[async_trait]
pub trait JobExecutor: Send + Sync + 'static {
    async fn execute(&self, job: JobRequest, cancel: CancellationToken) -> Result<(), String>;
}

struct Execution {
    task_id: i64,
    status: ExecutionStatus,
    cancel: CancellationToken,
    abort: Option<AbortHandle>,
}

/// Finished executions kept for status queries; older ones are pruned.
pub const FINISHED_RETENTION: usize = 256;

#[derive(Default)]
struct ExecutionTable {
    entries: HashMap<ExecutionHandle, Execution>,
    /// Finished handles, oldest first.
    finished: VecDeque<ExecutionHandle>,
}

impl ExecutionTable {
    fn finish(&mut self, handle: &ExecutionHandle, status: ExecutionStatus) {
        let Some(exec) = self.entries.get_mut(handle) else {
            return;
        };
        exec.status = status;
        exec.abort = None;
        self.finished.push_back(handle.clone());
        while self.finished.len() > FINISHED_RETENTION {
            if let Some(oldest) = self.finished.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    fn remove(&mut self, handle: &ExecutionHandle) -> Option<Execution> {
        let exec = self.entries.remove(handle)?;
        self.finished.retain(|h| h != handle);
        Some(exec)
    }
}

type Executions = Arc<RwLock<ExecutionTable>>;

struct Queued {
    handle: ExecutionHandle,
    request: JobRequest,
    cancel: CancellationToken,
}

pub struct JobDispatcher {
    tx: mpsc::Sender<Queued>,
    executions: Executions,
    closed: AtomicBool,
    cancel_grace: Duration,
}

impl JobDispatcher {
    /// Spawn `workers` workers draining a queue of `capacity` pending jobs.
    pub fn start(
        executor: Arc<dyn JobExecutor>,
        workers: usize,
        capacity: usize,
        cancel_grace: Duration,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<Queued>(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let executions: Executions = Arc::default();

        for worker in 0..workers.max(1) {
            let rx = Arc::clone(&rx);
            let executor = Arc::clone(&executor);
            let executions = Arc::clone(&executions);
            tokio::spawn(async move {
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(job) = next else { break };
                    run_one(worker, &executor, &executions, job).await;
                }
            });
        }

        Arc::new(Self {
            tx,
            executions,
            closed: AtomicBool::new(false),
            cancel_grace,
        })
    }

    /// Queue a job. Returns immediately with the handle of the execution.
    pub fn dispatch(&self, request: JobRequest) -> Result<ExecutionHandle, DispatchError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DispatchError::QueueClosed);
        }

        let handle = ExecutionHandle::generate();
        let cancel = CancellationToken::new();
        let task_id = request.task_id;
        self.set(
            &handle,
            Execution {
                task_id,
                status: ExecutionStatus::Queued,
                cancel: cancel.clone(),
                abort: None,
            },
        );

        let queued = Queued {
            handle: handle.clone(),
            request,
            cancel,
        };
        match self.tx.try_send(queued) {
            Ok(()) => {
                info!(task_id, handle = %handle, "Job queued");
                Ok(handle)
            }
            Err(e) => {
                self.forget(&handle);
                let err = match e {
                    mpsc::error::TrySendError::Full(_) => DispatchError::QueueFull,
                    mpsc::error::TrySendError::Closed(_) => DispatchError::QueueClosed,
                };
                warn!(task_id, error = %err, "Dispatch refused");
                Err(err)
            }
        }
    }

    /// Signal an execution to stop, then abort it once the grace period
    /// passes. Returns false when the handle is unknown or already done.
    pub fn cancel(&self, handle: &ExecutionHandle) -> bool {
        let signalled = match self.executions.write() {
            Ok(mut table) => match table.entries.get_mut(handle) {
                Some(exec) if !exec.status.is_done() => {
                    exec.cancel.cancel();
                    if exec.status == ExecutionStatus::Queued {
                        exec.status = ExecutionStatus::Revoked;
                    }
                    info!(task_id = exec.task_id, handle = %handle, "Cancellation signalled");
                    true
                }
                _ => false,
            },
            Err(e) => {
                error!("RwLock poisoned cancelling execution: {e}");
                false
            }
        };

        if signalled {
            let executions = Arc::clone(&self.executions);
            let handle = handle.clone();
            let grace = self.cancel_grace;
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                let abort = match executions.read() {
                    Ok(table) => table.entries.get(&handle).and_then(|e| e.abort.clone()),
                    Err(_) => None,
                };
                if let Some(abort) = abort {
                    if !abort.is_finished() {
                        warn!(handle = %handle, "Execution ignored cancellation, aborting");
                        abort.abort();
                    }
                }
            });
        }
        signalled
    }

    /// Drop the record of an execution. A running execution keeps running
    /// unless it was already cancelled, in which case it is aborted now.
    pub fn forget(&self, handle: &ExecutionHandle) -> bool {
        match self.executions.write() {
            Ok(mut table) => match table.remove(handle) {
                Some(exec) => {
                    if exec.cancel.is_cancelled() {
                        if let Some(abort) = exec.abort {
                            abort.abort();
                        }
                    }
                    true
                }
                None => false,
            },
            Err(e) => {
                error!("RwLock poisoned forgetting execution: {e}");
                false
            }
        }
    }

    pub fn status(&self, handle: &ExecutionHandle) -> Option<ExecutionStatus> {
        match self.executions.read() {
            Ok(table) => table.entries.get(handle).map(|e| e.status),
            Err(e) => {
                error!("RwLock poisoned reading executions: {e}");
                None
            }
        }
    }

    /// Executions not yet finished, queued ones included.
    pub fn in_flight(&self) -> usize {
        match self.executions.read() {
            Ok(table) => table.entries.values().filter(|e| !e.status.is_done()).count(),
            Err(_) => 0,
        }
    }

    /// Jobs waiting in the queue for a worker.
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Refuse further dispatches and signal every running execution.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Ok(table) = self.executions.read() {
            for exec in table.entries.values().filter(|e| !e.status.is_done()) {
                exec.cancel.cancel();
            }
        }
        info!("Job dispatcher closed");
    }

    fn set(&self, handle: &ExecutionHandle, exec: Execution) {
        match self.executions.write() {
            Ok(mut table) => {
                table.entries.insert(handle.clone(), exec);
            }
            Err(e) => error!("RwLock poisoned writing executions: {e}"),
        }
    }
}

async fn run_one(
    worker: usize,
    executor: &Arc<dyn JobExecutor>,
    executions: &Executions,
    job: Queued,
) {
    let Queued {
        handle,
        request,
        cancel,
    } = job;
    let task_id = request.task_id;

    if cancel.is_cancelled() {
        finish(executions, &handle, ExecutionStatus::Revoked);
        return;
    }

    let exec = Arc::clone(executor);
    let token = cancel.clone();
    let join = tokio::spawn(async move { exec.execute(request, token).await });

    match executions.write() {
        Ok(mut table) => {
            if let Some(e) = table.entries.get_mut(&handle) {
                if e.status == ExecutionStatus::Queued {
                    e.status = ExecutionStatus::Started;
                }
                e.abort = Some(join.abort_handle());
            }
        }
        Err(e) => error!("RwLock poisoned starting execution: {e}"),
    }
    info!(worker, task_id, handle = %handle, "Job started");

    let result = join.await;
    let status = if cancel.is_cancelled() {
        ExecutionStatus::Revoked
    } else {
        match result {
            Ok(Ok(())) => ExecutionStatus::Succeeded,
            Ok(Err(e)) => {
                warn!(task_id, handle = %handle, error = %e, "Job failed");
                ExecutionStatus::Failed
            }
            Err(e) if e.is_cancelled() => ExecutionStatus::Revoked,
            Err(e) => {
                error!(task_id, handle = %handle, error = %e, "Job panicked");
                ExecutionStatus::Failed
            }
        }
    };
    finish(executions, &handle, status);
    info!(worker, task_id, handle = %handle, status = ?status, "Job finished");
}

fn finish(executions: &Executions, handle: &ExecutionHandle, status: ExecutionStatus) {
    match executions.write() {
        Ok(mut table) => table.finish(handle, status),
        Err(e) => error!("RwLock poisoned finishing execution: {e}"),
    }
}
