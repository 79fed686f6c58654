// crates/server/src/jobs/mod.rs
//! In-process job dispatch for download tasks.
//!
//! Provides:
//! - `JobDispatcher`: bounded queue feeding a fixed pool of workers
//! - `JobExecutor`: the unit of work a worker runs
//! - `DownloadWorker`: the executor that fetches and persists a resource
//! - `ExecutionHandle`: opaque reference to one dispatched execution

pub mod dispatcher;
pub mod types;
pub mod worker;

pub use dispatcher::{DispatchError, JobDispatcher, JobExecutor};
pub use types::{ExecutionHandle, ExecutionStatus, JobRequest};
pub use worker::DownloadWorker;
