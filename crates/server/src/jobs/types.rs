// crates/server/src/jobs/types.rs
//! Types for the job dispatcher.

use std::fmt;

use serde::Serialize;

/// Opaque reference to one dispatched execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ExecutionHandle(String);

impl ExecutionHandle {
    pub(crate) fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ExecutionHandle {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ExecutionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parameters of one download job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub task_id: i64,
    pub owner_id: i64,
    pub resource_id: i64,
    pub max_units: Option<usize>,
}

/// The worker pool's own view of an execution. Informational only; the
/// task record is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Queued,
    Started,
    Succeeded,
    Failed,
    Revoked,
}

impl ExecutionStatus {
    pub fn description(&self) -> &'static str {
        match self {
            ExecutionStatus::Queued => "Task is waiting.",
            ExecutionStatus::Started => "Task in progress.",
            ExecutionStatus::Succeeded => "Task completed.",
            ExecutionStatus::Failed => "Task failed.",
            ExecutionStatus::Revoked => "Task terminated.",
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Succeeded | ExecutionStatus::Failed | ExecutionStatus::Revoked
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_unique() {
        let a = ExecutionHandle::generate();
        let b = ExecutionHandle::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
        assert_eq!(ExecutionHandle::from(a.to_string()), a);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ExecutionStatus::Revoked).unwrap();
        assert_eq!(json, "\"REVOKED\"");
        assert!(ExecutionStatus::Revoked.is_done());
        assert!(!ExecutionStatus::Started.is_done());
    }
}
