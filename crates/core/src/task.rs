//! Task lifecycle states and the transition table.
//!
//! ```text
//! PENDING -> DOWNLOADING -> PROCESSING -> COMPLETED
//! PENDING | DOWNLOADING | PROCESSING -> FAILED
//! PENDING | DOWNLOADING | PROCESSING -> TERMINATED
//! COMPLETED | FAILED | TERMINATED -> PENDING   (redownload)
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a download task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Downloading,
    Processing,
    Completed,
    Failed,
    Terminated,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Downloading,
        TaskStatus::Processing,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Terminated,
    ];

    /// States in which a task counts against the one-active-task-per-pair rule.
    pub const ACTIVE: [TaskStatus; 3] = [
        TaskStatus::Pending,
        TaskStatus::Downloading,
        TaskStatus::Processing,
    ];

    pub const FINISHED: [TaskStatus; 3] = [
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Terminated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Downloading => "DOWNLOADING",
            TaskStatus::Processing => "PROCESSING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Terminated => "TERMINATED",
        }
    }

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    pub fn is_finished(&self) -> bool {
        !self.is_active()
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (*self, next),
            (Pending, Downloading)
                | (Downloading, Processing)
                | (Processing, Completed)
                | (Pending | Downloading | Processing, Failed)
                | (Pending | Downloading | Processing, Terminated)
                | (Completed | Failed | Terminated, Pending)
        )
    }

    /// Every state from which `next` may be entered.
    pub fn predecessors(next: TaskStatus) -> Vec<TaskStatus> {
        Self::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(next))
            .collect()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for TaskStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}
