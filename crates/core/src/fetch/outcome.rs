//! Per-unit results produced by the Unit Fetcher.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One entry of a work's directory: the unit id plus its provisional label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRef {
    pub id: String,
    pub title: String,
}

impl UnitRef {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}

/// A successfully retrieved unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub id: String,
    /// Label resolved from the payload, or the directory title as fallback.
    pub label: String,
    pub content: String,
}

/// Failure kinds that are retried inside the fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransientError {
    Timeout,
    Network(String),
}

impl fmt::Display for TransientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransientError::Timeout => f.write_str("request timed out"),
            TransientError::Network(msg) => write!(f, "network error: {msg}"),
        }
    }
}

/// Result of fetching one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Retrieved(Unit),
    /// Upstream answered successfully but the payload was empty.
    EmptyContent { label: String },
    /// Upstream rejected the request at the application level. Not retried.
    TerminalApiError { label: String, message: String },
    /// Every attempt failed with a transient error.
    ExhaustedRetries {
        label: String,
        attempts: u32,
        last_error: TransientError,
    },
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Retrieved(_))
    }

    pub fn label(&self) -> &str {
        match self {
            FetchOutcome::Retrieved(unit) => &unit.label,
            FetchOutcome::EmptyContent { label }
            | FetchOutcome::TerminalApiError { label, .. }
            | FetchOutcome::ExhaustedRetries { label, .. } => label,
        }
    }

    pub fn unit(&self) -> Option<&Unit> {
        match self {
            FetchOutcome::Retrieved(unit) => Some(unit),
            _ => None,
        }
    }

    /// Human-readable failure cause, `None` on success.
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            FetchOutcome::Retrieved(_) => None,
            FetchOutcome::EmptyContent { label } => Some(format!("{label}: empty content")),
            FetchOutcome::TerminalApiError { label, message } => {
                Some(format!("{label}: upstream error: {message}"))
            }
            FetchOutcome::ExhaustedRetries {
                label,
                attempts,
                last_error,
            } => Some(format!(
                "{label}: gave up after {attempts} attempts ({last_error})"
            )),
        }
    }
}
