use std::time::Duration;

use thiserror::Error;

use crate::domain::{AlertId, Channel, OwnerId, TaskId};

#[derive(Debug, Error)]
pub enum TaskbellError {
    #[error("validation failed on {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("task not found: owner={owner} task={task_id}")]
    TaskNotFound { owner: OwnerId, task_id: TaskId },

    #[error("alert not found: owner={owner} alert={alert_id}")]
    AlertNotFound { owner: OwnerId, alert_id: AlertId },

    /// A state transition or insert lost against the current state.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("dispatch failed: {0}")]
    Dispatch(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),
}

impl TaskbellError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }
}

/// Per-channel delivery failure reported by a `Notifier`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotifyError {
    #[error("channel {0} unavailable: {1}")]
    Unavailable(Channel, String),

    #[error("channel {0} rejected the message: {1}")]
    Rejected(Channel, String),

    #[error("channel {0} timed out after {1:?}")]
    Timeout(Channel, Duration),

    #[error("no notifier registered for channel {0}")]
    NoNotifier(Channel),
}

pub type Result<T, E = TaskbellError> = std::result::Result<T, E>;
