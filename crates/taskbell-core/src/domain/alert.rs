//! Alert model: one reminder derived from one task offset.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AlertId, Channel, OwnerId, TaskId};
use super::task::Priority;

/// Alert state.
///
/// State transitions:
/// - Pending -> Sent -> Read
/// - Pending -> Failed (retries exhausted)
/// - Pending -> Cancelled (task completed, deleted or rescheduled)
///
/// Every transition is a compare-and-swap on the current state: asking for a
/// transition the current state does not allow is a no-op that reports `false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    Pending,
    Sent,
    Failed,
    Cancelled,
    Read,
}

impl AlertState {
    /// No further delivery will be attempted.
    pub fn is_settled(self) -> bool {
        !matches!(self, AlertState::Pending)
    }
}

/// Label derived from the offset magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Fires at the scheduled time itself.
    Due,
    /// Within the urgent threshold.
    Urgent,
    /// Within the hour.
    Reminder,
    /// Early heads-up.
    Advance,
}

impl AlertKind {
    pub fn label(self) -> &'static str {
        match self {
            AlertKind::Due => "due",
            AlertKind::Urgent => "urgent",
            AlertKind::Reminder => "reminder",
            AlertKind::Advance => "advance",
        }
    }
}

/// Planner output: everything an alert needs except identity and state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertDraft {
    pub task_id: TaskId,
    pub owner_id: OwnerId,
    pub revision: u32,
    pub offset: Duration,
    pub kind: AlertKind,
    pub priority: Priority,
    pub title: String,
    pub task_scheduled_time: DateTime<Utc>,
    pub fire_at: DateTime<Utc>,
    pub channels: Vec<Channel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub task_id: TaskId,
    pub owner_id: OwnerId,
    pub revision: u32,
    pub offset: Duration,
    pub kind: AlertKind,
    pub priority: Priority,
    pub title: String,
    pub task_scheduled_time: DateTime<Utc>,
    pub fire_at: DateTime<Utc>,
    pub channels: Vec<Channel>,
    pub state: AlertState,

    /// Delivery attempts that failed so far.
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Earliest time the retry pass may pick this alert up again.
    pub retry_at: Option<DateTime<Utc>>,
    /// In-flight lease; another trigger must not dispatch before it expires.
    pub claimed_until: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn from_draft(id: AlertId, draft: AlertDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            task_id: draft.task_id,
            owner_id: draft.owner_id,
            revision: draft.revision,
            offset: draft.offset,
            kind: draft.kind,
            priority: draft.priority,
            title: draft.title,
            task_scheduled_time: draft.task_scheduled_time,
            fire_at: draft.fire_at,
            channels: draft.channels,
            state: AlertState::Pending,
            attempts: 0,
            last_error: None,
            retry_at: None,
            claimed_until: None,
            created_at: now,
            sent_at: None,
            read_at: None,
            settled_at: None,
        }
    }

    /// Uniqueness key: one alert per task schedule revision and offset.
    pub fn key(&self) -> (TaskId, u32, Duration) {
        (self.task_id, self.revision, self.offset)
    }

    fn is_unclaimed(&self, now: DateTime<Utc>) -> bool {
        self.claimed_until.is_none_or(|until| until <= now)
    }

    /// First delivery is due.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == AlertState::Pending
            && self.attempts == 0
            && self.fire_at <= now
            && self.is_unclaimed(now)
    }

    /// A failed delivery is ready to be retried.
    pub fn is_retry_due(&self, now: DateTime<Utc>) -> bool {
        self.state == AlertState::Pending
            && self.attempts > 0
            && self.retry_at.is_none_or(|at| at <= now)
            && self.is_unclaimed(now)
    }

    /// Take the in-flight lease.
    pub fn claim(&mut self, now: DateTime<Utc>, lease: Duration) -> bool {
        if self.state != AlertState::Pending || !self.is_unclaimed(now) {
            return false;
        }
        let lease = chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::zero());
        self.claimed_until = Some(now + lease);
        true
    }

    pub fn mark_sent(&mut self, now: DateTime<Utc>) -> bool {
        if self.state != AlertState::Pending {
            return false;
        }
        self.state = AlertState::Sent;
        self.sent_at = Some(now);
        self.settled_at = Some(now);
        self.claimed_until = None;
        true
    }

    /// A delivery attempt failed but retries remain.
    pub fn record_failure(&mut self, reason: String, retry_at: DateTime<Utc>) -> bool {
        if self.state != AlertState::Pending {
            return false;
        }
        self.attempts += 1;
        self.last_error = Some(reason);
        self.retry_at = Some(retry_at);
        self.claimed_until = None;
        true
    }

    /// Give up on delivery.
    pub fn mark_failed(&mut self, reason: String, now: DateTime<Utc>) -> bool {
        if self.state != AlertState::Pending {
            return false;
        }
        self.state = AlertState::Failed;
        self.attempts += 1;
        self.last_error = Some(reason);
        self.retry_at = None;
        self.claimed_until = None;
        self.settled_at = Some(now);
        true
    }

    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) -> bool {
        if self.state != AlertState::Pending {
            return false;
        }
        self.state = AlertState::Cancelled;
        self.claimed_until = None;
        self.settled_at = Some(now);
        true
    }

    /// Acknowledged by the student. Only a sent alert can be read.
    pub fn mark_read(&mut self, now: DateTime<Utc>) -> bool {
        if self.state != AlertState::Sent {
            return false;
        }
        self.state = AlertState::Read;
        self.read_at = Some(now);
        true
    }
}
