//! Task model: what a student scheduled, plus the reminder configuration.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{Channel, OwnerId, TaskId};
use crate::error::{Result, TaskbellError};

/// Task priority. Ordering is meaningful: `Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Raise to at least `floor`; never lowers.
    pub fn at_least(self, floor: Priority) -> Priority {
        self.max(floor)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = TaskbellError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(TaskbellError::validation(
                "priority",
                format!("unknown priority '{other}'"),
            )),
        }
    }
}

/// Task status.
///
/// State transitions:
/// - Pending -> Completed
/// - Pending -> Deleted
///
/// Both targets are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Completed,
    Deleted,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Deleted)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub owner_id: OwnerId,
    pub title: String,
    pub description: String,
    pub category: String,
    pub priority: Priority,
    pub status: TaskStatus,
    pub scheduled_time: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
    pub duration_minutes: u32,

    /// Deduplicated, largest first (earliest alert first).
    pub alert_offsets: Vec<Duration>,
    pub auto_alerts: bool,

    /// Overrides the planner's channel selection when set.
    pub channels: Option<Vec<Channel>>,

    /// Schedule generation. Bumped each time the alerts are regenerated.
    pub revision: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Build a pending task from validated input.
    pub fn from_input(
        id: TaskId,
        owner_id: OwnerId,
        input: ValidatedInput,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner_id,
            title: input.title,
            description: input.description,
            category: input.category,
            priority: input.priority,
            status: TaskStatus::Pending,
            scheduled_time: input.scheduled_time,
            deadline: input.deadline,
            duration_minutes: input.duration_minutes,
            alert_offsets: input.alert_offsets,
            auto_alerts: input.auto_alerts,
            channels: input.channels,
            revision: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.scheduled_time < now
    }

    /// Point in time the task counts as "on time" against.
    pub fn due_at(&self) -> DateTime<Utc> {
        self.deadline.unwrap_or(self.scheduled_time)
    }

    /// Pending -> Completed. Returns `false` when already completed.
    pub fn mark_completed(&mut self, now: DateTime<Utc>) -> Result<bool> {
        match self.status {
            TaskStatus::Pending => {
                self.status = TaskStatus::Completed;
                self.completed_at = Some(now);
                self.updated_at = now;
                Ok(true)
            }
            TaskStatus::Completed => Ok(false),
            TaskStatus::Deleted => Err(TaskbellError::Conflict(format!(
                "task {} is deleted and cannot be completed",
                self.id
            ))),
        }
    }

    /// Pending -> Deleted. Returns `false` when already deleted.
    pub fn mark_deleted(&mut self, now: DateTime<Utc>) -> Result<bool> {
        match self.status {
            TaskStatus::Pending => {
                self.status = TaskStatus::Deleted;
                self.updated_at = now;
                Ok(true)
            }
            TaskStatus::Deleted => Ok(false),
            TaskStatus::Completed => Err(TaskbellError::Conflict(format!(
                "task {} is completed and cannot be deleted",
                self.id
            ))),
        }
    }
}

/// Caller-supplied fields for `add_task`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInput {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub priority: Priority,
    pub scheduled_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_minutes: u32,
    /// `None` means "use the configured defaults".
    #[serde(default)]
    pub alert_offsets: Option<Vec<Duration>>,
    #[serde(default = "default_auto_alerts")]
    pub auto_alerts: bool,
    #[serde(default)]
    pub channels: Option<Vec<Channel>>,
}

fn default_auto_alerts() -> bool {
    true
}

impl TaskInput {
    pub fn new(title: impl Into<String>, scheduled_time: DateTime<Utc>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            category: String::new(),
            priority: Priority::default(),
            scheduled_time: Some(scheduled_time),
            deadline: None,
            duration_minutes: 0,
            alert_offsets: None,
            auto_alerts: true,
            channels: None,
        }
    }

    pub fn with_offsets_mins(mut self, minutes: &[u64]) -> Self {
        let offsets = minutes
            .iter()
            .map(|m| Duration::from_secs(m.saturating_mul(60)))
            .collect();
        self.alert_offsets = Some(offsets);
        self
    }

    pub fn with_offsets(mut self, offsets: Vec<Duration>) -> Self {
        self.alert_offsets = Some(offsets);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_channels(mut self, channels: Vec<Channel>) -> Self {
        self.channels = Some(channels);
        self
    }

    pub fn without_alerts(mut self) -> Self {
        self.auto_alerts = false;
        self
    }

    /// Check required fields and normalize offsets.
    pub fn validate(
        self,
        default_offsets: &[Duration],
        max_offset: Duration,
    ) -> Result<ValidatedInput> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(TaskbellError::validation("title", "must not be empty"));
        }
        let scheduled_time = self
            .scheduled_time
            .ok_or_else(|| TaskbellError::validation("scheduled_time", "is required"))?;
        validate_deadline(scheduled_time, self.deadline)?;

        let offsets = self
            .alert_offsets
            .unwrap_or_else(|| default_offsets.to_vec());
        let alert_offsets = normalize_offsets(offsets, max_offset)?;
        let channels = normalize_channels(self.channels)?;

        Ok(ValidatedInput {
            title,
            description: self.description,
            category: self.category,
            priority: self.priority,
            scheduled_time,
            deadline: self.deadline,
            duration_minutes: self.duration_minutes,
            alert_offsets,
            auto_alerts: self.auto_alerts,
            channels,
        })
    }
}

/// `TaskInput` after validation; only constructible through `TaskInput::validate`.
#[derive(Debug, Clone)]
pub struct ValidatedInput {
    title: String,
    description: String,
    category: String,
    priority: Priority,
    scheduled_time: DateTime<Utc>,
    deadline: Option<DateTime<Utc>>,
    duration_minutes: u32,
    alert_offsets: Vec<Duration>,
    auto_alerts: bool,
    channels: Option<Vec<Channel>>,
}

/// Partial update for `update_task`. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub priority: Option<Priority>,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub clear_deadline: bool,
    pub duration_minutes: Option<u32>,
    pub alert_offsets: Option<Vec<Duration>>,
    pub auto_alerts: Option<bool>,
    pub channels: Option<Vec<Channel>>,
}

impl TaskPatch {
    /// Apply to `task`, returning whether the alert schedule must be regenerated.
    pub fn apply(self, task: &mut Task, max_offset: Duration, now: DateTime<Utc>) -> Result<bool> {
        let mut reschedule = false;

        if let Some(title) = self.title {
            let title = title.trim().to_string();
            if title.is_empty() {
                return Err(TaskbellError::validation("title", "must not be empty"));
            }
            task.title = title;
        }
        if let Some(description) = self.description {
            task.description = description;
        }
        if let Some(category) = self.category {
            task.category = category;
        }
        if let Some(priority) = self.priority {
            // Priority feeds alert priority, so it regenerates too.
            reschedule |= priority != task.priority;
            task.priority = priority;
        }

        let scheduled_time = self.scheduled_time.unwrap_or(task.scheduled_time);
        let deadline = if self.clear_deadline {
            None
        } else {
            self.deadline.or(task.deadline)
        };
        validate_deadline(scheduled_time, deadline)?;
        reschedule |= scheduled_time != task.scheduled_time;
        task.scheduled_time = scheduled_time;
        task.deadline = deadline;

        if let Some(minutes) = self.duration_minutes {
            task.duration_minutes = minutes;
        }
        if let Some(offsets) = self.alert_offsets {
            let offsets = normalize_offsets(offsets, max_offset)?;
            reschedule |= offsets != task.alert_offsets;
            task.alert_offsets = offsets;
        }
        if let Some(auto_alerts) = self.auto_alerts {
            reschedule |= auto_alerts != task.auto_alerts;
            task.auto_alerts = auto_alerts;
        }
        if let Some(channels) = self.channels {
            let channels = normalize_channels(Some(channels))?;
            reschedule |= channels != task.channels;
            task.channels = channels;
        }

        task.updated_at = now;
        Ok(reschedule)
    }
}

fn validate_deadline(scheduled: DateTime<Utc>, deadline: Option<DateTime<Utc>>) -> Result<()> {
    match deadline {
        Some(deadline) if deadline < scheduled => Err(TaskbellError::validation(
            "deadline",
            "must not be before scheduled_time",
        )),
        _ => Ok(()),
    }
}

/// Deduplicate and sort offsets largest first.
///
/// A zero offset is rejected; the "exact" alert is a planner setting.
pub fn normalize_offsets(mut offsets: Vec<Duration>, max_offset: Duration) -> Result<Vec<Duration>> {
    if let Some(bad) = offsets.iter().find(|o| o.is_zero() || **o > max_offset) {
        return Err(TaskbellError::validation(
            "alert_offsets",
            format!("offset {bad:?} must be positive and at most {max_offset:?}"),
        ));
    }
    offsets.sort_unstable_by(|a, b| b.cmp(a));
    offsets.dedup();
    Ok(offsets)
}

fn normalize_channels(channels: Option<Vec<Channel>>) -> Result<Option<Vec<Channel>>> {
    let Some(mut channels) = channels else {
        return Ok(None);
    };
    if channels.iter().any(|c| c.as_str().trim().is_empty()) {
        return Err(TaskbellError::validation("channels", "channel names must not be empty"));
    }
    channels.sort();
    channels.dedup();
    if channels.is_empty() {
        return Err(TaskbellError::validation("channels", "must name at least one channel"));
    }
    Ok(Some(channels))
}

/// Query for `list_tasks`. Every `None` field matches everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub category: Option<String>,
    pub priority: Option<Priority>,
    pub scheduled_from: Option<DateTime<Utc>>,
    pub scheduled_to: Option<DateTime<Utc>>,
}

impl TaskFilter {
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.status.is_none_or(|s| task.status == s)
            && self
                .category
                .as_deref()
                .is_none_or(|c| task.category.eq_ignore_ascii_case(c))
            && self.priority.is_none_or(|p| task.priority == p)
            && self.scheduled_from.is_none_or(|from| task.scheduled_time >= from)
            && self.scheduled_to.is_none_or(|to| task.scheduled_time < to)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub total: usize,
    pub pending: usize,
    pub completed: usize,
    pub deleted: usize,
    pub overdue: usize,
}

impl TaskCounts {
    pub fn tally<'a>(tasks: impl IntoIterator<Item = &'a Task>, now: DateTime<Utc>) -> Self {
        let mut counts = TaskCounts::default();
        for task in tasks {
            counts.total += 1;
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Deleted => counts.deleted += 1,
            }
            if task.is_overdue(now) {
                counts.overdue += 1;
            }
        }
        counts
    }
}

/// Result of `list_tasks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskList {
    /// Filtered, ordered by `scheduled_time` ascending.
    pub tasks: Vec<Task>,
    /// Over all of the owner's tasks, not just the filtered ones.
    pub counts: TaskCounts,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn mins(m: u64) -> Duration {
        Duration::from_secs(m * 60)
    }

    fn max_offset() -> Duration {
        Duration::from_secs(30 * 24 * 3600)
    }

    fn task(input: TaskInput) -> Task {
        let validated = input.validate(&[mins(30)], max_offset()).unwrap();
        Task::from_input(
            TaskId::from_ulid(ulid::Ulid::new()),
            OwnerId::new("s1"),
            validated,
            t0(),
        )
    }

    #[test]
    fn empty_title_is_rejected() {
        let err = TaskInput::new("   ", t0())
            .validate(&[], max_offset())
            .unwrap_err();
        assert!(matches!(err, TaskbellError::Validation { field: "title", .. }));
    }

    #[test]
    fn missing_scheduled_time_is_rejected() {
        let mut input = TaskInput::new("anatomy", t0());
        input.scheduled_time = None;
        let err = input.validate(&[], max_offset()).unwrap_err();
        assert!(matches!(err, TaskbellError::Validation { field: "scheduled_time", .. }));
    }

    #[test]
    fn deadline_before_schedule_is_rejected() {
        let err = TaskInput::new("ward round", t0())
            .with_deadline(t0() - chrono::Duration::minutes(1))
            .validate(&[], max_offset())
            .unwrap_err();
        assert!(matches!(err, TaskbellError::Validation { field: "deadline", .. }));
    }

    #[test]
    fn offsets_are_deduplicated_and_sorted_largest_first() {
        let t = task(TaskInput::new("pharmacology", t0()).with_offsets_mins(&[5, 30, 15, 30]));
        assert_eq!(t.alert_offsets, vec![mins(30), mins(15), mins(5)]);
    }

    #[test]
    fn zero_offset_is_invalid() {
        let err = TaskInput::new("x", t0())
            .with_offsets_mins(&[0])
            .validate(&[], max_offset())
            .unwrap_err();
        assert!(matches!(err, TaskbellError::Validation { field: "alert_offsets", .. }));
    }

    #[test]
    fn defaults_apply_when_offsets_omitted() {
        let t = task(TaskInput::new("x", t0()));
        assert_eq!(t.alert_offsets, vec![mins(30)]);
    }

    #[test]
    fn completed_is_terminal_and_idempotent() {
        let mut t = task(TaskInput::new("x", t0()));
        assert!(t.mark_completed(t0()).unwrap());
        assert!(!t.mark_completed(t0()).unwrap());
        assert!(matches!(t.mark_deleted(t0()), Err(TaskbellError::Conflict(_))));
        assert_eq!(t.status, TaskStatus::Completed);
    }

    #[test]
    fn deleted_cannot_be_completed() {
        let mut t = task(TaskInput::new("x", t0()));
        t.mark_deleted(t0()).unwrap();
        assert!(t.mark_completed(t0()).is_err());
        assert!(t.completed_at.is_none());
    }

    #[test]
    fn patch_reports_reschedule_only_for_schedule_fields() {
        let mut t = task(TaskInput::new("x", t0()));

        let patch = TaskPatch {
            description: Some("bring stethoscope".into()),
            ..Default::default()
        };
        assert!(!patch.apply(&mut t, max_offset(), t0()).unwrap());

        let patch = TaskPatch {
            scheduled_time: Some(t0() + chrono::Duration::hours(1)),
            ..Default::default()
        };
        assert!(patch.apply(&mut t, max_offset(), t0()).unwrap());
    }

    #[test]
    fn overdue_requires_pending_and_past_schedule() {
        let mut t = task(TaskInput::new("x", t0()));
        let later = t0() + chrono::Duration::minutes(1);
        assert!(t.is_overdue(later));
        assert!(!t.is_overdue(t0()));
        t.mark_completed(later).unwrap();
        assert!(!t.is_overdue(later));
    }

    #[test]
    fn filter_matches_category_case_insensitively() {
        let t = task(TaskInput::new("x", t0()).with_category("Clinical"));
        assert!(TaskFilter::default().with_category("clinical").matches(&t));
        assert!(!TaskFilter::default().with_category("study").matches(&t));
        assert!(!TaskFilter::default().with_status(TaskStatus::Completed).matches(&t));
    }
}
