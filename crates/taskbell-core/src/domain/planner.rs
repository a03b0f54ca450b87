//! Alert planner: turns a task into alert drafts.
//!
//! Pure function, no side effects. The offset -> kind/priority/channel mapping
//! is the only business rule here and lives in `AlertPolicy::classify`.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::alert::{AlertDraft, AlertKind};
use super::ids::Channel;
use super::task::{Priority, Task, TaskStatus};

const REMINDER_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Planner settings (see `[planner]` in the config file).
#[derive(Debug, Clone)]
pub struct AlertPolicy {
    /// Also fire at the scheduled time itself.
    pub include_exact: bool,

    /// Offsets at or below this are urgent.
    pub urgent_threshold: Duration,

    /// Channels used unless the task overrides them.
    pub default_channels: Vec<Channel>,

    /// Added to the channel set of due/urgent alerts.
    pub urgent_channels: Vec<Channel>,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            include_exact: false,
            urgent_threshold: Duration::from_secs(5 * 60),
            default_channels: vec![Channel::new(Channel::DASHBOARD)],
            urgent_channels: vec![Channel::new(Channel::TELEGRAM)],
        }
    }
}

impl AlertPolicy {
    /// Kind and priority for an offset.
    pub fn classify(&self, offset: Duration, task_priority: Priority) -> (AlertKind, Priority) {
        if offset.is_zero() {
            (AlertKind::Due, task_priority.at_least(Priority::High))
        } else if offset <= self.urgent_threshold {
            (AlertKind::Urgent, task_priority.at_least(Priority::High))
        } else if offset <= REMINDER_WINDOW {
            (AlertKind::Reminder, task_priority)
        } else {
            (AlertKind::Advance, task_priority)
        }
    }

    fn channels_for(&self, task: &Task, kind: AlertKind) -> Vec<Channel> {
        let mut channels = task
            .channels
            .clone()
            .unwrap_or_else(|| self.default_channels.clone());
        if matches!(kind, AlertKind::Due | AlertKind::Urgent) {
            channels.extend(self.urgent_channels.iter().cloned());
        }
        channels.sort();
        channels.dedup();
        channels
    }
}

/// Plan the alerts of `task` as seen at `now`.
///
/// Offsets whose fire time is not strictly in the future are dropped, so a
/// task added close to its start silently gets fewer alerts. The result is
/// sorted by `fire_at` ascending.
pub fn plan_alerts(task: &Task, now: DateTime<Utc>, policy: &AlertPolicy) -> Vec<AlertDraft> {
    if task.status != TaskStatus::Pending || !task.auto_alerts {
        return Vec::new();
    }

    let mut offsets = task.alert_offsets.clone();
    if policy.include_exact {
        offsets.push(Duration::ZERO);
    }

    let mut drafts: Vec<AlertDraft> = offsets
        .into_iter()
        .filter_map(|offset| {
            let delta = chrono::Duration::from_std(offset).ok()?;
            let fire_at = task.scheduled_time.checked_sub_signed(delta)?;
            if fire_at <= now {
                return None;
            }
            let (kind, priority) = policy.classify(offset, task.priority);
            Some(AlertDraft {
                task_id: task.id,
                owner_id: task.owner_id.clone(),
                revision: task.revision,
                offset,
                kind,
                priority,
                title: task.title.clone(),
                task_scheduled_time: task.scheduled_time,
                fire_at,
                channels: policy.channels_for(task, kind),
            })
        })
        .collect();

    drafts.sort_by_key(|d| d.fire_at);
    drafts.dedup_by_key(|d| d.offset);
    drafts
}
