//! Agent status: read model composed from tasks and alerts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::alert::{Alert, AlertState};
use super::ids::OwnerId;
use super::task::{Task, TaskCounts, TaskStatus};

/// Completion statistics over a trailing window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceWindow {
    pub window_days: u32,
    /// Non-deleted tasks scheduled inside the window.
    pub tasks_in_window: usize,
    pub completed_in_window: usize,
    /// completed / tasks, 0.0 for an empty window.
    pub completion_ratio: f64,
    /// Share of completed tasks finished no later than their deadline
    /// (or scheduled time when there is none).
    pub on_time_rate: f64,
    pub avg_minutes_to_complete: Option<f64>,
}

impl PerformanceWindow {
    pub fn compute(tasks: &[Task], now: DateTime<Utc>, window_days: u32) -> Self {
        let since = now - chrono::Duration::days(i64::from(window_days));
        let in_window: Vec<&Task> = tasks
            .iter()
            .filter(|t| t.status != TaskStatus::Deleted && t.scheduled_time >= since)
            .collect();

        let completed: Vec<(&Task, DateTime<Utc>)> = in_window
            .iter()
            .filter_map(|t| t.completed_at.map(|at| (*t, at)))
            .collect();

        let on_time = completed.iter().filter(|(t, at)| *at <= t.due_at()).count();
        let total_minutes: f64 = completed
            .iter()
            .map(|(t, at)| (*at - t.created_at).num_seconds() as f64 / 60.0)
            .sum();

        Self {
            window_days,
            tasks_in_window: in_window.len(),
            completed_in_window: completed.len(),
            completion_ratio: ratio(completed.len(), in_window.len()),
            on_time_rate: ratio(on_time, completed.len()),
            avg_minutes_to_complete: (!completed.is_empty())
                .then(|| total_minutes / completed.len() as f64),
        }
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub owner_id: OwnerId,
    pub generated_at: DateTime<Utc>,
    pub tasks: TaskCounts,
    /// Pending and not yet overdue.
    pub current_tasks: usize,
    pub pending_alerts: usize,
    pub failed_alerts: usize,
    pub performance: PerformanceWindow,
}

impl AgentStatus {
    pub fn compose(
        owner_id: OwnerId,
        tasks: &[Task],
        alerts: &[Alert],
        now: DateTime<Utc>,
        window_days: u32,
    ) -> Self {
        let counts = TaskCounts::tally(tasks, now);
        Self {
            owner_id,
            generated_at: now,
            tasks: counts,
            current_tasks: counts.pending - counts.overdue,
            pending_alerts: alerts
                .iter()
                .filter(|a| a.state == AlertState::Pending)
                .count(),
            failed_alerts: alerts
                .iter()
                .filter(|a| a.state == AlertState::Failed)
                .count(),
            performance: PerformanceWindow::compute(tasks, now, window_days),
        }
    }
}
