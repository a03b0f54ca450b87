//! TaskService - リクエスト経路の操作（add / update / complete / delete / list ...）
//!
//! # 原子性
//! - owner ごとの async lock の中で task と alert をまとめて更新する
//! - alert の insert に失敗したら task の insert を取り消す
//! - reschedule は新しい alert を先に入れ、旧 pending はその後で取り消す
//! - 配送（ネットワーク I/O）はここでは一切しない。sweep / hint timer の仕事

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;
use tracing::{error, info, warn};

use super::hints::HintTimers;
use super::status::StatusCache;
use crate::domain::{
    Alert, AlertId, AlertPolicy, AlertState, NotificationRecord, OwnerId, Task, TaskCounts,
    TaskFilter, TaskId, TaskInput, TaskList, TaskPatch, plan_alerts,
};
use crate::error::{Result, TaskbellError};
use crate::ports::{AlertStore, Clock, IdGenerator, NotificationLog, TaskStore};

pub struct TaskService {
    tasks: Arc<dyn TaskStore>,
    alerts: Arc<dyn AlertStore>,
    log: Arc<dyn NotificationLog>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    policy: AlertPolicy,
    default_offsets: Vec<Duration>,
    max_offset: Duration,
    hints: Option<Arc<HintTimers>>,
    status_cache: Arc<StatusCache>,
    owner_locks: Mutex<HashMap<OwnerId, Arc<tokio::sync::Mutex<()>>>>,
}

/// Planner settings the service needs on every write.
#[derive(Debug, Clone)]
pub struct PlanningRules {
    pub policy: AlertPolicy,
    pub default_offsets: Vec<Duration>,
    pub max_offset: Duration,
}

impl TaskService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        alerts: Arc<dyn AlertStore>,
        log: Arc<dyn NotificationLog>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        rules: PlanningRules,
        hints: Option<Arc<HintTimers>>,
        status_cache: Arc<StatusCache>,
    ) -> Self {
        Self {
            tasks,
            alerts,
            log,
            ids,
            clock,
            policy: rules.policy,
            default_offsets: rules.default_offsets,
            max_offset: rules.max_offset,
            hints,
            status_cache,
            owner_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_owner(&self, owner: &OwnerId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.owner_locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(owner.clone()).or_default())
        };
        lock.lock_owned().await
    }

    async fn load(&self, owner: &OwnerId, task_id: TaskId) -> Result<Task> {
        self.tasks
            .get(owner, task_id)
            .await?
            .ok_or_else(|| TaskbellError::TaskNotFound {
                owner: owner.clone(),
                task_id,
            })
    }

    fn build_alerts(&self, task: &Task, now: DateTime<Utc>) -> Vec<Alert> {
        plan_alerts(task, now, &self.policy)
            .into_iter()
            .map(|draft| Alert::from_draft(self.ids.generate_alert_id(), draft, now))
            .collect()
    }

    fn arm(&self, task_id: TaskId, alerts: &[Alert]) {
        if let Some(hints) = &self.hints {
            hints.arm(task_id, alerts);
        }
    }

    fn disarm(&self, task_id: TaskId) {
        if let Some(hints) = &self.hints {
            hints.disarm(task_id);
        }
    }

    pub async fn add_task(&self, owner: &OwnerId, input: TaskInput) -> Result<Task> {
        let validated = input.validate(&self.default_offsets, self.max_offset)?;
        let _guard = self.lock_owner(owner).await;

        let now = self.clock.now();
        let task = Task::from_input(self.ids.generate_task_id(), owner.clone(), validated, now);
        self.tasks.insert(task.clone()).await?;

        let alerts = self.build_alerts(&task, now);
        if let Err(e) = self.alerts.insert(alerts.clone()).await {
            warn!(owner = %owner, task_id = %task.id, error = %e, "alert insert failed, rolling back task");
            if let Err(rollback) = self.tasks.purge(owner, task.id).await {
                error!(owner = %owner, task_id = %task.id, error = %rollback, "task rollback failed");
            }
            return Err(e);
        }

        self.arm(task.id, &alerts);
        self.status_cache.invalidate(owner);
        info!(
            owner = %owner,
            task_id = %task.id,
            scheduled_time = %task.scheduled_time,
            alerts = alerts.len(),
            "task added"
        );
        Ok(task)
    }

    pub async fn update_task(
        &self,
        owner: &OwnerId,
        task_id: TaskId,
        patch: TaskPatch,
    ) -> Result<Task> {
        let _guard = self.lock_owner(owner).await;
        let now = self.clock.now();

        let mut task = self.load(owner, task_id).await?;
        if task.status.is_terminal() {
            return Err(TaskbellError::Conflict(format!(
                "task {task_id} is {:?} and cannot be updated",
                task.status
            )));
        }

        let reschedule = patch.apply(&mut task, self.max_offset, now)?;
        if !reschedule {
            self.tasks.update(task.clone()).await?;
            self.status_cache.invalidate(owner);
            return Ok(task);
        }

        // 送信済み・既読・失敗は履歴として残し、pending だけ作り直す。
        // 新 revision の alert を先に入れ、task を保存してから旧 revision を取り消す。
        // どこで失敗しても旧スケジュールは生きたまま残る
        let previous_revision = task.revision;
        task.revision += 1;
        let alerts = self.build_alerts(&task, now);
        self.alerts.insert(alerts.clone()).await?;

        if let Err(e) = self.tasks.update(task.clone()).await {
            warn!(owner = %owner, task_id = %task_id, error = %e, "task update failed, withdrawing new alerts");
            for alert in &alerts {
                if let Err(rollback) = self.alerts.mark_cancelled(alert.id, now).await {
                    error!(alert_id = %alert.id, error = %rollback, "alert rollback failed");
                }
            }
            return Err(e);
        }

        self.disarm(task_id);
        let stale: Vec<AlertId> = self
            .alerts
            .pending_alerts(owner)
            .await?
            .into_iter()
            .filter(|a| a.task_id == task_id && a.revision <= previous_revision)
            .map(|a| a.id)
            .collect();
        let mut cancelled = 0;
        for alert_id in stale {
            if self.alerts.mark_cancelled(alert_id, now).await? {
                cancelled += 1;
            }
        }
        self.arm(task_id, &alerts);
        self.status_cache.invalidate(owner);

        info!(
            owner = %owner,
            task_id = %task_id,
            revision = task.revision,
            cancelled,
            alerts = alerts.len(),
            "task rescheduled"
        );
        Ok(task)
    }

    pub async fn complete_task(&self, owner: &OwnerId, task_id: TaskId) -> Result<Task> {
        self.finish(owner, task_id, Finish::Complete).await
    }

    pub async fn delete_task(&self, owner: &OwnerId, task_id: TaskId) -> Result<Task> {
        self.finish(owner, task_id, Finish::Delete).await
    }

    async fn finish(&self, owner: &OwnerId, task_id: TaskId, how: Finish) -> Result<Task> {
        let _guard = self.lock_owner(owner).await;
        let now = self.clock.now();

        let mut task = self.load(owner, task_id).await?;
        let changed = match how {
            Finish::Complete => task.mark_completed(now)?,
            Finish::Delete => task.mark_deleted(now)?,
        };
        if changed {
            self.tasks.update(task.clone()).await?;
        }

        self.disarm(task_id);
        let cancelled = self
            .alerts
            .cancel_pending_for_task(owner, task_id, now)
            .await?;
        self.status_cache.invalidate(owner);

        if changed {
            info!(
                owner = %owner,
                task_id = %task_id,
                status = ?task.status,
                cancelled = cancelled.len(),
                "task finished"
            );
        }
        Ok(task)
    }

    pub async fn get_task(&self, owner: &OwnerId, task_id: TaskId) -> Result<Task> {
        self.load(owner, task_id).await
    }

    /// Filtered tasks ordered by scheduled time; counts cover every task of the owner.
    pub async fn list_tasks(&self, owner: &OwnerId, filter: &TaskFilter) -> Result<TaskList> {
        let now = self.clock.now();
        let all = self.tasks.list(owner).await?;
        let counts = TaskCounts::tally(&all, now);

        let mut tasks: Vec<Task> = all.into_iter().filter(|t| filter.matches(t)).collect();
        tasks.sort_by_key(|t| (t.scheduled_time, t.id));
        Ok(TaskList { tasks, counts })
    }

    pub async fn get_pending_alerts(&self, owner: &OwnerId) -> Result<Vec<Alert>> {
        self.alerts.pending_alerts(owner).await
    }

    /// Alerts whose delivery was given up.
    pub async fn get_failed_alerts(&self, owner: &OwnerId) -> Result<Vec<Alert>> {
        let mut alerts = self.alerts.alerts_for_owner(owner).await?;
        alerts.retain(|a| a.state == AlertState::Failed);
        Ok(alerts)
    }

    /// sent -> read. `false` when the alert is not in the sent state.
    pub async fn mark_alert_read(&self, owner: &OwnerId, alert_id: AlertId) -> Result<bool> {
        let not_found = || TaskbellError::AlertNotFound {
            owner: owner.clone(),
            alert_id,
        };
        let alert = self.alerts.get(alert_id).await?.ok_or_else(not_found)?;
        if &alert.owner_id != owner {
            return Err(not_found());
        }
        self.alerts.mark_read(alert_id, self.clock.now()).await
    }

    pub async fn notification_history(
        &self,
        owner: &OwnerId,
        limit: usize,
    ) -> Result<Vec<NotificationRecord>> {
        self.log.recent(owner, limit).await
    }
}

#[derive(Debug, Clone, Copy)]
enum Finish {
    Complete,
    Delete,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Priority, TaskStatus};
    use crate::test_support::{FaultyAlertStore, Harness};

    fn owner() -> OwnerId {
        OwnerId::new("student-1")
    }

    fn mins(m: i64) -> chrono::Duration {
        chrono::Duration::minutes(m)
    }

    #[tokio::test]
    async fn add_task_plans_alerts_before_returning() {
        let h = Harness::new().await;
        let now = h.clock.now();
        let task = h
            .service
            .add_task(
                &owner(),
                TaskInput::new("cardiology lecture", now + chrono::Duration::hours(2))
                    .with_offsets_mins(&[30, 15, 5]),
            )
            .await
            .unwrap();

        let pending = h.service.get_pending_alerts(&owner()).await.unwrap();
        let fire_times: Vec<_> = pending.iter().map(|a| a.fire_at).collect();
        assert_eq!(fire_times, vec![now + mins(90), now + mins(105), now + mins(115)]);
        assert!(pending.iter().all(|a| a.task_id == task.id && a.revision == 0));
    }

    #[tokio::test]
    async fn near_task_gets_no_alerts() {
        let h = Harness::new().await;
        h.service
            .add_task(
                &owner(),
                TaskInput::new("ward handover", h.clock.now() + mins(2))
                    .with_offsets_mins(&[30, 15, 5]),
            )
            .await
            .unwrap();
        assert!(h.service.get_pending_alerts(&owner()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_offsets_use_defaults_and_disabled_alerts_plan_nothing() {
        let h = Harness::new().await;
        let later = h.clock.now() + chrono::Duration::hours(5);
        let task = h
            .service
            .add_task(&owner(), TaskInput::new("defaults", later))
            .await
            .unwrap();
        assert_eq!(task.alert_offsets.len(), 3);

        h.service
            .add_task(&owner(), TaskInput::new("quiet", later).without_alerts())
            .await
            .unwrap();
        assert_eq!(h.service.get_pending_alerts(&owner()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn invalid_input_is_rejected() {
        let h = Harness::new().await;
        let now = h.clock.now();

        let err = h
            .service
            .add_task(&owner(), TaskInput::new("  ", now + mins(60)))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskbellError::Validation { field: "title", .. }));

        let err = h
            .service
            .add_task(
                &owner(),
                TaskInput::new("x", now + mins(60)).with_deadline(now + mins(30)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TaskbellError::Validation { field: "deadline", .. }));

        assert!(h.service.list_tasks(&owner(), &TaskFilter::default()).await.unwrap().tasks.is_empty());
    }

    #[tokio::test]
    async fn alert_insert_failure_rolls_back_task() {
        let faulty = FaultyAlertStore::new();
        let h = Harness::with_alert_store(faulty.clone()).await;
        faulty.fail_inserts(true);

        let err = h
            .service
            .add_task(&owner(), TaskInput::new("doomed", h.clock.now() + mins(120)))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskbellError::StoreUnavailable(_)));

        let list = h.service.list_tasks(&owner(), &TaskFilter::default()).await.unwrap();
        assert_eq!(list.counts.total, 0);
    }

    #[tokio::test]
    async fn complete_cancels_pending_but_not_sent() {
        let h = Harness::new().await;
        let now = h.clock.now();
        let task = h
            .service
            .add_task(
                &owner(),
                TaskInput::new("surgery rotation", now + mins(40)).with_offsets_mins(&[30, 15]),
            )
            .await
            .unwrap();

        // the 30 min alert (now+10) goes out
        h.clock.advance(std::time::Duration::from_secs(11 * 60));
        assert_eq!(h.scheduler.tick(h.clock.now()).await.delivered, 1);

        let done = h.service.complete_task(&owner(), task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);

        let alerts = h.alerts.alerts_for_owner(&owner()).await.unwrap();
        let states: Vec<_> = alerts.iter().map(|a| a.state).collect();
        assert_eq!(states, vec![AlertState::Sent, AlertState::Cancelled]);

        // later sweeps deliver nothing more
        h.clock.advance(std::time::Duration::from_secs(3600));
        assert_eq!(h.scheduler.tick(h.clock.now()).await.dispatched, 0);
        assert_eq!(h.dashboard.send_count(), 1);
    }

    #[tokio::test]
    async fn complete_before_any_alert_cancels_all() {
        let h = Harness::new().await;
        let task = h
            .service
            .add_task(
                &owner(),
                TaskInput::new("biochem lab", h.clock.now() + chrono::Duration::hours(2))
                    .with_offsets_mins(&[30, 15, 5]),
            )
            .await
            .unwrap();
        h.service.complete_task(&owner(), task.id).await.unwrap();

        let alerts = h.alerts.alerts_for_owner(&owner()).await.unwrap();
        assert_eq!(alerts.len(), 3);
        assert!(alerts.iter().all(|a| a.state == AlertState::Cancelled));

        h.clock.advance(std::time::Duration::from_secs(3 * 3600));
        assert_eq!(h.scheduler.tick(h.clock.now()).await.dispatched, 0);
        assert_eq!(h.dashboard.send_count(), 0);
    }

    #[tokio::test]
    async fn complete_is_idempotent_and_delete_after_complete_conflicts() {
        let h = Harness::new().await;
        let task = h
            .service
            .add_task(&owner(), TaskInput::new("t", h.clock.now() + mins(90)))
            .await
            .unwrap();

        h.service.complete_task(&owner(), task.id).await.unwrap();
        let again = h.service.complete_task(&owner(), task.id).await.unwrap();
        assert_eq!(again.status, TaskStatus::Completed);

        let err = h.service.delete_task(&owner(), task.id).await.unwrap_err();
        assert!(matches!(err, TaskbellError::Conflict(_)));
    }

    #[tokio::test]
    async fn unknown_task_is_not_found() {
        let h = Harness::new().await;
        let ghost = h.ids.generate_task_id();
        for result in [
            h.service.complete_task(&owner(), ghost).await,
            h.service.delete_task(&owner(), ghost).await,
            h.service.get_task(&owner(), ghost).await,
            h.service
                .update_task(&owner(), ghost, TaskPatch::default())
                .await,
        ] {
            assert!(matches!(result, Err(TaskbellError::TaskNotFound { .. })));
        }
    }

    #[tokio::test]
    async fn other_owner_cannot_touch_task() {
        let h = Harness::new().await;
        let task = h
            .service
            .add_task(&owner(), TaskInput::new("t", h.clock.now() + mins(90)))
            .await
            .unwrap();
        let intruder = OwnerId::new("student-2");
        assert!(matches!(
            h.service.complete_task(&intruder, task.id).await,
            Err(TaskbellError::TaskNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn reschedule_bumps_revision_and_replaces_pending() {
        let h = Harness::new().await;
        let now = h.clock.now();
        let task = h
            .service
            .add_task(
                &owner(),
                TaskInput::new("OSCE practice", now + mins(60)).with_offsets_mins(&[30, 15]),
            )
            .await
            .unwrap();

        let patch = TaskPatch {
            scheduled_time: Some(now + mins(120)),
            ..TaskPatch::default()
        };
        let updated = h.service.update_task(&owner(), task.id, patch).await.unwrap();
        assert_eq!(updated.revision, 1);

        let pending = h.service.get_pending_alerts(&owner()).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|a| a.revision == 1));
        assert_eq!(pending[0].fire_at, now + mins(90));

        let all = h.alerts.alerts_for_owner(&owner()).await.unwrap();
        assert_eq!(
            all.iter().filter(|a| a.state == AlertState::Cancelled).count(),
            2
        );
    }

    #[tokio::test]
    async fn failed_reschedule_keeps_old_schedule() {
        let faulty = FaultyAlertStore::new();
        let h = Harness::with_alert_store(faulty.clone()).await;
        let now = h.clock.now();
        let task = h
            .service
            .add_task(
                &owner(),
                TaskInput::new("OSCE practice", now + mins(120)).with_offsets_mins(&[30, 15]),
            )
            .await
            .unwrap();

        faulty.fail_inserts(true);
        let patch = TaskPatch {
            scheduled_time: Some(now + mins(180)),
            ..TaskPatch::default()
        };
        let err = h
            .service
            .update_task(&owner(), task.id, patch)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskbellError::StoreUnavailable(_)));

        let stored = h.service.get_task(&owner(), task.id).await.unwrap();
        assert_eq!(stored.revision, 0);
        assert_eq!(stored.scheduled_time, now + mins(120));

        let pending = h.service.get_pending_alerts(&owner()).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|a| a.revision == 0));
    }

    #[tokio::test]
    async fn cosmetic_update_keeps_alerts() {
        let h = Harness::new().await;
        let task = h
            .service
            .add_task(&owner(), TaskInput::new("t", h.clock.now() + mins(90)))
            .await
            .unwrap();
        let before = h.service.get_pending_alerts(&owner()).await.unwrap();

        let patch = TaskPatch {
            description: Some("bring stethoscope".into()),
            ..TaskPatch::default()
        };
        let updated = h.service.update_task(&owner(), task.id, patch).await.unwrap();
        assert_eq!(updated.revision, 0);
        assert_eq!(h.service.get_pending_alerts(&owner()).await.unwrap(), before);
    }

    #[tokio::test]
    async fn priority_change_regenerates() {
        let h = Harness::new().await;
        let task = h
            .service
            .add_task(&owner(), TaskInput::new("t", h.clock.now() + mins(90)))
            .await
            .unwrap();
        let patch = TaskPatch {
            priority: Some(Priority::Critical),
            ..TaskPatch::default()
        };
        h.service.update_task(&owner(), task.id, patch).await.unwrap();
        let pending = h.service.get_pending_alerts(&owner()).await.unwrap();
        assert!(pending.iter().all(|a| a.priority == Priority::Critical));
    }

    #[tokio::test]
    async fn update_finished_task_conflicts() {
        let h = Harness::new().await;
        let task = h
            .service
            .add_task(&owner(), TaskInput::new("t", h.clock.now() + mins(90)))
            .await
            .unwrap();
        h.service.delete_task(&owner(), task.id).await.unwrap();
        let err = h
            .service
            .update_task(&owner(), task.id, TaskPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TaskbellError::Conflict(_)));
    }

    #[tokio::test]
    async fn list_reports_overdue_and_filters() {
        let h = Harness::new().await;
        let now = h.clock.now();
        h.service
            .add_task(
                &owner(),
                TaskInput::new("late", now + mins(30)).with_category("clinical"),
            )
            .await
            .unwrap();
        h.service
            .add_task(&owner(), TaskInput::new("early", now + mins(10)).with_category("study"))
            .await
            .unwrap();
        let done = h
            .service
            .add_task(&owner(), TaskInput::new("done", now + mins(20)))
            .await
            .unwrap();
        h.service.complete_task(&owner(), done.id).await.unwrap();

        h.clock.advance(std::time::Duration::from_secs(3600));
        let list = h
            .service
            .list_tasks(&owner(), &TaskFilter::default())
            .await
            .unwrap();
        let titles: Vec<&str> = list.tasks.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["early", "done", "late"]);
        assert_eq!(list.counts.overdue, 2);
        assert_eq!(list.counts.completed, 1);

        let clinical = h
            .service
            .list_tasks(
                &owner(),
                &TaskFilter::default()
                    .with_status(TaskStatus::Pending)
                    .with_category("Clinical"),
            )
            .await
            .unwrap();
        assert_eq!(clinical.tasks.len(), 1);
        assert_eq!(clinical.counts.total, 3);
    }

    #[tokio::test]
    async fn mark_read_requires_sent_and_right_owner() {
        let h = Harness::new().await;
        let alert = h.insert_due_alert(owner().as_str()).await;

        assert!(!h.service.mark_alert_read(&owner(), alert.id).await.unwrap());
        h.scheduler.tick(h.clock.now()).await;
        assert!(h.service.mark_alert_read(&owner(), alert.id).await.unwrap());
        assert!(!h.service.mark_alert_read(&owner(), alert.id).await.unwrap());

        let err = h
            .service
            .mark_alert_read(&OwnerId::new("student-2"), alert.id)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskbellError::AlertNotFound { .. }));
    }

    #[tokio::test]
    async fn failed_alerts_and_history_are_queryable() {
        let h = Harness::with_config(|c| c.scheduler.max_retries = 1).await;
        h.dashboard.set_failing(true);
        let alert = h.insert_due_alert(owner().as_str()).await;

        let report = h.scheduler.tick(h.clock.now()).await;
        assert_eq!(report.failed, 1);

        let failed = h.service.get_failed_alerts(&owner()).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, alert.id);

        let history = h.service.notification_history(&owner(), 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(!history[0].delivered);
    }
}
