//! テスト用の共通部品: 固定時刻、alert ファクトリ、故障注入ストア、組み立て済み Harness

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use ulid::Ulid;

use crate::app::{AgentStatusService, AlertProcessor, App, AppBuilder, HintTimers, Scheduler, TaskService};
use crate::config::Config;
use crate::domain::{Alert, AlertDraft, AlertId, AlertPolicy, AlertState, Channel, OwnerId, Priority, TaskId};
use crate::error::{Result, TaskbellError};
use crate::impls::{InMemoryAlertStore, InMemoryTaskStore, RecordingNotifier};
use crate::ports::{AlertStore, Clock, FixedClock, IdGenerator, UlidGenerator};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

/// Alert for a fresh task scheduled at `t0 + 2h`, firing `offset_mins` before it.
pub fn alert_for(owner: &str, offset_mins: u64) -> Alert {
    alert_at(owner, offset_mins, t0() + chrono::Duration::hours(2), t0())
}

fn alert_at(owner: &str, offset_mins: u64, scheduled: DateTime<Utc>, now: DateTime<Utc>) -> Alert {
    let offset = Duration::from_secs(offset_mins * 60);
    let (kind, priority) = AlertPolicy::default().classify(offset, Priority::Medium);
    let draft = AlertDraft {
        task_id: TaskId::from_ulid(Ulid::new()),
        owner_id: OwnerId::new(owner),
        revision: 0,
        offset,
        kind,
        priority,
        title: "anatomy review".into(),
        task_scheduled_time: scheduled,
        fire_at: scheduled - chrono::Duration::minutes(offset_mins as i64),
        channels: vec![Channel::new(Channel::DASHBOARD)],
    };
    Alert::from_draft(AlertId::from_ulid(Ulid::new()), draft, now)
}

/// InMemoryAlertStore with injectable read/insert failures.
#[derive(Clone, Default)]
pub struct FaultyAlertStore {
    inner: InMemoryAlertStore,
    broken_owners: Arc<Mutex<HashSet<OwnerId>>>,
    fail_inserts: Arc<AtomicBool>,
}

impl FaultyAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Due / retry reads for `owner` return `StoreUnavailable`.
    pub fn fail_reads_for(&self, owner: &OwnerId) {
        self.broken_owners.lock().unwrap().insert(owner.clone());
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    fn check_reads(&self, owner: &OwnerId) -> Result<()> {
        if self.broken_owners.lock().unwrap().contains(owner) {
            return Err(TaskbellError::StoreUnavailable(format!("partition {owner} offline")));
        }
        Ok(())
    }
}

#[async_trait]
impl AlertStore for FaultyAlertStore {
    async fn insert(&self, alerts: Vec<Alert>) -> Result<()> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(TaskbellError::StoreUnavailable("insert refused".into()));
        }
        self.inner.insert(alerts).await
    }

    async fn get(&self, alert_id: AlertId) -> Result<Option<Alert>> {
        self.inner.get(alert_id).await
    }

    async fn try_claim(&self, alert_id: AlertId, now: DateTime<Utc>, lease: Duration) -> Result<bool> {
        self.inner.try_claim(alert_id, now, lease).await
    }

    async fn mark_sent(&self, alert_id: AlertId, now: DateTime<Utc>) -> Result<bool> {
        self.inner.mark_sent(alert_id, now).await
    }

    async fn record_failure(
        &self,
        alert_id: AlertId,
        reason: String,
        retry_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.inner.record_failure(alert_id, reason, retry_at).await
    }

    async fn mark_failed(&self, alert_id: AlertId, reason: String, now: DateTime<Utc>) -> Result<bool> {
        self.inner.mark_failed(alert_id, reason, now).await
    }

    async fn mark_cancelled(&self, alert_id: AlertId, now: DateTime<Utc>) -> Result<bool> {
        self.inner.mark_cancelled(alert_id, now).await
    }

    async fn mark_read(&self, alert_id: AlertId, now: DateTime<Utc>) -> Result<bool> {
        self.inner.mark_read(alert_id, now).await
    }

    async fn cancel_pending_for_task(
        &self,
        owner: &OwnerId,
        task_id: TaskId,
        now: DateTime<Utc>,
    ) -> Result<Vec<AlertId>> {
        self.inner.cancel_pending_for_task(owner, task_id, now).await
    }

    async fn due_alerts(&self, owner: &OwnerId, now: DateTime<Utc>) -> Result<Vec<Alert>> {
        self.check_reads(owner)?;
        self.inner.due_alerts(owner, now).await
    }

    async fn retry_due_alerts(&self, owner: &OwnerId, now: DateTime<Utc>) -> Result<Vec<Alert>> {
        self.check_reads(owner)?;
        self.inner.retry_due_alerts(owner, now).await
    }

    async fn pending_alerts(&self, owner: &OwnerId) -> Result<Vec<Alert>> {
        self.inner.pending_alerts(owner).await
    }

    async fn alerts_for_owner(&self, owner: &OwnerId) -> Result<Vec<Alert>> {
        self.inner.alerts_for_owner(owner).await
    }

    async fn owners(&self) -> Result<Vec<OwnerId>> {
        self.inner.owners().await
    }
}

/// Fully wired app over in-memory stores, a fixed clock and a recording
/// dashboard notifier.
pub struct Harness {
    pub config: Config,
    pub clock: FixedClock,
    pub ids: Arc<dyn IdGenerator>,
    pub tasks: Arc<InMemoryTaskStore>,
    pub alerts: Arc<dyn AlertStore>,
    pub dashboard: Arc<RecordingNotifier>,
    pub service: Arc<TaskService>,
    pub status: Arc<AgentStatusService>,
    pub processor: Arc<AlertProcessor>,
    pub scheduler: Arc<Scheduler>,
    pub app: App,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(tweak: impl FnOnce(&mut Config)) -> Self {
        let mut config = Config::default();
        tweak(&mut config);
        Self::assemble(
            config,
            FixedClock::new(t0()),
            Arc::new(InMemoryTaskStore::new()),
            Arc::new(InMemoryAlertStore::new()),
            RecordingNotifier::new(Channel::DASHBOARD),
        )
    }

    /// Dashboard notifier that takes `delay` (tokio time) per send.
    pub async fn with_slow_dashboard(delay: Duration) -> Self {
        Self::assemble(
            Config::default(),
            FixedClock::new(t0()),
            Arc::new(InMemoryTaskStore::new()),
            Arc::new(InMemoryAlertStore::new()),
            RecordingNotifier::new(Channel::DASHBOARD).with_delay(delay),
        )
    }

    pub async fn with_alert_store(alerts: impl AlertStore + 'static) -> Self {
        Self::assemble(
            Config::default(),
            FixedClock::new(t0()),
            Arc::new(InMemoryTaskStore::new()),
            Arc::new(alerts),
            RecordingNotifier::new(Channel::DASHBOARD),
        )
    }

    fn assemble(
        config: Config,
        clock: FixedClock,
        tasks: Arc<InMemoryTaskStore>,
        alerts: Arc<dyn AlertStore>,
        dashboard: RecordingNotifier,
    ) -> Self {
        let dashboard = Arc::new(dashboard);
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(clock.clone()));
        let app = AppBuilder::new(config.clone())
            .with_clock(Arc::new(clock.clone()))
            .with_id_generator(Arc::clone(&ids))
            .with_task_store(tasks.clone())
            .with_alert_store(Arc::clone(&alerts))
            .register(dashboard.clone())
            .unwrap()
            .build()
            .unwrap();

        Self {
            config,
            clock,
            ids,
            tasks,
            alerts,
            dashboard,
            service: Arc::clone(&app.service),
            status: Arc::clone(&app.status),
            processor: Arc::clone(&app.processor),
            scheduler: Arc::clone(&app.scheduler),
            app,
        }
    }

    /// Same stores and clock, fresh processor / scheduler / timers / notifier.
    pub async fn restart(&self) -> Self {
        Self::assemble(
            self.config.clone(),
            self.clock.clone(),
            Arc::clone(&self.tasks),
            Arc::clone(&self.alerts),
            RecordingNotifier::new(Channel::DASHBOARD),
        )
    }

    pub fn hints(&self) -> &HintTimers {
        self.app.hints.as_deref().unwrap()
    }

    /// Pending alert that fired a minute ago.
    pub async fn insert_due_alert(&self, owner: &str) -> Alert {
        let now = self.clock.now();
        let alert = alert_at(owner, 30, now + chrono::Duration::minutes(29), now);
        self.alerts.insert(vec![alert.clone()]).await.unwrap();
        alert
    }

    /// Pending alert firing `within` from now.
    pub async fn insert_alert_in(&self, owner: &str, within: Duration) -> Alert {
        let now = self.clock.now();
        let fire_at = now + chrono::Duration::from_std(within).unwrap();
        let alert = alert_at(owner, 30, fire_at + chrono::Duration::minutes(30), now);
        self.alerts.insert(vec![alert.clone()]).await.unwrap();
        alert
    }

    pub async fn alert_state(&self, alert_id: AlertId) -> AlertState {
        self.alerts.get(alert_id).await.unwrap().unwrap().state
    }
}
