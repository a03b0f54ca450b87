//! InMemoryAlertStore - 開発用の alert ストア
//!
//! 1 本の `tokio::sync::Mutex` で全状態遷移を直列化する。CAS は
//! `Alert` 側の遷移メソッド（`mark_sent` など）が `bool` を返すことで表現する。
//! 未知の alert id への遷移は `Ok(false)`（遷移できる対象がない）。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{Alert, AlertId, AlertState, OwnerId, TaskId};
use crate::error::{Result, TaskbellError};
use crate::ports::AlertStore;

type AlertKey = (TaskId, u32, Duration);

#[derive(Default)]
struct AlertTable {
    /// All alerts (single source of truth).
    alerts: HashMap<AlertId, Alert>,

    /// Uniqueness index over (task_id, revision, offset).
    keys: HashSet<AlertKey>,

    /// Owner partition index.
    by_owner: HashMap<OwnerId, Vec<AlertId>>,
}

impl AlertTable {
    fn insert_one(&mut self, alert: Alert) {
        self.keys.insert(alert.key());
        self.by_owner
            .entry(alert.owner_id.clone())
            .or_default()
            .push(alert.id);
        self.alerts.insert(alert.id, alert);
    }

    /// Alerts of one owner matching `pred`, ordered by fire_at.
    fn select(&self, owner: &OwnerId, pred: impl Fn(&Alert) -> bool) -> Vec<Alert> {
        let mut out: Vec<Alert> = self
            .by_owner
            .get(owner)
            .into_iter()
            .flatten()
            .filter_map(|id| self.alerts.get(id))
            .filter(|a| pred(*a))
            .cloned()
            .collect();
        out.sort_by_key(|a| (a.fire_at, a.id));
        out
    }

    fn transition(&mut self, alert_id: AlertId, f: impl FnOnce(&mut Alert) -> bool) -> bool {
        self.alerts.get_mut(&alert_id).is_some_and(f)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryAlertStore {
    state: Arc<Mutex<AlertTable>>,
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every alert of every owner, for snapshots.
    pub async fn export(&self) -> Vec<Alert> {
        let state = self.state.lock().await;
        let mut alerts: Vec<Alert> = state.alerts.values().cloned().collect();
        alerts.sort_by_key(|a| a.id);
        alerts
    }

    /// Replace the whole store content.
    ///
    /// In-flight leases are dropped: a process that restored a snapshot owns
    /// none of them.
    pub async fn import(&self, alerts: Vec<Alert>) {
        let mut state = self.state.lock().await;
        *state = AlertTable::default();
        for mut alert in alerts {
            alert.claimed_until = None;
            state.insert_one(alert);
        }
    }
}

#[async_trait]
impl AlertStore for InMemoryAlertStore {
    async fn insert(&self, alerts: Vec<Alert>) -> Result<()> {
        let mut state = self.state.lock().await;

        // 全件検査してから書き込む（all-or-nothing）
        let mut batch_keys = HashSet::with_capacity(alerts.len());
        for alert in &alerts {
            let key = alert.key();
            if state.keys.contains(&key) || !batch_keys.insert(key) {
                return Err(TaskbellError::Conflict(format!(
                    "alert for task {} revision {} offset {:?} already exists",
                    alert.task_id, alert.revision, alert.offset
                )));
            }
            if state.alerts.contains_key(&alert.id) {
                return Err(TaskbellError::Conflict(format!(
                    "alert {} already exists",
                    alert.id
                )));
            }
        }

        for mut alert in alerts {
            alert.state = AlertState::Pending;
            state.insert_one(alert);
        }
        Ok(())
    }

    async fn get(&self, alert_id: AlertId) -> Result<Option<Alert>> {
        let state = self.state.lock().await;
        Ok(state.alerts.get(&alert_id).cloned())
    }

    async fn try_claim(
        &self,
        alert_id: AlertId,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(state.transition(alert_id, |a| a.claim(now, lease)))
    }

    async fn mark_sent(&self, alert_id: AlertId, now: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(state.transition(alert_id, |a| a.mark_sent(now)))
    }

    async fn record_failure(
        &self,
        alert_id: AlertId,
        reason: String,
        retry_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(state.transition(alert_id, |a| a.record_failure(reason, retry_at)))
    }

    async fn mark_failed(
        &self,
        alert_id: AlertId,
        reason: String,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(state.transition(alert_id, |a| a.mark_failed(reason, now)))
    }

    async fn mark_cancelled(&self, alert_id: AlertId, now: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(state.transition(alert_id, |a| a.mark_cancelled(now)))
    }

    async fn mark_read(&self, alert_id: AlertId, now: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(state.transition(alert_id, |a| a.mark_read(now)))
    }

    async fn cancel_pending_for_task(
        &self,
        owner: &OwnerId,
        task_id: TaskId,
        now: DateTime<Utc>,
    ) -> Result<Vec<AlertId>> {
        let mut state = self.state.lock().await;
        let ids: Vec<AlertId> = state
            .select(owner, |a| a.task_id == task_id && a.state == AlertState::Pending)
            .into_iter()
            .map(|a| a.id)
            .collect();
        let cancelled = ids
            .into_iter()
            .filter(|id| state.transition(*id, |a| a.mark_cancelled(now)))
            .collect();
        Ok(cancelled)
    }

    async fn due_alerts(&self, owner: &OwnerId, now: DateTime<Utc>) -> Result<Vec<Alert>> {
        let state = self.state.lock().await;
        Ok(state.select(owner, |a| a.is_due(now)))
    }

    async fn retry_due_alerts(&self, owner: &OwnerId, now: DateTime<Utc>) -> Result<Vec<Alert>> {
        let state = self.state.lock().await;
        Ok(state.select(owner, |a| a.is_retry_due(now)))
    }

    async fn pending_alerts(&self, owner: &OwnerId) -> Result<Vec<Alert>> {
        let state = self.state.lock().await;
        Ok(state.select(owner, |a| a.state == AlertState::Pending))
    }

    async fn alerts_for_owner(&self, owner: &OwnerId) -> Result<Vec<Alert>> {
        let state = self.state.lock().await;
        Ok(state.select(owner, |_| true))
    }

    async fn owners(&self) -> Result<Vec<OwnerId>> {
        let state = self.state.lock().await;
        let mut owners: Vec<OwnerId> = state.by_owner.keys().cloned().collect();
        owners.sort();
        Ok(owners)
    }
}
