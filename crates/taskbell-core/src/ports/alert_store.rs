//! AlertStore port - alert の状態遷移の権威
//!
//! # 設計原則
//! - 状態遷移はすべて CAS。負けた側は `Ok(false)` を受け取り、エラーにはしない
//! - `try_claim` の lease が配送そのものを at-most-once にする
//!   （hint timer と sweep が同じ alert を同時に拾っても送信は一度）
//! - lease が切れた alert（配送中にプロセスが死んだ）は次の sweep が再取得できる

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Alert, AlertId, OwnerId, TaskId};
use crate::error::Result;

#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Insert pending alerts, all or nothing.
    ///
    /// `Conflict` when any (task_id, revision, offset) key already exists,
    /// including a duplicate inside `alerts` itself.
    async fn insert(&self, alerts: Vec<Alert>) -> Result<()>;

    async fn get(&self, alert_id: AlertId) -> Result<Option<Alert>>;

    /// Take the in-flight lease on a pending alert whose lease is absent or expired.
    async fn try_claim(&self, alert_id: AlertId, now: DateTime<Utc>, lease: Duration)
    -> Result<bool>;

    /// pending -> sent
    async fn mark_sent(&self, alert_id: AlertId, now: DateTime<Utc>) -> Result<bool>;

    /// Keep pending, bump attempts, release the lease, schedule the retry pass.
    async fn record_failure(
        &self,
        alert_id: AlertId,
        reason: String,
        retry_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// pending -> failed
    async fn mark_failed(&self, alert_id: AlertId, reason: String, now: DateTime<Utc>)
    -> Result<bool>;

    /// pending -> cancelled
    async fn mark_cancelled(&self, alert_id: AlertId, now: DateTime<Utc>) -> Result<bool>;

    /// sent -> read
    async fn mark_read(&self, alert_id: AlertId, now: DateTime<Utc>) -> Result<bool>;

    /// Cancel every pending alert of a task; returns the ids actually cancelled.
    async fn cancel_pending_for_task(
        &self,
        owner: &OwnerId,
        task_id: TaskId,
        now: DateTime<Utc>,
    ) -> Result<Vec<AlertId>>;

    /// Pending, never attempted, unclaimed, `fire_at <= now`. Ordered by fire_at.
    async fn due_alerts(&self, owner: &OwnerId, now: DateTime<Utc>) -> Result<Vec<Alert>>;

    /// Pending, attempted at least once, unclaimed, `retry_at <= now`.
    async fn retry_due_alerts(&self, owner: &OwnerId, now: DateTime<Utc>) -> Result<Vec<Alert>>;

    /// Ordered by fire_at.
    async fn pending_alerts(&self, owner: &OwnerId) -> Result<Vec<Alert>>;

    /// Every alert of the owner in any state. Ordered by fire_at.
    async fn alerts_for_owner(&self, owner: &OwnerId) -> Result<Vec<Alert>>;

    /// Owners that have at least one alert.
    async fn owners(&self) -> Result<Vec<OwnerId>>;
}
