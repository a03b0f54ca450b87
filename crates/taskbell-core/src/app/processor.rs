//! AlertProcessor - hint timer と sweep が共有する唯一の配送経路
//!
//! # フロー
//! 1. recent guard（任意）: このプロセスで確定済みなら何もしない
//! 2. `try_claim`: lease を取れなければ他の誰かが配送中 or 確定済み
//! 3. 配送先プロフィール解決 → dispatch
//! 4. 成功: `mark_sent`（false なら別経路で確定済み。ログだけ残す）
//! 5. 失敗: リトライ余地があれば `record_failure`（backoff 付き）、なければ `mark_failed`

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::dispatcher::Dispatcher;
use super::recent::RecentIds;
use super::retry::RetryPolicy;
use crate::domain::{Alert, AlertId};
use crate::error::Result;
use crate::ports::{AlertStore, Clock, OwnerDirectory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Settled by this process a moment ago.
    Recent,
    /// Lease held elsewhere, or the alert is no longer pending.
    NotClaimed,
    /// Unknown alert id.
    Missing,
    /// Delivered, but another path settled the alert first.
    LostRace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Delivered,
    Retrying {
        attempts: u32,
        retry_at: DateTime<Utc>,
    },
    Failed,
    Skipped(SkipReason),
}

pub struct AlertProcessor {
    alerts: Arc<dyn AlertStore>,
    directory: Arc<dyn OwnerDirectory>,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    lease: Duration,
    recent: Option<RecentIds>,
}

impl AlertProcessor {
    pub fn new(
        alerts: Arc<dyn AlertStore>,
        directory: Arc<dyn OwnerDirectory>,
        dispatcher: Dispatcher,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
        lease: Duration,
    ) -> Self {
        Self {
            alerts,
            directory,
            dispatcher,
            clock,
            retry,
            lease,
            recent: None,
        }
    }

    /// Enable the recent-id guard; capacity 0 keeps it off.
    pub fn with_recent_guard(mut self, capacity: usize) -> Self {
        self.recent = (capacity > 0).then(|| RecentIds::new(capacity));
        self
    }

    pub async fn process(&self, alert_id: AlertId) -> Result<ProcessOutcome> {
        if self.recent.as_ref().is_some_and(|r| r.contains(alert_id)) {
            debug!(alert_id = %alert_id, "skipping recently settled alert");
            return Ok(ProcessOutcome::Skipped(SkipReason::Recent));
        }

        let now = self.clock.now();
        if !self.alerts.try_claim(alert_id, now, self.lease).await? {
            debug!(alert_id = %alert_id, "alert not claimable");
            return Ok(ProcessOutcome::Skipped(SkipReason::NotClaimed));
        }
        let Some(alert) = self.alerts.get(alert_id).await? else {
            return Ok(ProcessOutcome::Skipped(SkipReason::Missing));
        };

        let recipient = match self.directory.profile(&alert.owner_id).await {
            Ok(profile) => profile,
            Err(e) => return self.handle_failure(&alert, format!("owner lookup: {e}")).await,
        };

        let result = self.dispatcher.dispatch(&alert, &recipient).await;
        if !result.is_delivered() {
            return self.handle_failure(&alert, result.failure_summary()).await;
        }

        let sent = self.alerts.mark_sent(alert_id, self.clock.now()).await?;
        self.remember(alert_id);
        if sent {
            info!(
                alert_id = %alert_id,
                task_id = %alert.task_id,
                owner = %alert.owner_id,
                kind = alert.kind.label(),
                "alert sent"
            );
            Ok(ProcessOutcome::Delivered)
        } else {
            warn!(alert_id = %alert_id, "alert delivered but already settled elsewhere");
            Ok(ProcessOutcome::Skipped(SkipReason::LostRace))
        }
    }

    async fn handle_failure(&self, alert: &Alert, reason: String) -> Result<ProcessOutcome> {
        let now = self.clock.now();
        if self.retry.allows_retry(alert.attempts) {
            let attempts = alert.attempts + 1;
            let delay = chrono::Duration::from_std(self.retry.next_delay(attempts))
                .unwrap_or(chrono::Duration::MAX);
            let retry_at = now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC);
            if !self
                .alerts
                .record_failure(alert.id, reason.clone(), retry_at)
                .await?
            {
                debug!(alert_id = %alert.id, error = %reason, "delivery failed but alert settled meanwhile");
                return Ok(ProcessOutcome::Skipped(SkipReason::NotClaimed));
            }
            warn!(
                alert_id = %alert.id,
                attempts,
                %retry_at,
                error = %reason,
                "delivery failed, retry scheduled"
            );
            Ok(ProcessOutcome::Retrying { attempts, retry_at })
        } else {
            warn!(
                alert_id = %alert.id,
                attempts = alert.attempts + 1,
                error = %reason,
                "delivery failed, giving up"
            );
            if !self.alerts.mark_failed(alert.id, reason, now).await? {
                return Ok(ProcessOutcome::Skipped(SkipReason::NotClaimed));
            }
            self.remember(alert.id);
            Ok(ProcessOutcome::Failed)
        }
    }

    fn remember(&self, alert_id: AlertId) {
        if let Some(recent) = &self.recent {
            recent.insert(alert_id);
        }
    }
}
