//! Scheduler - 定期 reconciliation sweep
//!
//! alert store を見て、期限の来た alert を processor に流す。hint timer が
//! 失われても、ここが最終的な配送を保証する。
//!
//! # ループ
//! - `tokio::time::interval` で `check_interval` ごとに `tick`
//! - shutdown は `watch` channel（WorkerGroup と同じ作り）
//! - 1 owner のストアエラーはログに残して次の owner へ進む

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::processor::{AlertProcessor, ProcessOutcome};
use crate::domain::{Alert, OwnerId};
use crate::error::Result;
use crate::ports::{AlertStore, Clock};

/// What one `tick` did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub owners: usize,
    /// Alerts handed to the processor (due + retry passes).
    pub dispatched: usize,
    pub delivered: usize,
    pub retried: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Owners whose alerts could not be read, plus processor store errors.
    pub owner_errors: usize,
}

impl SweepReport {
    fn record(&mut self, outcome: &ProcessOutcome) {
        match outcome {
            ProcessOutcome::Delivered => self.delivered += 1,
            ProcessOutcome::Retrying { .. } => self.retried += 1,
            ProcessOutcome::Failed => self.failed += 1,
            ProcessOutcome::Skipped(_) => self.skipped += 1,
        }
    }
}

pub struct Scheduler {
    alerts: Arc<dyn AlertStore>,
    processor: Arc<AlertProcessor>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(
        alerts: Arc<dyn AlertStore>,
        processor: Arc<AlertProcessor>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            alerts,
            processor,
            clock,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One reconciliation pass over every owner.
    pub async fn tick(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        let owners = match self.alerts.owners().await {
            Ok(owners) => owners,
            Err(e) => {
                error!(error = %e, "sweep could not list owners");
                report.owner_errors += 1;
                return report;
            }
        };
        report.owners = owners.len();

        for owner in owners {
            let batch = match self.collect(&owner, now).await {
                Ok(batch) => batch,
                Err(e) => {
                    error!(owner = %owner, error = %e, "sweep skipped owner");
                    report.owner_errors += 1;
                    continue;
                }
            };
            if batch.is_empty() {
                continue;
            }
            report.dispatched += batch.len();
            debug!(owner = %owner, alerts = batch.len(), "sweep processing owner");

            // 同一 owner の alert は並行に処理
            let results = join_all(batch.iter().map(|a| self.processor.process(a.id))).await;
            for (alert, result) in batch.iter().zip(results) {
                match result {
                    Ok(outcome) => report.record(&outcome),
                    Err(e) => {
                        error!(owner = %owner, alert_id = %alert.id, error = %e, "processing failed");
                        report.owner_errors += 1;
                    }
                }
            }
        }

        if report.dispatched > 0 || report.owner_errors > 0 {
            info!(
                dispatched = report.dispatched,
                delivered = report.delivered,
                retried = report.retried,
                failed = report.failed,
                skipped = report.skipped,
                owner_errors = report.owner_errors,
                "sweep finished"
            );
        }
        report
    }

    /// Due pass first, then the retry pass.
    async fn collect(&self, owner: &OwnerId, now: DateTime<Utc>) -> Result<Vec<Alert>> {
        let mut batch = self.alerts.due_alerts(owner, now).await?;
        batch.extend(self.alerts.retry_due_alerts(owner, now).await?);
        Ok(batch)
    }

    /// Run `tick` every `interval` until shutdown. The first tick runs immediately.
    pub fn spawn(self: Arc<Self>) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = self.interval.as_secs(), "scheduler started");

            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        // sender が drop されても止める
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                    _ = interval.tick() => {}
                }
                self.tick(self.clock.now()).await;
            }
            info!("scheduler stopped");
        });

        SchedulerHandle { shutdown_tx, join }
    }
}

/// Handle of a spawned sweep loop.
/// - `request_shutdown` で次の tick 前に止まる（実行中の tick は最後まで走る）
/// - `shutdown_and_join` で終了を待つ
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn request_shutdown(&self) {
        // ignore send error: the loop may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(e) = self.join.await {
            error!(error = %e, "scheduler task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AlertState, TaskInput};
    use crate::test_support::{FaultyAlertStore, Harness};

    #[tokio::test]
    async fn second_tick_does_not_redeliver() {
        let h = Harness::new().await;
        let alert = h.insert_due_alert("s1").await;

        let first = h.scheduler.tick(h.clock.now()).await;
        assert_eq!(first.delivered, 1);
        let second = h.scheduler.tick(h.clock.now()).await;
        assert_eq!(second.dispatched, 0);

        assert_eq!(h.dashboard.send_count(), 1);
        assert_eq!(h.alert_state(alert.id).await, AlertState::Sent);
    }

    #[tokio::test]
    async fn future_alerts_wait() {
        let h = Harness::new().await;
        h.insert_alert_in("s1", Duration::from_secs(300)).await;

        let report = h.scheduler.tick(h.clock.now()).await;
        assert_eq!(report.dispatched, 0);
        assert_eq!(report.owners, 1);
    }

    #[tokio::test]
    async fn retry_pass_respects_backoff() {
        let h = Harness::new().await;
        h.dashboard.fail_next(1);
        let alert = h.insert_due_alert("s1").await;

        assert_eq!(h.scheduler.tick(h.clock.now()).await.retried, 1);
        // backoff (30s) not elapsed yet
        h.clock.advance(Duration::from_secs(10));
        assert_eq!(h.scheduler.tick(h.clock.now()).await.dispatched, 0);

        h.clock.advance(Duration::from_secs(20));
        assert_eq!(h.scheduler.tick(h.clock.now()).await.delivered, 1);
        assert_eq!(h.alert_state(alert.id).await, AlertState::Sent);
    }

    #[tokio::test]
    async fn one_owner_failing_does_not_stop_others() {
        let faulty = FaultyAlertStore::new();
        let h = Harness::with_alert_store(faulty.clone()).await;
        let bad = h.insert_due_alert("broken").await;
        let good = h.insert_due_alert("healthy").await;
        faulty.fail_reads_for(&bad.owner_id);

        let report = h.scheduler.tick(h.clock.now()).await;
        assert_eq!(report.owner_errors, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(h.alert_state(good.id).await, AlertState::Sent);
        assert_eq!(h.alert_state(bad.id).await, AlertState::Pending);
    }

    #[tokio::test]
    async fn restart_delivers_on_next_tick() {
        let h = Harness::new().await;
        let task = h
            .service
            .add_task(
                &OwnerId::new("s1"),
                TaskInput::new("ECG interpretation", h.clock.now() + chrono::Duration::minutes(20))
                    .with_offsets_mins(&[15, 10]),
            )
            .await
            .unwrap();
        // timers gone with the old process
        h.hints().shutdown();

        // new processor and scheduler over the same stores
        let restarted = h.restart().await;
        restarted.clock.advance(Duration::from_secs(11 * 60));
        let report = restarted.scheduler.tick(restarted.clock.now()).await;

        assert_eq!(report.delivered, 2);
        let pending = restarted
            .service
            .get_pending_alerts(&task.owner_id)
            .await
            .unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn hint_timer_and_tick_at_fire_at_deliver_once() {
        let h = Harness::with_slow_dashboard(Duration::from_secs(2)).await;
        let alert = h.insert_alert_in("s1", Duration::from_secs(60)).await;
        h.hints().arm(alert.task_id, std::slice::from_ref(&alert));

        h.clock.advance(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(60)).await;
        let report = h.scheduler.tick(h.clock.now()).await;
        assert!(report.delivered <= 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.dashboard.send_count(), 1);
        assert_eq!(h.alert_state(alert.id).await, AlertState::Sent);
        assert_eq!(h.scheduler.tick(h.clock.now()).await.dispatched, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_loop_ticks_until_shutdown() {
        let h = Harness::new().await;
        let handle = Arc::clone(&h.scheduler).spawn();

        // first tick is immediate, nothing due
        tokio::time::sleep(Duration::from_secs(1)).await;
        h.insert_due_alert("s1").await;
        assert_eq!(h.dashboard.send_count(), 0);

        tokio::time::sleep(h.scheduler.interval()).await;
        assert_eq!(h.dashboard.send_count(), 1);

        handle.shutdown_and_join().await;
        h.insert_due_alert("s2").await;
        tokio::time::sleep(h.scheduler.interval() * 3).await;
        assert_eq!(h.dashboard.send_count(), 1);
    }
}
