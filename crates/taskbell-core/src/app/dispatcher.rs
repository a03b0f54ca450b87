//! Dispatcher - 1 つの alert を全チャネルへ並行配送する
//!
//! # 配送フロー
//! 1. チャネルごとに Notifier を registry から引く（未登録はそのチャネルの失敗）
//! 2. チャネル固有の形式に整形
//! 3. 全チャネルを並行に送信。各送信は timeout 付き
//! 4. 結果を集約し、成否にかかわらず履歴に追記
//!
//! 1 チャネルでも成功すれば delivered。

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tracing::{debug, warn};

use super::registry::NotifierRegistry;
use crate::domain::{
    Alert, AlertKind, Channel, ChannelOutcome, DispatchResult, NotificationPayload,
    NotificationRecord, OwnerProfile, Priority,
};
use crate::error::NotifyError;
use crate::ports::{Clock, NotificationLog};

pub struct Dispatcher {
    registry: Arc<NotifierRegistry>,
    log: Arc<dyn NotificationLog>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<NotifierRegistry>,
        log: Arc<dyn NotificationLog>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            log,
            clock,
            timeout,
        }
    }

    pub async fn dispatch(&self, alert: &Alert, recipient: &OwnerProfile) -> DispatchResult {
        let sends = alert
            .channels
            .iter()
            .map(|channel| self.send_one(alert, channel, recipient));
        let outcomes = join_all(sends).await;

        let result = DispatchResult {
            alert_id: alert.id,
            outcomes,
        };

        let record = NotificationRecord {
            alert_id: alert.id,
            task_id: alert.task_id,
            owner_id: alert.owner_id.clone(),
            kind: alert.kind,
            outcomes: result.outcomes.clone(),
            delivered: result.is_delivered(),
            recorded_at: self.clock.now(),
        };
        if let Err(e) = self.log.append(record).await {
            // 履歴の失敗で配送結果は変えない
            warn!(alert_id = %alert.id, error = %e, "failed to append notification history");
        }
        result
    }

    async fn send_one(
        &self,
        alert: &Alert,
        channel: &Channel,
        recipient: &OwnerProfile,
    ) -> ChannelOutcome {
        let Some(notifier) = self.registry.get(channel) else {
            let err = NotifyError::NoNotifier(channel.clone());
            warn!(alert_id = %alert.id, channel = %channel, "no notifier registered");
            return ChannelOutcome::failed(channel.clone(), &err);
        };

        let payload = format_payload(alert, channel, recipient);
        match tokio::time::timeout(self.timeout, notifier.send(recipient, &payload)).await {
            Ok(Ok(())) => {
                debug!(alert_id = %alert.id, channel = %channel, "channel delivered");
                ChannelOutcome::delivered(channel.clone())
            }
            Ok(Err(err)) => {
                warn!(alert_id = %alert.id, channel = %channel, error = %err, "channel failed");
                ChannelOutcome::failed(channel.clone(), &err)
            }
            Err(_) => {
                let err = NotifyError::Timeout(channel.clone(), self.timeout);
                warn!(alert_id = %alert.id, channel = %channel, error = %err, "channel timed out");
                ChannelOutcome::failed(channel.clone(), &err)
            }
        }
    }
}

fn priority_marker(priority: Priority) -> &'static str {
    match priority {
        Priority::Low | Priority::Medium => "",
        Priority::High => "[!] ",
        Priority::Critical => "[!!] ",
    }
}

fn lead_time(alert: &Alert) -> String {
    let minutes = alert.offset.as_secs() / 60;
    match alert.kind {
        AlertKind::Due => "starting now".to_string(),
        _ if minutes >= 120 && minutes % 60 == 0 => format!("in {} hours", minutes / 60),
        _ => format!("in {minutes} min"),
    }
}

/// Channel-specific rendering of one alert.
pub fn format_payload(alert: &Alert, channel: &Channel, recipient: &OwnerProfile) -> NotificationPayload {
    let marker = priority_marker(alert.priority);
    let when = alert.task_scheduled_time.format("%Y-%m-%d %H:%M UTC");
    let lead = lead_time(alert);

    let (subject, body) = match channel.as_str() {
        Channel::TELEGRAM => (
            format!("{marker}{}", alert.title),
            format!(
                "{marker}*{}*\n_{}_: {lead} ({when})\nPriority: `{}`",
                alert.title,
                alert.kind.label(),
                alert.priority
            ),
        ),
        Channel::EMAIL => (
            format!("{marker}[taskbell] {}: {}", alert.kind.label(), alert.title),
            format!(
                "Hi {},\n\n\"{}\" is scheduled for {when} ({lead}).\nPriority: {}\n",
                recipient.display_name, alert.title, alert.priority
            ),
        ),
        Channel::DASHBOARD => (
            alert.title.clone(),
            serde_json::json!({
                "alert_id": alert.id.to_string(),
                "task_id": alert.task_id.to_string(),
                "kind": alert.kind,
                "priority": alert.priority,
                "title": alert.title,
                "scheduled_time": alert.task_scheduled_time,
                "lead": lead,
            })
            .to_string(),
        ),
        _ => (
            format!("{marker}{}", alert.title),
            format!("{marker}{} {lead} ({when})", alert.title),
        ),
    };

    NotificationPayload {
        alert_id: alert.id,
        task_id: alert.task_id,
        channel: channel.clone(),
        kind: alert.kind,
        priority: alert.priority,
        subject,
        body,
    }
}
