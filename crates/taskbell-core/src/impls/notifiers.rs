//! 開発・テスト用の Notifier 実装
//!
//! - **LogNotifier**: tracing に出すだけ（dashboard 相当）
//! - **RecordingNotifier**: 送信内容を記録する。失敗・遅延を注入できる

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::domain::{Channel, NotificationPayload, OwnerId, OwnerProfile};
use crate::error::NotifyError;
use crate::ports::Notifier;

pub struct LogNotifier {
    channel: Channel,
}

impl LogNotifier {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn channel(&self) -> Channel {
        self.channel.clone()
    }

    async fn send(
        &self,
        recipient: &OwnerProfile,
        payload: &NotificationPayload,
    ) -> Result<(), NotifyError> {
        info!(
            channel = %self.channel,
            owner = %recipient.owner_id,
            alert_id = %payload.alert_id,
            subject = %payload.subject,
            "notification"
        );
        Ok(())
    }
}

/// Test double that remembers every successful send.
pub struct RecordingNotifier {
    channel: Channel,
    sent: Mutex<Vec<(OwnerId, NotificationPayload)>>,
    fail_next: AtomicU32,
    always_fail: AtomicBool,
    delay: Option<Duration>,
}

impl RecordingNotifier {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: Channel::new(channel),
            sent: Mutex::new(Vec::new()),
            fail_next: AtomicU32::new(0),
            always_fail: AtomicBool::new(false),
            delay: None,
        }
    }

    /// Every send fails with `NotifyError::Unavailable`.
    pub fn failing(channel: impl Into<String>) -> Self {
        let notifier = Self::new(channel);
        notifier.set_failing(true);
        notifier
    }

    /// Sleep before answering (tokio time, so paused tests stay deterministic).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.always_fail.store(failing, Ordering::SeqCst);
    }

    /// Fail the next `n` sends, then recover.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(OwnerId, NotificationPayload)> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn send_count(&self) -> usize {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn channel(&self) -> Channel {
        self.channel.clone()
    }

    async fn send(
        &self,
        recipient: &OwnerProfile,
        payload: &NotificationPayload,
    ) -> Result<(), NotifyError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.always_fail.load(Ordering::SeqCst) {
            return Err(NotifyError::Unavailable(
                self.channel.clone(),
                "injected failure".into(),
            ));
        }
        let should_fail = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(NotifyError::Unavailable(
                self.channel.clone(),
                "injected transient failure".into(),
            ));
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((recipient.owner_id.clone(), payload.clone()));
        Ok(())
    }
}
