//! Notifier port - 配送チャネルの抽象化
//!
//! One implementation per channel (dashboard, telegram, email, ...). The
//! dispatcher formats the payload; a notifier only transports it.

use async_trait::async_trait;

use crate::domain::{Channel, NotificationPayload, OwnerProfile};
use crate::error::NotifyError;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel this notifier serves. Used as the registry key.
    fn channel(&self) -> Channel;

    async fn send(
        &self,
        recipient: &OwnerProfile,
        payload: &NotificationPayload,
    ) -> Result<(), NotifyError>;
}
