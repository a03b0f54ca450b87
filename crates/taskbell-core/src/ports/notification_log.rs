//! NotificationLog port - 配送履歴（append-only）

use async_trait::async_trait;

use crate::domain::{NotificationRecord, OwnerId};
use crate::error::Result;

#[async_trait]
pub trait NotificationLog: Send + Sync {
    async fn append(&self, record: NotificationRecord) -> Result<()>;

    /// Newest first, at most `limit` entries.
    async fn recent(&self, owner: &OwnerId, limit: usize) -> Result<Vec<NotificationRecord>>;
}
