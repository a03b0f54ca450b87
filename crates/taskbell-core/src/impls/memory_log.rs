//! InMemoryNotificationLog - owner ごとの上限付き配送履歴

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{NotificationRecord, OwnerId};
use crate::error::Result;
use crate::ports::NotificationLog;

/// Oldest entries are evicted once an owner exceeds `max_per_owner`.
#[derive(Clone)]
pub struct InMemoryNotificationLog {
    max_per_owner: usize,
    entries: Arc<Mutex<HashMap<OwnerId, VecDeque<NotificationRecord>>>>,
}

impl InMemoryNotificationLog {
    pub fn new(max_per_owner: usize) -> Self {
        Self {
            max_per_owner: max_per_owner.max(1),
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl NotificationLog for InMemoryNotificationLog {
    async fn append(&self, record: NotificationRecord) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let history = entries.entry(record.owner_id.clone()).or_default();
        history.push_back(record);
        while history.len() > self.max_per_owner {
            history.pop_front();
        }
        Ok(())
    }

    async fn recent(&self, owner: &OwnerId, limit: usize) -> Result<Vec<NotificationRecord>> {
        let entries = self.entries.lock().await;
        Ok(entries
            .get(owner)
            .map(|history| history.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
