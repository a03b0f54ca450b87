//! StoreSnapshot - in-memory ストアの JSON スナップショット
//!
//! CLI の state file として使う。復元後は hint timer が無いので、
//! pending alert は次の sweep が拾う。

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{InMemoryAlertStore, InMemoryTaskStore};
use crate::domain::{Alert, Task};
use crate::error::{Result, TaskbellError};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub tasks: Vec<Task>,
    pub alerts: Vec<Alert>,
}

impl StoreSnapshot {
    pub async fn capture(
        tasks: &InMemoryTaskStore,
        alerts: &InMemoryAlertStore,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: now,
            tasks: tasks.export().await,
            alerts: alerts.export().await,
        }
    }

    /// Load into the stores, replacing what they hold.
    pub async fn restore(self, tasks: &InMemoryTaskStore, alerts: &InMemoryAlertStore) -> Result<()> {
        if self.version != SNAPSHOT_VERSION {
            return Err(TaskbellError::Snapshot(format!(
                "unsupported snapshot version {} (expected {SNAPSHOT_VERSION})",
                self.version
            )));
        }
        tasks.import(self.tasks).await;
        alerts.import(self.alerts).await;
        Ok(())
    }

    /// Write to a sibling temp file first, then rename over `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| TaskbellError::Snapshot(format!("encode: {e}")))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| TaskbellError::Snapshot(format!("write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| TaskbellError::Snapshot(format!("rename to {}: {e}", path.display())))?;
        Ok(())
    }

    /// `Ok(None)` when the file does not exist yet.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(TaskbellError::Snapshot(format!(
                    "read {}: {e}",
                    path.display()
                )));
            }
        };
        let snapshot = serde_json::from_str(&raw)
            .map_err(|e| TaskbellError::Snapshot(format!("decode {}: {e}", path.display())))?;
        Ok(Some(snapshot))
    }
}
