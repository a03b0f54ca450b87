//! InMemoryTaskStore - 開発用のタスクストア
//!
//! owner ごとに `HashMap<TaskId, Task>` を持つ。ロックは各操作の中で完結し、
//! ロックを保持したまま await しない。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{OwnerId, Task, TaskId};
use crate::error::{Result, TaskbellError};
use crate::ports::TaskStore;

#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    state: Arc<Mutex<HashMap<OwnerId, HashMap<TaskId, Task>>>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every task of every owner, for snapshots.
    pub async fn export(&self) -> Vec<Task> {
        let state = self.state.lock().await;
        let mut tasks: Vec<Task> = state
            .values()
            .flat_map(|tasks| tasks.values().cloned())
            .collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    /// Replace the whole store content.
    pub async fn import(&self, tasks: Vec<Task>) {
        let mut state = self.state.lock().await;
        state.clear();
        for task in tasks {
            state
                .entry(task.owner_id.clone())
                .or_default()
                .insert(task.id, task);
        }
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: Task) -> Result<()> {
        let mut state = self.state.lock().await;
        let tasks = state.entry(task.owner_id.clone()).or_default();
        if tasks.contains_key(&task.id) {
            return Err(TaskbellError::Conflict(format!(
                "task {} already exists",
                task.id
            )));
        }
        tasks.insert(task.id, task);
        Ok(())
    }

    async fn get(&self, owner: &OwnerId, task_id: TaskId) -> Result<Option<Task>> {
        let state = self.state.lock().await;
        Ok(state.get(owner).and_then(|tasks| tasks.get(&task_id)).cloned())
    }

    async fn update(&self, task: Task) -> Result<()> {
        let mut state = self.state.lock().await;
        let slot = state
            .get_mut(&task.owner_id)
            .and_then(|tasks| tasks.get_mut(&task.id))
            .ok_or_else(|| TaskbellError::TaskNotFound {
                owner: task.owner_id.clone(),
                task_id: task.id,
            })?;
        *slot = task;
        Ok(())
    }

    async fn purge(&self, owner: &OwnerId, task_id: TaskId) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(state
            .get_mut(owner)
            .is_some_and(|tasks| tasks.remove(&task_id).is_some()))
    }

    async fn list(&self, owner: &OwnerId) -> Result<Vec<Task>> {
        let state = self.state.lock().await;
        Ok(state
            .get(owner)
            .map(|tasks| tasks.values().cloned().collect())
            .unwrap_or_default())
    }
}
