//! TaskStore port - タスクの正本（source of truth）
//!
//! Partitioned by owner: every lookup takes the owner id, and a task stored
//! under one owner is invisible to every other owner.

use async_trait::async_trait;

use crate::domain::{OwnerId, Task, TaskId};
use crate::error::Result;

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// `Conflict` when the id already exists.
    async fn insert(&self, task: Task) -> Result<()>;

    async fn get(&self, owner: &OwnerId, task_id: TaskId) -> Result<Option<Task>>;

    /// Replace the stored task. `TaskNotFound` when it was never inserted.
    async fn update(&self, task: Task) -> Result<()>;

    /// Hard delete. Only used to roll back a failed `add_task`.
    async fn purge(&self, owner: &OwnerId, task_id: TaskId) -> Result<bool>;

    /// Every task of the owner, in no particular order.
    async fn list(&self, owner: &OwnerId) -> Result<Vec<Task>>;
}
