//! Domain model (ids, tasks, alerts, planner, notification records, status).
//!
//! I/O を持たない純粋なモデル層。状態遷移はすべてここで定義し、
//! ストア実装はロックを取ってこれらのメソッドを呼ぶだけにする。

pub mod agent;
pub mod alert;
pub mod ids;
pub mod notification;
pub mod planner;
pub mod task;

pub use agent::{AgentStatus, PerformanceWindow};
pub use alert::{Alert, AlertDraft, AlertKind, AlertState};
pub use ids::{AlertId, Channel, Id, IdMarker, OwnerId, TaskId};
pub use notification::{
    ChannelOutcome, DispatchResult, NotificationPayload, NotificationRecord, OwnerProfile,
};
pub use planner::{AlertPolicy, plan_alerts};
pub use task::{
    Priority, Task, TaskCounts, TaskFilter, TaskInput, TaskList, TaskPatch, TaskStatus,
    ValidatedInput,
};
