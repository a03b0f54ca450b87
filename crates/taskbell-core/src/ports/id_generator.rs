//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース。timestamp 部分は注入された Clock から取る

use crate::domain::{AlertId, TaskId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は時刻順にソート可能な ID を生成
pub trait IdGenerator: Send + Sync {
    fn generate_task_id(&self) -> TaskId;

    fn generate_alert_id(&self) -> AlertId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// FixedClock を渡せば timestamp 部分が決定的になる（ランダム部分は残る）。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_task_id(&self) -> TaskId {
        TaskId::from(self.next_ulid())
    }

    fn generate_alert_id(&self) -> AlertId {
        AlertId::from(self.next_ulid())
    }
}
