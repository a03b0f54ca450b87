//! App - アプリケーション層
//!
//! ports を組み合わせてアプリケーションロジックを実装する。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: アプリケーションの構築とワイヤリング
//! - **TaskService**: task の CRUD と alert 計画（リクエスト経路）
//! - **AlertProcessor**: claim → dispatch → 確定。sweep と hint timer が共有
//! - **Scheduler**: 定期 sweep（取りこぼしの回収）
//! - **HintTimers**: fire_at ちょうどの best-effort 配送
//! - **AgentStatusService**: エージェント状態（TTL キャッシュ付き）

pub mod builder;
pub mod dispatcher;
pub mod hints;
pub mod processor;
pub mod recent;
pub mod registry;
pub mod retry;
pub mod service;
pub mod status;
pub mod sweep;

// 主要な型を再エクスポート
pub use self::builder::{App, AppBuilder, BuildError};
pub use self::dispatcher::{Dispatcher, format_payload};
pub use self::hints::HintTimers;
pub use self::processor::{AlertProcessor, ProcessOutcome, SkipReason};
pub use self::registry::{NotifierRegistry, RegistryError};
pub use self::retry::RetryPolicy;
pub use self::service::{PlanningRules, TaskService};
pub use self::status::{AgentStatusService, StatusCache};
pub use self::sweep::{Scheduler, SchedulerHandle, SweepReport};
