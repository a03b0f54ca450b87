//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。各 trait は外部システム
//! （永続ストア、配送チャネル、プロフィール解決）へのインターフェースを提供し、
//! 実装の詳細を隠蔽する。開発・テスト用の実装は `impls` にある。

pub mod alert_store;
pub mod clock;
pub mod id_generator;
pub mod notification_log;
pub mod notifier;
pub mod owner_directory;
pub mod task_store;

pub use self::alert_store::AlertStore;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::notification_log::NotificationLog;
pub use self::notifier::Notifier;
pub use self::owner_directory::OwnerDirectory;
pub use self::task_store::TaskStore;
