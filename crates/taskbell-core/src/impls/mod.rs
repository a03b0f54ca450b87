//! Implementations - 開発・テスト用のポート実装
//!
//! 本番の永続ストアや配送チャネルは外部クレートが同じ trait を実装する。

pub mod directory;
pub mod memory_alerts;
pub mod memory_log;
pub mod memory_tasks;
pub mod notifiers;
pub mod snapshot;

pub use directory::StaticDirectory;
pub use memory_alerts::InMemoryAlertStore;
pub use memory_log::InMemoryNotificationLog;
pub use memory_tasks::InMemoryTaskStore;
pub use notifiers::{LogNotifier, RecordingNotifier};
pub use snapshot::{SNAPSHOT_VERSION, StoreSnapshot};
