//! taskbell-core
//!
//! 学生ごとの task と、その task の前に鳴らす alert を管理するエンジン。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, alert, planner, notification, agent）
//! - **ports**: 抽象化レイヤー（TaskStore, AlertStore, Notifier, Clock, など）
//! - **app**: アプリケーションロジック（builder, service, processor, sweep, hints, status）
//! - **impls**: 実装（in-memory ストア、開発用 Notifier、JSON スナップショット）
//! - **config**: TOML 設定
//! - **error**: エラー型

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;

#[cfg(test)]
pub(crate) mod test_support;

pub use app::{App, AppBuilder};
pub use config::Config;
pub use error::{NotifyError, Result, TaskbellError};
