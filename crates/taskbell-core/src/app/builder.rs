//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # 起動時検証（Fail-fast）
//! - config を検証する
//! - `expect_channels()` で期待したチャネルが全て登録されているかチェック
//! - 不足があれば `BuildError` を返す（最初の配送で気づくより早く落とす）

use std::sync::Arc;

use tracing::info;

use super::dispatcher::Dispatcher;
use super::hints::HintTimers;
use super::processor::AlertProcessor;
use super::registry::{NotifierRegistry, RegistryError};
use super::service::{PlanningRules, TaskService};
use super::status::{AgentStatusService, StatusCache};
use super::sweep::{Scheduler, SchedulerHandle};
use crate::config::Config;
use crate::domain::Channel;
use crate::error::TaskbellError;
use crate::impls::{InMemoryAlertStore, InMemoryNotificationLog, InMemoryTaskStore, StaticDirectory};
use crate::ports::{
    AlertStore, Clock, IdGenerator, NotificationLog, Notifier, OwnerDirectory, SystemClock,
    TaskStore, UlidGenerator,
};

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new(config)
///     .register(Arc::new(LogNotifier::new(Channel::new("dashboard"))))?
///     .expect_configured_channels()
///     .build()?;
/// ```
///
/// 指定しなかったポートは in-memory 実装と `SystemClock` で埋める。
pub struct AppBuilder {
    config: Config,
    clock: Arc<dyn Clock>,
    ids: Option<Arc<dyn IdGenerator>>,
    tasks: Option<Arc<dyn TaskStore>>,
    alerts: Option<Arc<dyn AlertStore>>,
    log: Option<Arc<dyn NotificationLog>>,
    directory: Option<Arc<dyn OwnerDirectory>>,
    registry: NotifierRegistry,
    expected_channels: Option<Vec<Channel>>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing notifiers for channels: {0:?}. These channels were expected but not registered.")]
    MissingChannels(Vec<Channel>),

    #[error(transparent)]
    Config(#[from] TaskbellError),
}

impl AppBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            ids: None,
            tasks: None,
            alerts: None,
            log: None,
            directory: None,
            registry: NotifierRegistry::new(),
            expected_channels: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn with_task_store(mut self, tasks: Arc<dyn TaskStore>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn with_alert_store(mut self, alerts: Arc<dyn AlertStore>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn with_notification_log(mut self, log: Arc<dyn NotificationLog>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn with_directory(mut self, directory: Arc<dyn OwnerDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Notifier を登録。同じチャネルの二重登録はエラー
    pub fn register(mut self, notifier: Arc<dyn Notifier>) -> Result<Self, RegistryError> {
        self.registry.register(notifier)?;
        Ok(self)
    }

    /// 期待されるチャネルのリストを設定
    pub fn expect_channels(mut self, channels: &[&str]) -> Self {
        self.expected_channels = Some(channels.iter().map(|c| Channel::new(*c)).collect());
        self
    }

    /// config の default / urgent チャネルを全て期待する
    pub fn expect_configured_channels(mut self) -> Self {
        self.expected_channels = Some(self.config.planner.all_channels());
        self
    }

    pub fn build(self) -> Result<App, BuildError> {
        self.config.validate()?;

        if let Some(expected) = &self.expected_channels {
            let registered = self.registry.channels();
            let missing: Vec<Channel> = expected
                .iter()
                .filter(|c| !registered.contains(c))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingChannels(missing));
            }
        }

        let config = self.config;
        let clock = self.clock;
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let tasks = self
            .tasks
            .unwrap_or_else(|| Arc::new(InMemoryTaskStore::new()));
        let alerts = self
            .alerts
            .unwrap_or_else(|| Arc::new(InMemoryAlertStore::new()));
        let log = self.log.unwrap_or_else(|| {
            Arc::new(InMemoryNotificationLog::new(
                config.history.max_entries_per_owner,
            ))
        });
        let directory = self
            .directory
            .unwrap_or_else(|| Arc::new(StaticDirectory::new()));
        let channels = self.registry.channels();

        let dispatcher = Dispatcher::new(
            Arc::new(self.registry),
            Arc::clone(&log),
            Arc::clone(&clock),
            config.scheduler.notifier_timeout(),
        );
        let processor = Arc::new(
            AlertProcessor::new(
                Arc::clone(&alerts),
                directory,
                dispatcher,
                Arc::clone(&clock),
                config.scheduler.retry_policy(),
                config.scheduler.claim_lease(),
            )
            .with_recent_guard(config.scheduler.recent_cache_size),
        );
        let hints = config
            .scheduler
            .hint_timers
            .then(|| Arc::new(HintTimers::new(Arc::clone(&processor), Arc::clone(&clock))));
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&alerts),
            Arc::clone(&processor),
            Arc::clone(&clock),
            config.scheduler.check_interval(),
        ));

        let status_cache = Arc::new(StatusCache::new(config.status.cache_ttl()));
        let status = Arc::new(AgentStatusService::new(
            Arc::clone(&tasks),
            Arc::clone(&alerts),
            Arc::clone(&clock),
            Arc::clone(&status_cache),
            config.status.performance_window_days,
        ));
        let service = Arc::new(TaskService::new(
            tasks,
            alerts,
            log,
            ids,
            clock,
            PlanningRules {
                policy: config.planner.alert_policy(),
                default_offsets: config.planner.default_offsets(),
                max_offset: config.planner.max_offset(),
            },
            hints.clone(),
            status_cache,
        ));

        info!(
            channels = ?channels,
            hint_timers = hints.is_some(),
            check_interval_secs = scheduler.interval().as_secs(),
            "taskbell app built"
        );

        Ok(App {
            config,
            service,
            status,
            processor,
            scheduler,
            hints,
        })
    }
}

/// App はワイヤリング済みのエンジン
///
/// - `service`: リクエスト経路（task の追加・更新・一覧）
/// - `status`: エージェント状態
/// - `scheduler`: sweep。`spawn_scheduler` でバックグラウンド実行
pub struct App {
    pub config: Config,
    pub service: Arc<TaskService>,
    pub status: Arc<AgentStatusService>,
    pub processor: Arc<AlertProcessor>,
    pub scheduler: Arc<Scheduler>,
    /// `scheduler.hint_timers = false` なら None（sweep だけで配送）
    pub hints: Option<Arc<HintTimers>>,
}

impl App {
    pub fn spawn_scheduler(&self) -> SchedulerHandle {
        Arc::clone(&self.scheduler).spawn()
    }

    /// Stop hint timers; the sweep picks up whatever they would have sent.
    pub fn stop_hints(&self) {
        if let Some(hints) = &self.hints {
            hints.shutdown();
        }
    }
}
