//! taskbell CLI
//!
//! state は JSON スナップショット（`--state`）に保存し、コマンドごとに読み書きする。
//! `run` は sweep を回し続け、Ctrl-C で state を書き出して終了する。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use taskbell_core::config::Config;
use taskbell_core::domain::{
    Channel, NotificationPayload, OwnerId, OwnerProfile, Priority, TaskFilter, TaskId, TaskInput,
    TaskStatus,
};
use taskbell_core::error::NotifyError;
use taskbell_core::impls::{InMemoryAlertStore, InMemoryTaskStore, StoreSnapshot};
use taskbell_core::ports::{Clock, FixedClock, Notifier, SystemClock};
use taskbell_core::{App, AppBuilder};

#[derive(Parser)]
#[command(name = "taskbell", about = "Task and alert scheduling engine")]
struct Cli {
    /// TOML config file; defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// JSON state file
    #[arg(long, global = true, default_value = "taskbell-state.json")]
    state: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Add a task and plan its alerts
    Add {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        title: String,
        /// RFC 3339 time, e.g. 2026-03-02T14:00:00Z
        #[arg(long, conflicts_with = "in_mins")]
        at: Option<DateTime<Utc>>,
        /// Minutes from now
        #[arg(long)]
        in_mins: Option<i64>,
        #[arg(long, default_value = "medium")]
        priority: Priority,
        #[arg(long, default_value = "")]
        category: String,
        /// Alert offsets in minutes, e.g. 30,15,5
        #[arg(long, value_delimiter = ',')]
        offsets: Option<Vec<u64>>,
    },
    /// List tasks of an owner
    List {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        pending_only: bool,
    },
    /// Mark a task completed
    Complete {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        task: TaskId,
    },
    /// Delete a task
    Delete {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        task: TaskId,
    },
    /// Print the agent status of an owner
    Status {
        #[arg(long)]
        owner: String,
    },
    /// Run the scheduler until Ctrl-C
    Run,
    /// Simulated run over a fixed clock, without touching the state file
    Demo,
}

/// stdout に出すだけの Notifier
struct ConsoleNotifier {
    channel: Channel,
}

#[async_trait]
impl Notifier for ConsoleNotifier {
    fn channel(&self) -> Channel {
        self.channel.clone()
    }

    async fn send(
        &self,
        recipient: &OwnerProfile,
        payload: &NotificationPayload,
    ) -> Result<(), NotifyError> {
        println!(
            "[{}] -> {}: {}\n{}",
            self.channel, recipient.display_name, payload.subject, payload.body
        );
        Ok(())
    }
}

struct Engine {
    app: App,
    tasks: Arc<InMemoryTaskStore>,
    alerts: Arc<InMemoryAlertStore>,
    clock: Arc<dyn Clock>,
}

impl Engine {
    fn build(config: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let tasks = Arc::new(InMemoryTaskStore::new());
        let alerts = Arc::new(InMemoryAlertStore::new());

        let mut builder = AppBuilder::new(config.clone())
            .with_clock(Arc::clone(&clock))
            .with_task_store(tasks.clone())
            .with_alert_store(alerts.clone());
        for channel in config.planner.all_channels() {
            builder = builder.register(Arc::new(ConsoleNotifier { channel }))?;
        }
        let app = builder.expect_configured_channels().build()?;

        Ok(Self {
            app,
            tasks,
            alerts,
            clock,
        })
    }

    async fn restore(&self, path: &Path) -> Result<()> {
        if let Some(snapshot) = StoreSnapshot::load(path)? {
            snapshot.restore(&self.tasks, &self.alerts).await?;
            tracing::debug!(path = %path.display(), "state restored");
        }
        Ok(())
    }

    async fn save(&self, path: &Path) -> Result<()> {
        StoreSnapshot::capture(&self.tasks, &self.alerts, self.clock.now())
            .await
            .save(path)?;
        Ok(())
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    match cli.command {
        Command::Demo => demo(config).await,
        command => execute(config, &cli.state, command).await,
    }
}

async fn execute(config: Config, state: &Path, command: Command) -> Result<()> {
    let engine = Engine::build(config, Arc::new(SystemClock))?;
    engine
        .restore(state)
        .await
        .with_context(|| format!("loading state from {}", state.display()))?;
    let service = &engine.app.service;

    match command {
        Command::Add {
            owner,
            title,
            at,
            in_mins,
            priority,
            category,
            offsets,
        } => {
            let scheduled = match (at, in_mins) {
                (Some(at), _) => at,
                (None, Some(m)) => engine.clock.now() + chrono::Duration::minutes(m),
                (None, None) => anyhow::bail!("either --at or --in-mins is required"),
            };
            let mut input = TaskInput::new(title, scheduled)
                .with_priority(priority)
                .with_category(category);
            if let Some(offsets) = offsets {
                input = input.with_offsets_mins(&offsets);
            }
            let owner = OwnerId::new(owner);
            let task = service.add_task(&owner, input).await?;
            println!("added {} at {}", task.id, task.scheduled_time);
            for alert in service.get_pending_alerts(&owner).await? {
                if alert.task_id == task.id {
                    println!("  {} {} at {}", alert.id, alert.kind.label(), alert.fire_at);
                }
            }
        }
        Command::List {
            owner,
            pending_only,
        } => {
            let mut filter = TaskFilter::default();
            if pending_only {
                filter = filter.with_status(TaskStatus::Pending);
            }
            print_json(&service.list_tasks(&OwnerId::new(owner), &filter).await?)?;
        }
        Command::Complete { owner, task } => {
            let task = service.complete_task(&OwnerId::new(owner), task).await?;
            println!("completed {}", task.id);
        }
        Command::Delete { owner, task } => {
            let task = service.delete_task(&OwnerId::new(owner), task).await?;
            println!("deleted {}", task.id);
        }
        Command::Status { owner } => {
            print_json(&engine.app.status.get_agent_status(&OwnerId::new(owner)).await?)?;
        }
        Command::Run => {
            let handle = engine.app.spawn_scheduler();
            tokio::signal::ctrl_c()
                .await
                .context("waiting for ctrl-c")?;
            tracing::info!("shutting down");
            engine.app.stop_hints();
            handle.shutdown_and_join().await;
        }
        // main が先に処理する
        Command::Demo => return Ok(()),
    }

    engine.save(state).await?;
    Ok(())
}

/// 固定時計で 1 件の task を作り、時間を進めながら sweep を回す
async fn demo(config: Config) -> Result<()> {
    let start = Utc::now();
    let clock = FixedClock::new(start);
    let engine = Engine::build(config, Arc::new(clock.clone()))?;
    let owner = OwnerId::new("demo-student");

    let task = engine
        .app
        .service
        .add_task(
            &owner,
            TaskInput::new("Anatomy exam", start + chrono::Duration::minutes(40))
                .with_priority(Priority::High)
                .with_offsets_mins(&[30, 15, 5]),
        )
        .await?;
    println!("added {} at {}", task.id, task.scheduled_time);
    // hint timer は実時間で動くので、デモでは sweep だけを使う
    engine.app.stop_hints();

    for step in 0..8 {
        clock.advance(Duration::from_secs(5 * 60));
        let report = engine.app.scheduler.tick(clock.now()).await;
        println!(
            "t+{:>2}m: dispatched={} delivered={}",
            (step + 1) * 5,
            report.dispatched,
            report.delivered
        );
    }

    print_json(&engine.app.status.get_agent_status(&owner).await?)?;
    Ok(())
}
