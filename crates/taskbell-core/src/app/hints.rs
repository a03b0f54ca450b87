//! HintTimers - fire_at ちょうどに配送を試みる best-effort タイマー
//!
//! task ごとに `CancellationToken` でまとめ、complete / delete / reschedule で
//! まとめて止める。タイマーを失っても（再起動など）次の sweep が配送するので、
//! 正しさは sweep 側が担保する。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::processor::AlertProcessor;
use crate::domain::{Alert, TaskId};
use crate::ports::Clock;

/// Timers of one task. `generation` tells a re-armed entry apart from the one
/// a finishing timer was spawned under.
struct Armed {
    token: CancellationToken,
    generation: u64,
    live: usize,
}

type ArmedMap = Arc<Mutex<HashMap<TaskId, Armed>>>;

pub struct HintTimers {
    processor: Arc<AlertProcessor>,
    clock: Arc<dyn Clock>,
    root: CancellationToken,
    per_task: ArmedMap,
    next_generation: AtomicU64,
}

impl HintTimers {
    pub fn new(processor: Arc<AlertProcessor>, clock: Arc<dyn Clock>) -> Self {
        Self {
            processor,
            clock,
            root: CancellationToken::new(),
            per_task: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Spawn one timer per alert. Must be called inside a tokio runtime.
    pub fn arm(&self, task_id: TaskId, alerts: &[Alert]) {
        if alerts.is_empty() || self.root.is_cancelled() {
            return;
        }
        let (token, generation) = {
            let mut per_task = self.per_task.lock().unwrap_or_else(|e| e.into_inner());
            let armed = per_task.entry(task_id).or_insert_with(|| Armed {
                token: self.root.child_token(),
                generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
                live: 0,
            });
            armed.live += alerts.len();
            (armed.token.clone(), armed.generation)
        };

        let now = self.clock.now();
        for alert in alerts {
            let delay = (alert.fire_at - now).to_std().unwrap_or_default();
            let alert_id = alert.id;
            let token = token.clone();
            let processor = Arc::clone(&self.processor);
            let per_task = Arc::clone(&self.per_task);
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!(alert_id = %alert_id, "hint timer cancelled");
                    }
                    _ = tokio::time::sleep(delay) => {
                        if let Err(e) = processor.process(alert_id).await {
                            warn!(alert_id = %alert_id, error = %e, "hint timer delivery failed");
                        }
                    }
                }
                release(&per_task, task_id, generation);
            });
        }
        debug!(task_id = %task_id, timers = alerts.len(), "hint timers armed");
    }

    /// Cancel every timer of a task.
    pub fn disarm(&self, task_id: TaskId) {
        let armed = {
            let mut per_task = self.per_task.lock().unwrap_or_else(|e| e.into_inner());
            per_task.remove(&task_id)
        };
        if let Some(armed) = armed {
            armed.token.cancel();
            debug!(task_id = %task_id, "hint timers disarmed");
        }
    }

    /// Cancel everything; later `arm` calls are ignored.
    pub fn shutdown(&self) {
        self.root.cancel();
        self.per_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Tasks with at least one timer still waiting or running.
    pub fn armed_tasks(&self) -> usize {
        self.per_task.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// A timer finished; drop the task entry with its last timer.
fn release(per_task: &Mutex<HashMap<TaskId, Armed>>, task_id: TaskId, generation: u64) {
    let mut per_task = per_task.lock().unwrap_or_else(|e| e.into_inner());
    let Some(armed) = per_task.get_mut(&task_id) else {
        return;
    };
    if armed.generation != generation {
        return;
    }
    armed.live = armed.live.saturating_sub(1);
    if armed.live == 0 {
        per_task.remove(&task_id);
    }
}
