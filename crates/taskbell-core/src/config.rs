//! Engine configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) is a valid config.
//!
//! ```toml
//! [scheduler]
//! check_interval_secs = 30
//! max_retries = 3
//!
//! [planner]
//! default_offsets_mins = [30, 15, 5]
//! urgent_channels = ["telegram"]
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::app::RetryPolicy;
use crate::domain::{AlertPolicy, Channel};
use crate::error::{Result, TaskbellError};

/// Lower bound for the sweep interval.
pub const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub planner: PlannerConfig,
    pub status: StatusConfig,
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub check_interval_secs: u64,
    /// Total delivery attempts per alert, including the first.
    pub max_retries: u32,
    pub retry_base_delay_secs: u64,
    pub retry_multiplier: f64,
    pub notifier_timeout_secs: u64,
    pub claim_lease_secs: u64,
    pub hint_timers: bool,
    /// Recent-id guard capacity; 0 disables the guard.
    pub recent_cache_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 30,
            max_retries: 3,
            retry_base_delay_secs: 30,
            retry_multiplier: 2.0,
            notifier_timeout_secs: 10,
            claim_lease_secs: 120,
            hint_timers: true,
            recent_cache_size: 1000,
        }
    }
}

impl SchedulerConfig {
    /// Sweep interval, clamped to `MIN_CHECK_INTERVAL`.
    pub fn check_interval(&self) -> Duration {
        let requested = Duration::from_secs(self.check_interval_secs);
        if requested < MIN_CHECK_INTERVAL {
            warn!(
                requested_secs = self.check_interval_secs,
                min_secs = MIN_CHECK_INTERVAL.as_secs(),
                "check interval below minimum, clamping"
            );
            MIN_CHECK_INTERVAL
        } else {
            requested
        }
    }

    pub fn notifier_timeout(&self) -> Duration {
        Duration::from_secs(self.notifier_timeout_secs)
    }

    pub fn claim_lease(&self) -> Duration {
        Duration::from_secs(self.claim_lease_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            base_delay: Duration::from_secs(self.retry_base_delay_secs),
            multiplier: self.retry_multiplier,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub default_offsets_mins: Vec<u64>,
    pub include_exact: bool,
    pub urgent_threshold_mins: u64,
    pub default_channels: Vec<String>,
    pub urgent_channels: Vec<String>,
    pub max_offset_hours: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            default_offsets_mins: vec![30, 15, 5],
            include_exact: false,
            urgent_threshold_mins: 5,
            default_channels: vec![Channel::DASHBOARD.to_string()],
            urgent_channels: vec![Channel::TELEGRAM.to_string()],
            max_offset_hours: 720,
        }
    }
}

impl PlannerConfig {
    pub fn default_offsets(&self) -> Vec<Duration> {
        self.default_offsets_mins
            .iter()
            .map(|m| Duration::from_secs(m.saturating_mul(60)))
            .collect()
    }

    pub fn max_offset(&self) -> Duration {
        Duration::from_secs(self.max_offset_hours.saturating_mul(3600))
    }

    pub fn alert_policy(&self) -> AlertPolicy {
        AlertPolicy {
            include_exact: self.include_exact,
            urgent_threshold: Duration::from_secs(self.urgent_threshold_mins.saturating_mul(60)),
            default_channels: self.default_channels.iter().map(Channel::new).collect(),
            urgent_channels: self.urgent_channels.iter().map(Channel::new).collect(),
        }
    }

    /// Every channel an alert can be routed to.
    pub fn all_channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self
            .default_channels
            .iter()
            .chain(&self.urgent_channels)
            .map(Channel::new)
            .collect();
        channels.sort();
        channels.dedup();
        channels
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub cache_ttl_secs: u64,
    pub performance_window_days: u32,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 15,
            performance_window_days: 30,
        }
    }
}

impl StatusConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_entries_per_owner: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries_per_owner: 500,
        }
    }
}

impl Config {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Config = toml::from_str(raw)
            .map_err(|e| TaskbellError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            TaskbellError::Config(format!(
                "failed to read config file '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.scheduler;
        if s.max_retries == 0 {
            return Err(TaskbellError::Config(
                "scheduler.max_retries must be at least 1".into(),
            ));
        }
        if !(s.retry_multiplier.is_finite() && s.retry_multiplier > 0.0) {
            return Err(TaskbellError::Config(format!(
                "scheduler.retry_multiplier must be positive, got {}",
                s.retry_multiplier
            )));
        }
        if s.notifier_timeout_secs == 0 {
            return Err(TaskbellError::Config(
                "scheduler.notifier_timeout_secs must be positive".into(),
            ));
        }
        // lease は 1 回の配送（全チャネルの timeout）より長くないと二重送信しうる
        if s.claim_lease_secs <= s.notifier_timeout_secs {
            return Err(TaskbellError::Config(format!(
                "scheduler.claim_lease_secs ({}) must exceed scheduler.notifier_timeout_secs ({})",
                s.claim_lease_secs, s.notifier_timeout_secs
            )));
        }

        let p = &self.planner;
        if p.default_channels.iter().all(|c| c.trim().is_empty()) {
            return Err(TaskbellError::Config(
                "planner.default_channels must name at least one channel".into(),
            ));
        }
        if p.default_offsets_mins.contains(&0) {
            return Err(TaskbellError::Config(
                "planner.default_offsets_mins must be positive (use include_exact for a zero offset)"
                    .into(),
            ));
        }
        let max_offset_secs = p.max_offset_hours.checked_mul(3600).ok_or_else(|| {
            TaskbellError::Config(format!(
                "planner.max_offset_hours is too large: {}",
                p.max_offset_hours
            ))
        })?;
        if p.urgent_threshold_mins.checked_mul(60).is_none() {
            return Err(TaskbellError::Config(format!(
                "planner.urgent_threshold_mins is too large: {}",
                p.urgent_threshold_mins
            )));
        }
        if p.default_offsets_mins
            .iter()
            .any(|m| m.checked_mul(60).is_none_or(|secs| secs > max_offset_secs))
        {
            return Err(TaskbellError::Config(
                "planner.default_offsets_mins exceed planner.max_offset_hours".into(),
            ));
        }
        Ok(())
    }
}
