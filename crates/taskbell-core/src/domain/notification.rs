//! Notification records: what a notifier receives and what the history keeps.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::alert::AlertKind;
use super::ids::{AlertId, Channel, OwnerId, TaskId};
use super::task::Priority;
use crate::error::NotifyError;

/// Delivery details the front-ends know about a student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerProfile {
    pub owner_id: OwnerId,
    pub display_name: String,
    /// Channel-specific address (chat id, mail address, ...).
    #[serde(default)]
    pub addresses: BTreeMap<Channel, String>,
}

impl OwnerProfile {
    /// Profile with no addresses; notifiers fall back to the owner id.
    pub fn anonymous(owner_id: OwnerId) -> Self {
        Self {
            display_name: owner_id.to_string(),
            owner_id,
            addresses: BTreeMap::new(),
        }
    }

    pub fn with_address(mut self, channel: Channel, address: impl Into<String>) -> Self {
        self.addresses.insert(channel, address.into());
        self
    }

    pub fn address_for(&self, channel: &Channel) -> &str {
        self.addresses
            .get(channel)
            .map(String::as_str)
            .unwrap_or(self.owner_id.as_str())
    }
}

/// Channel-formatted message handed to a `Notifier`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub alert_id: AlertId,
    pub task_id: TaskId,
    pub channel: Channel,
    pub kind: AlertKind,
    pub priority: Priority,
    /// Subject line (email) or heading (chat).
    pub subject: String,
    pub body: String,
}

/// Result of one channel for one alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelOutcome {
    pub channel: Channel,
    pub delivered: bool,
    pub error: Option<String>,
}

impl ChannelOutcome {
    pub fn delivered(channel: Channel) -> Self {
        Self {
            channel,
            delivered: true,
            error: None,
        }
    }

    pub fn failed(channel: Channel, err: &NotifyError) -> Self {
        Self {
            channel,
            delivered: false,
            error: Some(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub alert_id: AlertId,
    pub outcomes: Vec<ChannelOutcome>,
}

impl DispatchResult {
    /// Delivered when at least one channel succeeded.
    pub fn is_delivered(&self) -> bool {
        self.outcomes.iter().any(|o| o.delivered)
    }

    /// Joined error text of the failed channels.
    pub fn failure_summary(&self) -> String {
        let errors: Vec<&str> = self
            .outcomes
            .iter()
            .filter_map(|o| o.error.as_deref())
            .collect();
        if errors.is_empty() {
            "no channels configured".to_string()
        } else {
            errors.join("; ")
        }
    }
}

/// Append-only history entry, one per dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub alert_id: AlertId,
    pub task_id: TaskId,
    pub owner_id: OwnerId,
    pub kind: AlertKind,
    pub outcomes: Vec<ChannelOutcome>,
    pub delivered: bool,
    pub recorded_at: DateTime<Utc>,
}
