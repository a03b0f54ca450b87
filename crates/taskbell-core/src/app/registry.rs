//! NotifierRegistry - channel ごとの Notifier を登録・管理
//!
//! 初期化時に組み立て（mutable）、実行時は読むだけ（immutable）。
//! 実行時にロックは要らない。

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::Channel;
use crate::ports::Notifier;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Notifier for channel '{0}' is already registered")]
    AlreadyRegistered(Channel),
}

#[derive(Default)]
pub struct NotifierRegistry {
    notifiers: HashMap<Channel, Arc<dyn Notifier>>,
}

impl NotifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, notifier: Arc<dyn Notifier>) -> Result<(), RegistryError> {
        let channel = notifier.channel();
        if self.notifiers.contains_key(&channel) {
            return Err(RegistryError::AlreadyRegistered(channel));
        }
        self.notifiers.insert(channel, notifier);
        Ok(())
    }

    pub fn get(&self, channel: &Channel) -> Option<&Arc<dyn Notifier>> {
        self.notifiers.get(channel)
    }

    /// Registered channels, sorted.
    pub fn channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self.notifiers.keys().cloned().collect();
        channels.sort();
        channels
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::RecordingNotifier;

    #[test]
    fn register_and_get() {
        let mut registry = NotifierRegistry::new();
        registry
            .register(Arc::new(RecordingNotifier::new(Channel::EMAIL)))
            .unwrap();
        assert!(registry.get(&Channel::new(Channel::EMAIL)).is_some());
        assert!(registry.get(&Channel::new(Channel::TELEGRAM)).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut registry = NotifierRegistry::new();
        registry
            .register(Arc::new(RecordingNotifier::new(Channel::EMAIL)))
            .unwrap();
        let result = registry.register(Arc::new(RecordingNotifier::new(Channel::EMAIL)));
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(c)) if c.as_str() == "email"));
    }

    #[test]
    fn channels_are_sorted() {
        let mut registry = NotifierRegistry::new();
        for channel in [Channel::TELEGRAM, Channel::DASHBOARD, Channel::EMAIL] {
            registry
                .register(Arc::new(RecordingNotifier::new(channel)))
                .unwrap();
        }
        let names: Vec<String> = registry
            .channels()
            .iter()
            .map(|c| c.to_string())
            .collect();
        assert_eq!(names, vec!["dashboard", "email", "telegram"]);
    }
}
