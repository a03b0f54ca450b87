//! Recent-id guard: bounded LRU set of alerts this process already settled.
//!
//! Only a shortcut that saves a store round trip. The store CAS stays the
//! authority; losing this set (restart) changes nothing.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use crate::domain::AlertId;

pub struct RecentIds {
    capacity: usize,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    order: VecDeque<AlertId>,
    members: HashSet<AlertId>,
}

impl RecentIds {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn contains(&self, id: AlertId) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.members.contains(&id)
    }

    /// Insert or refresh; evicts the least recently inserted id when full.
    pub fn insert(&self, id: AlertId) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.members.contains(&id) {
            inner.order.retain(|x| *x != id);
        } else {
            inner.members.insert(id);
        }
        inner.order.push_back(id);
        while inner.order.len() > self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.members.remove(&evicted);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
