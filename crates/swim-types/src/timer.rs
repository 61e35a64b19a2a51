//! Outstanding timer bookkeeping.
//!
//! Each state machine keeps one [`TimerTable`] mapping an opaque [`TimerId`]
//! to a tagged event. A timer that fires after it was cancelled or already
//! consumed is simply absent from the table, which makes stale firings a
//! no-op.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Correlation id of one scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimerId(pub u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Map of outstanding timers to their events.
#[derive(Debug, Clone)]
pub struct TimerTable<E> {
    next_id: u64,
    pending: HashMap<TimerId, E>,
}

impl<E> Default for TimerTable<E> {
    fn default() -> Self {
        Self {
            next_id: 0,
            pending: HashMap::new(),
        }
    }
}

impl<E> TimerTable<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `event` under a fresh id.
    pub fn insert(&mut self, event: E) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.pending.insert(id, event);
        id
    }

    /// Remove and return the event for a fired timer.
    pub fn take(&mut self, id: TimerId) -> Option<E> {
        self.pending.remove(&id)
    }

    pub fn get(&self, id: TimerId) -> Option<&E> {
        self.pending.get(&id)
    }

    pub fn contains(&self, id: TimerId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Ids of timers whose event matches `pred`.
    pub fn find(&self, mut pred: impl FnMut(&E) -> bool) -> Vec<TimerId> {
        let mut ids: Vec<TimerId> = self
            .pending
            .iter()
            .filter(|(_, event)| pred(event))
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    /// Remove every outstanding timer, returning their ids in issue order.
    pub fn drain(&mut self) -> Vec<TimerId> {
        let mut ids: Vec<TimerId> = self.pending.drain().map(|(id, _)| id).collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fired_timer_is_consumed_once() {
        let mut table = TimerTable::new();
        let a = table.insert("probe");
        let b = table.insert("status");
        assert_ne!(a, b);

        assert_eq!(table.take(a), Some("probe"));
        assert_eq!(table.take(a), None);
        assert!(table.contains(b));
    }

    #[test]
    fn drain_returns_ids_in_issue_order() {
        let mut table = TimerTable::new();
        let ids: Vec<_> = (0..5).map(|i| table.insert(i)).collect();
        assert_eq!(table.find(|e| *e % 2 == 0), vec![ids[0], ids[2], ids[4]]);
        assert_eq!(table.drain(), ids);
        assert!(table.is_empty());
    }
}
