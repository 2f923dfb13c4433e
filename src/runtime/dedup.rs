//! Duplicate suppression for redelivered payloads.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};

use crate::protocol::MessageIntent;

/// Identity of a delivery: the same task, intent, and sender timestamp means
/// the same logical message regardless of how often the bus hands it over.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    task_id: String,
    intent: String,
    timestamp_micros: i64,
}

impl DedupKey {
    pub fn new(task_id: &str, intent: &MessageIntent, timestamp: DateTime<Utc>) -> Self {
        Self {
            task_id: task_id.to_string(),
            intent: intent.as_str().to_string(),
            timestamp_micros: timestamp.timestamp_micros(),
        }
    }
}

/// Bounded first-in-first-out set of recently seen delivery keys.
pub struct DedupSet {
    capacity: usize,
    order: VecDeque<DedupKey>,
    seen: HashSet<DedupKey>,
}

impl DedupSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Record a key. Returns false when the key was already present, in
    /// which case the delivery must be dropped silently.
    pub fn insert(&mut self, key: DedupKey) -> bool {
        if self.seen.contains(&key) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        self.order.push_back(key.clone());
        self.seen.insert(key);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(task: &str, ts: i64) -> DedupKey {
        DedupKey {
            task_id: task.to_string(),
            intent: "start_task".to_string(),
            timestamp_micros: ts,
        }
    }

    #[test]
    fn test_duplicate_detected() {
        let mut set = DedupSet::new(8);
        assert!(set.insert(key("t1", 100)));
        assert!(!set.insert(key("t1", 100)));
        assert!(set.insert(key("t1", 101)));
    }

    #[test]
    fn test_eviction_is_fifo() {
        let mut set = DedupSet::new(2);
        assert!(set.insert(key("t1", 1)));
        assert!(set.insert(key("t2", 2)));
        assert!(set.insert(key("t3", 3)));

        // t1 was evicted, so its key is acceptable again.
        assert!(set.insert(key("t1", 1)));
        assert_eq!(set.len(), 2);
    }
}
