//! Per-client session state: bounded send queue, subscriptions, liveness.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;

pub struct Session {
    pub client_id: String,
    capacity: usize,
    queue: Mutex<VecDeque<(String, bool)>>,
    notify: Notify,
    subscriptions: RwLock<HashSet<String>>,
    dropped_events: AtomicU64,
    missed_pings: AtomicU32,
    last_activity: Mutex<Instant>,
}

impl Session {
    pub fn new(client_id: impl Into<String>, capacity: usize) -> Self {
        Self {
            client_id: client_id.into(),
            capacity: capacity.max(1),
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            subscriptions: RwLock::new(HashSet::new()),
            dropped_events: AtomicU64::new(0),
            missed_pings: AtomicU32::new(0),
            last_activity: Mutex::new(Instant::now()),
        }
    }

    /// Queue an outbound frame. When full, the oldest non-critical entry is
    /// dropped first; a non-critical frame that finds the queue full of
    /// critical entries is dropped itself.
    pub fn enqueue(&self, raw: String, critical: bool) {
        {
            let mut queue = self.queue.lock();
            if queue.len() >= self.capacity {
                if let Some(pos) = queue.iter().position(|(_, c)| !*c) {
                    queue.remove(pos);
                    self.dropped_events.fetch_add(1, Ordering::Relaxed);
                } else if critical {
                    queue.pop_front();
                    self.dropped_events.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.dropped_events.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
            queue.push_back((raw, critical));
        }
        self.notify.notify_one();
    }

    pub fn try_pop(&self) -> Option<String> {
        self.queue.lock().pop_front().map(|(raw, _)| raw)
    }

    pub async fn pop(&self) -> String {
        loop {
            let notified = self.notify.notified();
            if let Some(raw) = self.try_pop() {
                return raw;
            }
            notified.await;
        }
    }

    pub fn subscribe(&self, key: &str) {
        self.subscriptions.write().insert(key.to_string());
    }

    pub fn unsubscribe(&self, key: &str) {
        self.subscriptions.write().remove(key);
    }

    pub fn is_subscribed(&self, key: &str) -> bool {
        self.subscriptions.read().contains(key)
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
        self.missed_pings.store(0, Ordering::Relaxed);
    }

    /// Count a sent ping; returns the number now outstanding.
    pub fn ping_sent(&self) -> u32 {
        self.missed_pings.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn idle_secs(&self) -> f64 {
        self.last_activity.lock().elapsed().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backpressure_drops_oldest_non_critical() {
        let session = Session::new("client-1", 2);
        session.enqueue("chat-1".into(), false);
        session.enqueue("result-1".into(), true);
        session.enqueue("result-2".into(), true);

        assert_eq!(session.dropped_events(), 1);
        assert_eq!(session.try_pop().unwrap(), "result-1");
        assert_eq!(session.try_pop().unwrap(), "result-2");
    }

    #[test]
    fn test_non_critical_rejected_when_full_of_critical() {
        let session = Session::new("client-1", 2);
        session.enqueue("result-1".into(), true);
        session.enqueue("result-2".into(), true);
        session.enqueue("chat".into(), false);

        assert_eq!(session.dropped_events(), 1);
        assert_eq!(session.try_pop().unwrap(), "result-1");
    }

    #[test]
    fn test_subscription_set() {
        let session = Session::new("client-1", 8);
        session.subscribe("task_42");
        assert!(session.is_subscribed("task_42"));
        session.unsubscribe("task_42");
        assert!(!session.is_subscribed("task_42"));
    }

    #[test]
    fn test_ping_counter_resets_on_activity() {
        let session = Session::new("client-1", 8);
        assert_eq!(session.ping_sent(), 1);
        assert_eq!(session.ping_sent(), 2);
        session.touch();
        assert_eq!(session.ping_sent(), 1);
    }
}
