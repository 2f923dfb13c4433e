//! Pub/sub + key-value substrate abstraction.
//!
//! Publication is fire-and-forget with at-most-once delivery to currently
//! subscribed consumers; a single channel preserves broker-arrival order and
//! nothing is guaranteed across channels.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::mpsc;

use crate::error::Result;

#[async_trait]
pub trait Bus: Send + Sync {
    /// Publish a payload to a channel. Fails fast with a retryable error
    /// while the broker is unreachable.
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    /// Subscribe to a channel. The returned stream survives broker restarts:
    /// the adapter reconnects with backoff and reinstalls the subscription
    /// before delivering further payloads.
    async fn subscribe(&self, channel: &str) -> Result<Subscription>;

    /// Atomically set a key with a time-to-live.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// All keys starting with the prefix.
    async fn scan(&self, prefix: &str) -> Result<Vec<String>>;

    async fn close(&self) -> Result<()>;
}

/// A live subscription to one channel.
pub struct Subscription {
    channel: String,
    rx: mpsc::Receiver<String>,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, rx: mpsc::Receiver<String>) -> Self {
        Self {
            channel: channel.into(),
            rx,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next payload in broker-arrival order, or `None` once the adapter has
    /// shut down.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}

/// Exponential backoff with ±25% jitter, capped.
#[derive(Debug)]
pub struct Backoff {
    initial: Duration,
    cap: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, cap: Duration) -> Self {
        Self {
            initial,
            cap,
            current: initial,
        }
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    /// The delay to sleep before the next attempt; doubles on each call.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.cap);

        let jitter = rand::thread_rng().gen_range(0.75..=1.25);
        base.mul_f64(jitter)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(4));

        let first = backoff.next_delay();
        assert!(first >= Duration::from_millis(750) && first <= Duration::from_millis(1250));

        let second = backoff.next_delay();
        assert!(second >= Duration::from_millis(1500) && second <= Duration::from_millis(2500));

        // Past the cap every delay stays within the capped jitter band.
        for _ in 0..5 {
            let delay = backoff.next_delay();
            assert!(delay <= Duration::from_secs(5));
        }
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = Backoff::default();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        let delay = backoff.next_delay();
        assert!(delay <= Duration::from_millis(1250));
    }
}
