//! In-process bus for tests and single-process deployments.
//!
//! Mirrors the broker contract: per-channel broadcast with at-most-once
//! delivery to live subscribers, lossy under lag, plus a TTL key store with
//! lazy expiry.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::error::Result;

use super::adapter::{Bus, Subscription};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
pub struct MemoryBus {
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    keys: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .lock()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        // No receivers means the message is lost, matching broker semantics.
        let _ = self.sender(channel).send(payload.to_string());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let mut source = self.sender(channel).subscribe();
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let channel_name = channel.to_string();

        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(payload) => {
                        if tx.send(payload).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(channel = %channel_name, skipped, "Subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        Ok(Subscription::new(channel, rx))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.keys
            .lock()
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut keys = self.keys.lock();
        match keys.get(key) {
            Some((value, expiry)) if *expiry > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                keys.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        let mut keys = self.keys.lock();
        keys.retain(|_, (_, expiry)| *expiry > now);
        Ok(keys
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn close(&self) -> Result<()> {
        self.channels.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = MemoryBus::new();
        let mut sub = bus.subscribe("worker_a_channel").await.unwrap();

        bus.publish("worker_a_channel", "hello").await.unwrap();

        assert_eq!(sub.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_channel_isolation() {
        let bus = MemoryBus::new();
        let mut sub_a = bus.subscribe("a_channel").await.unwrap();
        let mut sub_b = bus.subscribe("b_channel").await.unwrap();

        bus.publish("a_channel", "for a").await.unwrap();

        assert_eq!(sub_a.recv().await.unwrap(), "for a");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(sub_b.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_lost() {
        let bus = MemoryBus::new();
        bus.publish("nobody_channel", "gone").await.unwrap();

        let mut sub = bus.subscribe("nobody_channel").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let bus = MemoryBus::new();
        bus.set_with_ttl("worker_a_heartbeat", "alive", Duration::from_millis(20))
            .await
            .unwrap();

        assert_eq!(
            bus.get("worker_a_heartbeat").await.unwrap().as_deref(),
            Some("alive")
        );

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(bus.get("worker_a_heartbeat").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_scan_by_prefix() {
        let bus = MemoryBus::new();
        bus.set_with_ttl("alpha_heartbeat", "alive", Duration::from_secs(10))
            .await
            .unwrap();
        bus.set_with_ttl("beta_heartbeat", "alive", Duration::from_secs(10))
            .await
            .unwrap();
        bus.set_with_ttl("unrelated", "x", Duration::from_secs(10))
            .await
            .unwrap();

        let mut keys = bus.scan("alpha").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["alpha_heartbeat"]);
    }
}
