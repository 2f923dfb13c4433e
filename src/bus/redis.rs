//! Redis-backed bus implementation.
//!
//! Commands go through a shared `ConnectionManager`; each subscription owns
//! a dedicated pub/sub connection driven by a background task that
//! reconnects with exponential backoff and resubscribes its channel before
//! delivering further payloads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{ConclaveError, Result};

use super::adapter::{Backoff, Bus, Subscription};

const SUBSCRIPTION_BUFFER: usize = 256;

pub struct RedisBus {
    client: redis::Client,
    manager: ConnectionManager,
    closed: Arc<AtomicBool>,
}

impl RedisBus {
    /// Connect to the broker. Authentication failures are fatal and mapped
    /// to a distinct error so the process can exit with the right code.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| ConclaveError::Config(format!("invalid bus url: {e}")))?;

        let manager = ConnectionManager::new(client.clone()).await.map_err(|e| {
            if e.kind() == redis::ErrorKind::AuthenticationFailed {
                ConclaveError::BusAuth(e.to_string())
            } else {
                ConclaveError::Bus(format!("broker unreachable: {e}"))
            }
        })?;

        info!(url = %url, "Connected to bus");

        Ok(Self {
            client,
            manager,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    fn classify(e: redis::RedisError) -> ConclaveError {
        if e.is_io_error() || e.is_connection_dropped() || e.is_timeout() {
            ConclaveError::BusDisconnected(e.to_string())
        } else {
            ConclaveError::Redis(e)
        }
    }
}

#[async_trait]
impl Bus for RedisBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let receivers: i64 = conn
            .publish(channel, payload)
            .await
            .map_err(Self::classify)?;
        debug!(channel = %channel, receivers, "Published");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let client = self.client.clone();
        let closed = Arc::clone(&self.closed);
        let channel_name = channel.to_string();

        tokio::spawn(async move {
            let mut backoff = Backoff::default();

            while !closed.load(Ordering::Relaxed) {
                match client.get_async_pubsub().await {
                    Ok(mut pubsub) => {
                        if let Err(e) = pubsub.subscribe(&channel_name).await {
                            warn!(channel = %channel_name, error = %e, "Subscribe failed");
                        } else {
                            debug!(channel = %channel_name, "Subscribed");
                            backoff.reset();

                            let mut stream = pubsub.on_message();
                            while let Some(msg) = stream.next().await {
                                match msg.get_payload::<String>() {
                                    Ok(payload) => {
                                        if tx.send(payload).await.is_err() {
                                            // Receiver dropped; subscription over.
                                            return;
                                        }
                                    }
                                    Err(e) => {
                                        warn!(
                                            channel = %channel_name,
                                            error = %e,
                                            "Non-text payload dropped"
                                        );
                                    }
                                }
                            }
                            warn!(channel = %channel_name, "Pub/sub stream ended");
                        }
                    }
                    Err(e) => {
                        warn!(channel = %channel_name, error = %e, "Pub/sub connect failed");
                    }
                }

                if closed.load(Ordering::Relaxed) || tx.is_closed() {
                    return;
                }
                tokio::time::sleep(backoff.next_delay()).await;
            }
        });

        Ok(Subscription::new(channel, rx))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        let secs = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value, secs)
            .await
            .map_err(Self::classify)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        conn.get(key).await.map_err(Self::classify)
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        let pattern = format!("{prefix}*");
        let mut iter = conn
            .scan_match::<_, String>(&pattern)
            .await
            .map_err(Self::classify)?;

        let mut keys = Vec::new();
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}
