//! Agent liveness: TTL-bounded heartbeat keys and the readiness monitor.
//!
//! Liveness is purely TTL-based; no wall clocks are compared, so skew up to
//! one interval between processes is harmless.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bus::Bus;
use crate::error::Result;
use crate::protocol::channels::{heartbeat_key, FRONTEND_BROADCAST, SYSTEM_STATUS};

/// How long the stored status snapshot stays readable for late joiners.
const SNAPSHOT_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Online,
    Offline,
}

/// Aggregate readiness view published on every monitor tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub agent_status: BTreeMap<String, AgentState>,
    pub system_ready: bool,
    pub timestamp: DateTime<Utc>,
}

impl SystemStatus {
    pub fn missing_agents(&self) -> Vec<&str> {
        self.agent_status
            .iter()
            .filter(|(_, state)| **state == AgentState::Offline)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Wire frame wrapping a status payload for broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    pub payload: SystemStatus,
}

impl StatusFrame {
    pub fn new(payload: SystemStatus) -> Self {
        Self {
            frame_type: "system_status_update".to_string(),
            payload,
        }
    }
}

/// Writes this agent's liveness key every interval with a 3x TTL.
pub struct HeartbeatEmitter {
    bus: Arc<dyn Bus>,
    agent: String,
    interval: Duration,
    ttl: Duration,
}

impl HeartbeatEmitter {
    pub fn new(bus: Arc<dyn Bus>, agent: impl Into<String>, interval: Duration) -> Self {
        Self {
            bus,
            agent: agent.into(),
            interval,
            ttl: interval * 3,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Emit until the shutdown signal flips, then mark the agent offline so
    /// the monitor reports the transition without waiting for expiry.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let key = heartbeat_key(&self.agent);
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.bus.set_with_ttl(&key, "alive", self.ttl).await {
                        warn!(agent = %self.agent, error = %e, "Heartbeat write failed");
                    } else {
                        debug!(agent = %self.agent, "Heartbeat");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if let Err(e) = self.bus.set_with_ttl(&key, "offline", self.ttl).await {
            warn!(agent = %self.agent, error = %e, "Failed to mark heartbeat offline");
        }
        info!(agent = %self.agent, "Heartbeat stopped");
    }
}

/// Polls all expected heartbeat keys at half the heartbeat interval and
/// publishes a `system_status_update` on every tick. Transitions are logged
/// and, because the poll period is interval/2, surface within one tick of
/// key expiry.
pub struct ReadinessMonitor {
    bus: Arc<dyn Bus>,
    required: Vec<String>,
    interval: Duration,
}

impl ReadinessMonitor {
    pub fn new(bus: Arc<dyn Bus>, required: Vec<String>, interval: Duration) -> Self {
        Self {
            bus,
            required,
            interval,
        }
    }

    /// One readiness pass over all required agents.
    pub async fn check(&self) -> SystemStatus {
        let mut agent_status = BTreeMap::new();

        for agent in &self.required {
            let state = match self.bus.get(&heartbeat_key(agent)).await {
                Ok(Some(value)) if value == "alive" => AgentState::Online,
                Ok(_) => AgentState::Offline,
                Err(e) => {
                    warn!(agent = %agent, error = %e, "Heartbeat read failed");
                    AgentState::Offline
                }
            };
            agent_status.insert(agent.clone(), state);
        }

        let system_ready = agent_status.values().all(|s| *s == AgentState::Online);

        SystemStatus {
            agent_status,
            system_ready,
            timestamp: Utc::now(),
        }
    }

    /// Publish a status frame to the status channel, mirror it to the
    /// frontend broadcast, and store a snapshot for late-joining gateways.
    pub async fn publish(&self, status: &SystemStatus) -> Result<()> {
        let frame = serde_json::to_string(&StatusFrame::new(status.clone()))?;
        self.bus.publish(SYSTEM_STATUS, &frame).await?;
        self.bus.publish(FRONTEND_BROADCAST, &frame).await?;
        self.bus
            .set_with_ttl(SYSTEM_STATUS, &frame, SNAPSHOT_TTL)
            .await?;
        Ok(())
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let poll = (self.interval / 2).max(Duration::from_millis(10));
        let mut ticker = tokio::time::interval(poll);
        let mut last: Option<BTreeMap<String, AgentState>> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let status = self.check().await;

                    if last.as_ref() != Some(&status.agent_status) {
                        info!(
                            ready = status.system_ready,
                            missing = ?status.missing_agents(),
                            "Agent readiness changed"
                        );
                    }
                    last = Some(status.agent_status.clone());

                    if let Err(e) = self.publish(&status).await {
                        warn!(error = %e, "Status publish failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Readiness monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;

    fn bus() -> Arc<dyn Bus> {
        Arc::new(MemoryBus::new())
    }

    #[tokio::test]
    async fn test_monitor_reports_online_after_heartbeat() {
        let bus = bus();
        bus.set_with_ttl("worker_a_heartbeat", "alive", Duration::from_secs(5))
            .await
            .unwrap();

        let monitor = ReadinessMonitor::new(
            Arc::clone(&bus),
            vec!["worker_a".into()],
            Duration::from_secs(5),
        );
        let status = monitor.check().await;

        assert_eq!(status.agent_status["worker_a"], AgentState::Online);
        assert!(status.system_ready);
    }

    #[tokio::test]
    async fn test_monitor_reports_offline_after_expiry() {
        let bus = bus();
        bus.set_with_ttl("worker_b_heartbeat", "alive", Duration::from_millis(20))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;

        let monitor = ReadinessMonitor::new(
            Arc::clone(&bus),
            vec!["worker_b".into()],
            Duration::from_secs(5),
        );
        let status = monitor.check().await;

        assert_eq!(status.agent_status["worker_b"], AgentState::Offline);
        assert!(!status.system_ready);
        assert_eq!(status.missing_agents(), vec!["worker_b"]);
    }

    #[tokio::test]
    async fn test_ready_requires_every_agent() {
        let bus = bus();
        bus.set_with_ttl("alpha_heartbeat", "alive", Duration::from_secs(5))
            .await
            .unwrap();

        let monitor = ReadinessMonitor::new(
            Arc::clone(&bus),
            vec!["alpha".into(), "beta".into()],
            Duration::from_secs(5),
        );
        let status = monitor.check().await;

        assert_eq!(status.agent_status["alpha"], AgentState::Online);
        assert_eq!(status.agent_status["beta"], AgentState::Offline);
        assert!(!status.system_ready);
    }

    #[tokio::test]
    async fn test_publish_broadcasts_and_stores_snapshot() {
        let bus = bus();
        let mut status_sub = bus.subscribe(SYSTEM_STATUS).await.unwrap();
        let mut frontend_sub = bus.subscribe(FRONTEND_BROADCAST).await.unwrap();

        let monitor = ReadinessMonitor::new(Arc::clone(&bus), vec![], Duration::from_secs(5));
        let status = monitor.check().await;
        monitor.publish(&status).await.unwrap();

        let raw = status_sub.recv().await.unwrap();
        let frame: StatusFrame = serde_json::from_str(&raw).unwrap();
        assert_eq!(frame.frame_type, "system_status_update");
        assert!(frame.payload.system_ready);

        assert!(frontend_sub.recv().await.is_some());
        assert!(bus.get(SYSTEM_STATUS).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_emitter_writes_and_marks_offline_on_shutdown() {
        let bus = bus();
        let emitter = HeartbeatEmitter::new(
            Arc::clone(&bus),
            "worker_c",
            Duration::from_millis(10),
        );

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(emitter.run(rx));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(
            bus.get("worker_c_heartbeat").await.unwrap().as_deref(),
            Some("alive")
        );

        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(
            bus.get("worker_c_heartbeat").await.unwrap().as_deref(),
            Some("offline")
        );
    }
}
