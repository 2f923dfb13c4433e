//! Shared agent lifecycle: subscribe, heartbeat, dispatch by intent,
//! publish, drain on shutdown.

pub mod dedup;
pub mod dispatch;
pub mod handler;
pub mod history;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::Bus;
use crate::error::{ConclaveError, Result};
use crate::heartbeat::HeartbeatEmitter;
use crate::protocol::channels::{agent_channel, DEAD_LETTER};
use crate::protocol::{decode, encode, validate, DeadLetter, Envelope, Message, MessageIntent};

use dedup::{DedupKey, DedupSet};
use dispatch::{DispatchPool, PushOutcome};
pub use handler::{AgentContext, AgentHandler, AgentNotes, RuntimeCounters};
use history::TaskHistory;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub heartbeat_interval: Duration,
    pub dispatch_workers: usize,
    pub queue_capacity: usize,
    pub dedup_capacity: usize,
    pub history_per_task: usize,
    pub history_max_tasks: usize,
    pub drain_timeout: Duration,
    /// Channels consumed in addition to the agent's own (e.g. a shared
    /// request channel).
    pub extra_channels: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            dispatch_workers: 4,
            queue_capacity: 64,
            dedup_capacity: 1024,
            history_per_task: 32,
            history_max_tasks: 256,
            drain_timeout: Duration::from_secs(10),
            extra_channels: Vec::new(),
        }
    }
}

/// Builds and launches the concurrent activities of one agent process.
pub struct AgentRuntime {
    bus: Arc<dyn Bus>,
    handler: Arc<dyn AgentHandler>,
    config: RuntimeConfig,
}

impl AgentRuntime {
    pub fn new(bus: Arc<dyn Bus>, handler: Arc<dyn AgentHandler>, config: RuntimeConfig) -> Self {
        Self {
            bus,
            handler,
            config,
        }
    }

    pub async fn start(self) -> Result<RunningAgent> {
        let name = self.handler.name().to_string();
        let counters = Arc::new(RuntimeCounters::default());
        let ctx = Arc::new(AgentContext::new(
            Arc::clone(&self.bus),
            name.clone(),
            Arc::clone(&counters),
        ));

        // Merge the agent's own channel with any extra subscriptions into
        // one inbound stream; per-channel order is preserved by each
        // forwarder.
        let (raw_tx, mut raw_rx) = tokio::sync::mpsc::channel::<String>(256);
        let mut channels = vec![agent_channel(&name)];
        channels.extend(self.config.extra_channels.iter().cloned());
        for channel in channels {
            let mut subscription = self.bus.subscribe(&channel).await?;
            let tx = raw_tx.clone();
            tokio::spawn(async move {
                while let Some(raw) = subscription.recv().await {
                    if tx.send(raw).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(raw_tx);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Announce readiness on our own channel and mirror to the UI.
        let notes = self.handler.get_notes().await;
        let announce = Message::new("system", &name, encode(&notes)?, MessageIntent::Chat);
        ctx.publish_to_agent(&name, &announce).await.ok();
        ctx.publish_to_frontend(&announce).await.ok();

        let heartbeat = HeartbeatEmitter::new(
            Arc::clone(&self.bus),
            name.clone(),
            self.config.heartbeat_interval,
        );
        let heartbeat_handle = tokio::spawn(heartbeat.run(shutdown_rx.clone()));

        let pool = DispatchPool::start(
            self.config.dispatch_workers,
            self.config.queue_capacity,
            Arc::clone(&self.handler),
            Arc::clone(&ctx),
            shutdown_rx.clone(),
        );

        let listener_bus = Arc::clone(&self.bus);
        let listener_counters = Arc::clone(&counters);
        let listener_name = name.clone();
        let mut listener_shutdown = shutdown_rx;
        let config = self.config.clone();

        let listener_handle = tokio::spawn(async move {
            let mut seen = DedupSet::new(config.dedup_capacity);
            let mut history = TaskHistory::new(config.history_per_task, config.history_max_tasks);

            loop {
                tokio::select! {
                    raw = raw_rx.recv() => {
                        let Some(raw) = raw else { break };
                        inbound(
                            &listener_bus,
                            &listener_name,
                            &listener_counters,
                            &pool,
                            &mut seen,
                            &mut history,
                            &raw,
                        )
                        .await;
                    }
                    _ = listener_shutdown.changed() => {
                        if *listener_shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            pool
        });

        info!(agent = %name, "Agent started");

        Ok(RunningAgent {
            name,
            shutdown_tx,
            listener_handle,
            heartbeat_handle,
            drain_timeout: self.config.drain_timeout,
            counters,
            ctx,
        })
    }
}

/// Decode, validate, dedup, and dispatch one raw payload. Bad input never
/// escapes this function: it is counted, dead-lettered, and dropped.
async fn inbound(
    bus: &Arc<dyn Bus>,
    agent: &str,
    counters: &Arc<RuntimeCounters>,
    pool: &DispatchPool,
    seen: &mut DedupSet,
    history: &mut TaskHistory,
    raw: &str,
) {
    let envelope = match decode(raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            dead_letter(
                bus,
                counters,
                DeadLetter::undecodable(agent, raw, e.to_string()),
            )
            .await;
            return;
        }
    };

    if let Err(errors) = validate(&envelope) {
        dead_letter(bus, counters, DeadLetter::invalid(agent, raw, errors)).await;
        return;
    }

    let unknown_enum = !envelope.intent().is_known()
        || match &envelope {
            Envelope::Task(t) => !t.event.is_known(),
            Envelope::TaskResult(r) => {
                !r.event.is_known() || matches!(r.outcome, crate::protocol::TaskOutcome::Unknown(_))
            }
            Envelope::Message(_) => false,
        };
    if unknown_enum {
        dead_letter(
            bus,
            counters,
            DeadLetter::undecodable(agent, raw, "unknown enum literal"),
        )
        .await;
        return;
    }

    // Self-authored payloads (startup notes, error notices) are
    // informational; dispatching them back into the handler would loop.
    if envelope.agent() == agent {
        debug!(agent = %agent, "Self-authored payload skipped");
        return;
    }

    let key = DedupKey::new(envelope.task_id(), envelope.intent(), envelope.timestamp());
    if !seen.insert(key) {
        counters.duplicates_dropped.fetch_add(1, Ordering::Relaxed);
        return;
    }

    history.record(envelope.task_id(), envelope.agent(), envelope.content());
    if let Envelope::TaskResult(result) = &envelope {
        if result.event.is_terminal() {
            history.forget(&result.task_id);
        }
    }

    match pool.dispatch(envelope) {
        PushOutcome::Queued => {}
        PushOutcome::ShedOldest | PushOutcome::RejectedIncoming => {
            counters.shed_jobs.fetch_add(1, Ordering::Relaxed);
        }
    }
}

async fn dead_letter(bus: &Arc<dyn Bus>, counters: &Arc<RuntimeCounters>, letter: DeadLetter) {
    counters.malformed_messages.fetch_add(1, Ordering::Relaxed);
    warn!(
        receiver = %letter.receiver,
        reason = %letter.reason,
        "Payload dead-lettered"
    );
    if let Ok(raw) = encode(&letter) {
        if let Err(e) = bus.publish(DEAD_LETTER, &raw).await {
            warn!(error = %e, "Dead-letter publish failed");
        }
    }
}

/// Handle to a started agent.
pub struct RunningAgent {
    name: String,
    shutdown_tx: watch::Sender<bool>,
    listener_handle: JoinHandle<DispatchPool>,
    heartbeat_handle: JoinHandle<()>,
    drain_timeout: Duration,
    counters: Arc<RuntimeCounters>,
    ctx: Arc<AgentContext>,
}

impl RunningAgent {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn counters(&self) -> &Arc<RuntimeCounters> {
        &self.counters
    }

    pub fn context(&self) -> &Arc<AgentContext> {
        &self.ctx
    }

    /// Stop accepting work, drain in-flight handlers up to the deadline,
    /// and mark the heartbeat offline.
    pub async fn stop(self) -> Result<()> {
        info!(agent = %self.name, "Agent stopping");
        let _ = self.shutdown_tx.send(true);

        let pool = self
            .listener_handle
            .await
            .map_err(|e| ConclaveError::Agent(format!("listener join failed: {e}")))?;

        if tokio::time::timeout(self.drain_timeout, pool.join())
            .await
            .is_err()
        {
            warn!(agent = %self.name, "Drain deadline exceeded, forcing shutdown");
        }

        let _ = self.heartbeat_handle.await;
        info!(agent = %self.name, "Agent stopped");
        Ok(())
    }

    /// Wait forever (until an external signal stops the process).
    pub async fn wait(&mut self) {
        let mut rx = self.shutdown_tx.subscribe();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::protocol::{Task, TaskEvent};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct Recorder {
        name: String,
        tasks: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                tasks: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AgentHandler for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        async fn on_task(&self, _ctx: &AgentContext, task: Task) -> Result<()> {
            self.tasks.lock().push(task.task_id);
            Ok(())
        }
    }

    async fn start_agent(bus: Arc<dyn Bus>, handler: Arc<Recorder>) -> RunningAgent {
        let config = RuntimeConfig {
            heartbeat_interval: Duration::from_millis(50),
            drain_timeout: Duration::from_millis(500),
            ..RuntimeConfig::default()
        };
        AgentRuntime::new(bus, handler, config).start().await.unwrap()
    }

    fn task(task_id: &str) -> Task {
        Task::new(
            task_id,
            "moderator",
            "summarize",
            "worker_a",
            MessageIntent::StartTask,
            TaskEvent::Plan,
        )
    }

    #[tokio::test]
    async fn test_task_dispatched_to_handler() {
        let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());
        let handler = Arc::new(Recorder::new("worker_a"));
        let agent = start_agent(Arc::clone(&bus), Arc::clone(&handler)).await;

        bus.publish("worker_a_channel", &encode(&task("t1")).unwrap())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handler.tasks.lock().as_slice(), ["t1"]);
        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_delivery_suppressed() {
        let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());
        let handler = Arc::new(Recorder::new("worker_a"));
        let agent = start_agent(Arc::clone(&bus), Arc::clone(&handler)).await;

        let raw = encode(&task("t1")).unwrap();
        bus.publish("worker_a_channel", &raw).await.unwrap();
        bus.publish("worker_a_channel", &raw).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handler.tasks.lock().len(), 1);
        assert_eq!(agent.counters().duplicates(), 1);
        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_payload_dead_lettered() {
        let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());
        let mut dead = bus.subscribe(DEAD_LETTER).await.unwrap();
        let handler = Arc::new(Recorder::new("worker_a"));
        let agent = start_agent(Arc::clone(&bus), Arc::clone(&handler)).await;

        bus.publish("worker_a_channel", r#"{"agent":"x","content":"no task id"}"#)
            .await
            .unwrap();

        let letter = dead.recv().await.unwrap();
        assert!(letter.contains("worker_a"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handler.tasks.lock().is_empty());
        assert_eq!(agent.counters().malformed(), 1);
        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_intent_dead_lettered() {
        let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());
        let mut dead = bus.subscribe(DEAD_LETTER).await.unwrap();
        let handler = Arc::new(Recorder::new("worker_a"));
        let agent = start_agent(Arc::clone(&bus), Arc::clone(&handler)).await;

        let raw = r#"{"task_id":"t1","agent":"peer","content":"c","intent":"generate_workflow","timestamp":"2025-03-26T14:00:00Z"}"#;
        bus.publish("worker_a_channel", raw).await.unwrap();

        let letter = dead.recv().await.unwrap();
        assert!(letter.contains("unknown enum literal"));
        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_heartbeat_written_while_running() {
        let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());
        let handler = Arc::new(Recorder::new("worker_a"));
        let agent = start_agent(Arc::clone(&bus), handler).await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(
            bus.get("worker_a_heartbeat").await.unwrap().as_deref(),
            Some("alive")
        );
        agent.stop().await.unwrap();
        assert_eq!(
            bus.get("worker_a_heartbeat").await.unwrap().as_deref(),
            Some("offline")
        );
    }
}
