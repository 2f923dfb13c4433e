//! The capability interface every agent variant implements, plus the
//! publishing context handed to handlers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::bus::Bus;
use crate::error::Result;
use crate::protocol::channels::{agent_channel, FRONTEND_BROADCAST};
use crate::protocol::{
    encode, Message, MessageIntent, StreamEvent, Task, TaskEvent, TaskOutcome, TaskResult,
};

const PUBLISH_RETRIES: u32 = 3;
const PUBLISH_RETRY_BASE: Duration = Duration::from_millis(100);

/// Startup self-description published on an agent's own channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentNotes {
    pub agent: String,
    pub content: String,
    pub status: String,
}

impl AgentNotes {
    pub fn online(agent: &str, content: impl Into<String>) -> Self {
        Self {
            agent: agent.to_string(),
            content: content.into(),
            status: "active".to_string(),
        }
    }
}

/// Counters shared between the runtime and its context.
#[derive(Debug, Default)]
pub struct RuntimeCounters {
    pub malformed_messages: AtomicU64,
    pub duplicates_dropped: AtomicU64,
    pub handler_errors: AtomicU64,
    pub publish_failures: AtomicU64,
    pub shed_jobs: AtomicU64,
    pub dispatched: AtomicU64,
}

impl RuntimeCounters {
    pub fn malformed(&self) -> u64 {
        self.malformed_messages.load(Ordering::Relaxed)
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates_dropped.load(Ordering::Relaxed)
    }

    pub fn dispatched_total(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }
}

/// Publishing surface for handlers. Agents address each other by name only;
/// channel resolution stays behind this type.
pub struct AgentContext {
    bus: Arc<dyn Bus>,
    agent: String,
    counters: Arc<RuntimeCounters>,
}

impl AgentContext {
    pub fn new(bus: Arc<dyn Bus>, agent: impl Into<String>, counters: Arc<RuntimeCounters>) -> Self {
        Self {
            bus,
            agent: agent.into(),
            counters,
        }
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn bus(&self) -> &Arc<dyn Bus> {
        &self.bus
    }

    pub fn counters(&self) -> &Arc<RuntimeCounters> {
        &self.counters
    }

    /// Publish with bounded retries; after the budget is spent, emit an
    /// error payload on this agent's own channel and report failure.
    async fn publish_with_retry(&self, channel: &str, payload: &str) -> Result<()> {
        let mut delay = PUBLISH_RETRY_BASE;
        let mut last_err = None;

        for attempt in 0..PUBLISH_RETRIES {
            match self.bus.publish(channel, payload).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() => {
                    debug!(channel = %channel, attempt, error = %e, "Publish retry");
                    last_err = Some(e);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => {
                    last_err = Some(e);
                    break;
                }
            }
        }

        let err = last_err.expect("retry loop ran at least once");
        self.counters.publish_failures.fetch_add(1, Ordering::Relaxed);
        error!(agent = %self.agent, channel = %channel, error = %err, "Publish failed");

        let notice = Message::new("system", &self.agent, err.to_string(), MessageIntent::Chat);
        if let Ok(raw) = encode(&notice) {
            let _ = self.bus.publish(&agent_channel(&self.agent), &raw).await;
        }
        Err(err)
    }

    pub async fn publish_to_agent<T: Serialize>(&self, target: &str, payload: &T) -> Result<()> {
        let raw = encode(payload)?;
        self.publish_with_retry(&agent_channel(target), &raw).await
    }

    pub async fn publish_to_frontend<T: Serialize>(&self, payload: &T) -> Result<()> {
        let raw = encode(payload)?;
        self.publish_with_retry(FRONTEND_BROADCAST, &raw).await
    }

    /// Send a task to the target agent and mirror it to the UI fan-out.
    pub async fn publish_task(&self, task: &Task) -> Result<()> {
        self.publish_to_agent(&task.target_agent, task).await?;
        self.publish_to_frontend(task).await
    }

    /// Send a result to the target agent and mirror it to the UI fan-out.
    pub async fn publish_result(&self, result: &TaskResult) -> Result<()> {
        self.publish_to_agent(&result.target_agent, result).await?;
        self.publish_to_frontend(result).await
    }

    /// Publish a failure result for a task, addressed to the requester.
    pub async fn publish_error(&self, task_id: &str, cause: &str, target: &str) -> Result<()> {
        let result = TaskResult::new(
            task_id,
            &self.agent,
            format!("Error: {cause}"),
            target,
            TaskEvent::Escalate,
            TaskOutcome::Escalated,
        )
        .with_confidence(0.0);

        if target != self.agent {
            self.publish_to_agent(target, &result).await?;
        }
        self.publish_to_frontend(&result).await
    }

    /// Forward a streaming event to the UI fan-out.
    pub async fn publish_stream(&self, event: &StreamEvent) -> Result<()> {
        self.publish_to_frontend(event).await
    }
}

/// Capability set dispatched by intent. Default implementations ignore what
/// a variant does not care about, the way most agents ignore chatter.
#[async_trait]
pub trait AgentHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn get_notes(&self) -> AgentNotes {
        AgentNotes::online(self.name(), format!("{} online", self.name()))
    }

    async fn on_message(&self, _ctx: &AgentContext, message: Message) -> Result<()> {
        debug!(agent = self.name(), from = %message.agent, "Chat ignored");
        Ok(())
    }

    async fn on_task(&self, ctx: &AgentContext, task: Task) -> Result<()>;

    async fn on_task_result(&self, _ctx: &AgentContext, result: TaskResult) -> Result<()> {
        debug!(agent = self.name(), task_id = %result.task_id, "Result ignored");
        Ok(())
    }

    async fn on_tool_response(&self, _ctx: &AgentContext, result: TaskResult) -> Result<()> {
        warn!(
            agent = self.name(),
            task_id = %result.task_id,
            "Tool response received but not handled"
        );
        Ok(())
    }

    async fn on_check_status(&self, ctx: &AgentContext, message: Message) -> Result<()> {
        let reply = Message::new(
            &message.task_id,
            ctx.agent(),
            "Status check received, task is pending or in progress.",
            MessageIntent::Chat,
        )
        .with_target(message.agent.clone());
        ctx.publish_to_agent(&message.agent, &reply).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;

    #[tokio::test]
    async fn test_publish_error_targets_requester_and_frontend() {
        let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());
        let mut requester = bus.subscribe("moderator_channel").await.unwrap();
        let mut frontend = bus.subscribe(FRONTEND_BROADCAST).await.unwrap();

        let ctx = AgentContext::new(
            Arc::clone(&bus),
            "worker_a",
            Arc::new(RuntimeCounters::default()),
        );
        ctx.publish_error("t1", "provider timeout", "moderator")
            .await
            .unwrap();

        let raw = requester.recv().await.unwrap();
        let result: TaskResult = serde_json::from_str(&raw).unwrap();
        assert_eq!(result.outcome, TaskOutcome::Escalated);
        assert!(result.content.contains("provider timeout"));
        assert_eq!(result.confidence, Some(0.0));

        assert!(frontend.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_publish_error_to_self_skips_own_channel() {
        let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());
        let mut own = bus.subscribe("worker_a_channel").await.unwrap();

        let ctx = AgentContext::new(
            Arc::clone(&bus),
            "worker_a",
            Arc::new(RuntimeCounters::default()),
        );
        ctx.publish_error("t1", "boom", "worker_a").await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(own.try_recv().is_none());
    }
}
