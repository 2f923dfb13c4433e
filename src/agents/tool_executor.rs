//! Tool execution agent.
//!
//! The sandboxed execution engine is opaque: submit a job, await its value,
//! publish the completion back to the requesting agent. Requests arrive on
//! this agent's own channel and on the shared `tool_requests` channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::error::{ConclaveError, Result};
use crate::protocol::{MessageIntent, Task, TaskEvent, TaskOutcome, TaskResult};
use crate::runtime::{AgentContext, AgentHandler, AgentNotes};

/// Opaque sandboxed tool backend.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    async fn execute(&self, tool: &str, parameters: &Value) -> Result<Value>;
}

/// Backend standing in for the sandbox in tests and offline runs.
pub struct EchoBackend;

#[async_trait]
impl ToolBackend for EchoBackend {
    async fn execute(&self, tool: &str, parameters: &Value) -> Result<Value> {
        Ok(json!({ "tool": tool, "echo": parameters }))
    }
}

#[derive(Debug, Deserialize)]
struct ToolRequest {
    tool_name: String,
    #[serde(default)]
    parameters: Value,
}

pub struct ToolExecutorAgent {
    name: String,
    backend: Arc<dyn ToolBackend>,
    call_timeout: Duration,
}

impl ToolExecutorAgent {
    pub fn new(name: impl Into<String>, backend: Arc<dyn ToolBackend>) -> Self {
        Self {
            name: name.into(),
            backend,
            call_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

#[async_trait]
impl AgentHandler for ToolExecutorAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_notes(&self) -> AgentNotes {
        AgentNotes::online(&self.name, "executing tool requests")
    }

    async fn on_task(&self, ctx: &AgentContext, task: Task) -> Result<()> {
        if task.intent != MessageIntent::ToolExecute && task.intent != MessageIntent::ToolSuggest {
            return ctx
                .publish_error(
                    &task.task_id,
                    "tool executor only accepts tool requests",
                    &task.agent,
                )
                .await;
        }

        let request: ToolRequest = serde_json::from_str(&task.content).map_err(|e| {
            ConclaveError::Protocol(format!("tool request is not valid JSON: {e}"))
        })?;

        if task.intent == MessageIntent::ToolSuggest {
            let suggestion = json!({
                "tool_name": request.tool_name,
                "accepted": true,
            });
            let reply = Task::new(
                &task.task_id,
                &self.name,
                suggestion.to_string(),
                &task.agent,
                MessageIntent::ToolSuggest,
                task.event.clone(),
            );
            return ctx.publish_task(&reply).await;
        }

        info!(
            task_id = %task.task_id,
            tool = %request.tool_name,
            requester = %task.agent,
            "Executing tool"
        );

        let value = tokio::time::timeout(
            self.call_timeout,
            self.backend.execute(&request.tool_name, &request.parameters),
        )
        .await
        .map_err(|_| ConclaveError::Timeout(format!("tool {}", request.tool_name)))??;

        let mut result = TaskResult::new(
            &task.task_id,
            &self.name,
            value.to_string(),
            &task.agent,
            TaskEvent::Complete,
            TaskOutcome::Completed,
        )
        .with_contributors(vec![self.name.clone()]);
        result.intent = MessageIntent::ToolExecute;
        ctx.publish_result(&result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Bus, MemoryBus};
    use crate::runtime::RuntimeCounters;

    fn ctx(bus: &Arc<dyn Bus>) -> AgentContext {
        AgentContext::new(
            Arc::clone(bus),
            "tool_executor",
            Arc::new(RuntimeCounters::default()),
        )
    }

    #[tokio::test]
    async fn test_tool_completion_addressed_to_requester() {
        let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());
        let mut requester = bus.subscribe("worker_a_channel").await.unwrap();

        let agent = ToolExecutorAgent::new("tool_executor", Arc::new(EchoBackend));
        let task = Task::new(
            "t1",
            "worker_a",
            json!({"tool_name": "calculator", "parameters": {"a": 1}}).to_string(),
            "tool_executor",
            MessageIntent::ToolExecute,
            TaskEvent::Execute,
        );
        agent.on_task(&ctx(&bus), task).await.unwrap();

        let raw = requester.recv().await.unwrap();
        let result: TaskResult = serde_json::from_str(&raw).unwrap();
        assert_eq!(result.intent, MessageIntent::ToolExecute);
        assert_eq!(result.outcome, TaskOutcome::Completed);
        assert!(result.content.contains("calculator"));
    }

    #[tokio::test]
    async fn test_invalid_request_is_protocol_error() {
        let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());
        let agent = ToolExecutorAgent::new("tool_executor", Arc::new(EchoBackend));

        let task = Task::new(
            "t1",
            "worker_a",
            "not json at all",
            "tool_executor",
            MessageIntent::ToolExecute,
            TaskEvent::Execute,
        );
        let err = agent.on_task(&ctx(&bus), task).await.unwrap_err();
        assert!(matches!(err, ConclaveError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_non_tool_intent_rejected() {
        let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());
        let mut requester = bus.subscribe("worker_a_channel").await.unwrap();

        let agent = ToolExecutorAgent::new("tool_executor", Arc::new(EchoBackend));
        let task = Task::new(
            "t1",
            "worker_a",
            "hello",
            "tool_executor",
            MessageIntent::StartTask,
            TaskEvent::Plan,
        );
        agent.on_task(&ctx(&bus), task).await.unwrap();

        let raw = requester.recv().await.unwrap();
        let result: TaskResult = serde_json::from_str(&raw).unwrap();
        assert_eq!(result.outcome, TaskOutcome::Escalated);
    }
}
