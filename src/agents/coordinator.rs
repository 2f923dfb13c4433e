//! The coordinator answers readiness questions; the monitor loop itself is
//! owned by the heartbeat module and started alongside this agent.

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::protocol::channels::SYSTEM_STATUS;
use crate::protocol::{Message, MessageIntent, Task};
use crate::runtime::{AgentContext, AgentHandler, AgentNotes};

pub struct CoordinatorAgent {
    name: String,
}

impl CoordinatorAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl AgentHandler for CoordinatorAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_notes(&self) -> AgentNotes {
        AgentNotes::online(&self.name, "monitoring agent readiness")
    }

    async fn on_message(&self, ctx: &AgentContext, message: Message) -> Result<()> {
        if !message.content.to_lowercase().contains("status") {
            debug!(from = %message.agent, "Coordinator chat ignored");
            return Ok(());
        }

        // Latest aggregate snapshot written by the readiness monitor.
        let content = match ctx.bus().get(SYSTEM_STATUS).await? {
            Some(snapshot) => snapshot,
            None => "no readiness snapshot available yet".to_string(),
        };

        let reply = Message::new(&message.task_id, &self.name, content, MessageIntent::Chat)
            .with_target(message.agent.clone());
        ctx.publish_to_agent(&message.agent, &reply).await
    }

    async fn on_task(&self, ctx: &AgentContext, task: Task) -> Result<()> {
        ctx.publish_error(
            &task.task_id,
            "coordinator does not accept general tasks",
            &task.agent,
        )
        .await
    }
}
