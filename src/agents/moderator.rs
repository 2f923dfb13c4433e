//! The moderator hosts the debate state machine.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::orchestrator::DebateOrchestrator;
use crate::protocol::{Message, MessageIntent, Task, TaskResult};
use crate::runtime::{AgentContext, AgentHandler, AgentNotes};

pub struct ModeratorAgent {
    name: String,
    orchestrator: Arc<DebateOrchestrator>,
}

impl ModeratorAgent {
    pub fn new(name: impl Into<String>, orchestrator: Arc<DebateOrchestrator>) -> Self {
        Self {
            name: name.into(),
            orchestrator,
        }
    }

    pub fn orchestrator(&self) -> &Arc<DebateOrchestrator> {
        &self.orchestrator
    }
}

#[async_trait]
impl AgentHandler for ModeratorAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_notes(&self) -> AgentNotes {
        AgentNotes::online(&self.name, "moderating debates and routing tasks")
    }

    async fn on_task(&self, ctx: &AgentContext, task: Task) -> Result<()> {
        match task.intent {
            MessageIntent::StartTask => self.orchestrator.start_task(ctx, &task).await,
            MessageIntent::ModifyTask => self.orchestrator.on_update(ctx, &task).await,
            ref other => {
                debug!(intent = %other, task_id = %task.task_id, "Task intent not for the moderator");
                Ok(())
            }
        }
    }

    async fn on_task_result(&self, ctx: &AgentContext, result: TaskResult) -> Result<()> {
        self.orchestrator.on_result(ctx, &result).await
    }

    async fn on_check_status(&self, ctx: &AgentContext, message: Message) -> Result<()> {
        self.orchestrator.check_status(ctx, &message).await
    }
}
