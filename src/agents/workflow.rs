//! Workflow generator: turns a request into an ordered step plan.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ConclaveError, Result};
use crate::llm::TextGenerator;
use crate::protocol::{MessageIntent, Task};
use crate::runtime::{AgentContext, AgentHandler, AgentNotes};

pub struct WorkflowGeneratorAgent {
    name: String,
    generator: Arc<dyn TextGenerator>,
    call_timeout: Duration,
}

impl WorkflowGeneratorAgent {
    pub fn new(name: impl Into<String>, generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            name: name.into(),
            generator,
            call_timeout: Duration::from_secs(60),
        }
    }
}

#[async_trait]
impl AgentHandler for WorkflowGeneratorAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_notes(&self) -> AgentNotes {
        AgentNotes::online(&self.name, "decomposing requests into workflows")
    }

    async fn on_task(&self, ctx: &AgentContext, task: Task) -> Result<()> {
        let prompt = format!(
            "Break the following request into a short numbered list of \
             concrete steps.\n\n{}",
            task.content
        );
        let generation = tokio::time::timeout(self.call_timeout, self.generator.generate(&prompt))
            .await
            .map_err(|_| ConclaveError::Timeout("workflow generation".into()))??;

        let plan = Task::new(
            &task.task_id,
            &self.name,
            generation.content,
            &task.agent,
            MessageIntent::ModifyTask,
            task.event.clone(),
        )
        .with_confidence(generation.confidence);
        ctx.publish_task(&plan).await
    }
}
