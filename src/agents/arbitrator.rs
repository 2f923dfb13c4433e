//! The arbitrator critiques proposals during the execute stage.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ConclaveError, Result};
use crate::llm::TextGenerator;
use crate::protocol::{MessageIntent, Task};
use crate::runtime::{AgentContext, AgentHandler, AgentNotes};

pub struct ArbitratorAgent {
    name: String,
    generator: Arc<dyn TextGenerator>,
    call_timeout: Duration,
}

impl ArbitratorAgent {
    pub fn new(name: impl Into<String>, generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            name: name.into(),
            generator,
            call_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

#[async_trait]
impl AgentHandler for ArbitratorAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_notes(&self) -> AgentNotes {
        AgentNotes::online(&self.name, "critiquing proposals")
    }

    async fn on_task(&self, ctx: &AgentContext, task: Task) -> Result<()> {
        let prompt = format!(
            "Critique the following proposal. Name its weakest point and \
             whether it answers the original request.\n\n{}",
            task.content
        );
        let generation = tokio::time::timeout(self.call_timeout, self.generator.generate(&prompt))
            .await
            .map_err(|_| ConclaveError::Timeout("critique generation".into()))??;

        let critique = Task::new(
            &task.task_id,
            &self.name,
            generation.content,
            &task.agent,
            MessageIntent::ModifyTask,
            task.event.clone(),
        )
        .with_confidence(generation.confidence);
        ctx.publish_task(&critique).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Bus, MemoryBus};
    use crate::llm::CannedGenerator;
    use crate::protocol::TaskEvent;
    use crate::runtime::RuntimeCounters;

    #[tokio::test]
    async fn test_critique_echoes_event_back_to_sender() {
        let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());
        let mut moderator = bus.subscribe("moderator_channel").await.unwrap();

        let ctx = AgentContext::new(
            Arc::clone(&bus),
            "arbitrator",
            Arc::new(RuntimeCounters::default()),
        );
        let agent = ArbitratorAgent::new("arbitrator", Arc::new(CannedGenerator::default()));

        let task = Task::new(
            "t1",
            "moderator",
            "proposal text",
            "arbitrator",
            MessageIntent::ModifyTask,
            TaskEvent::Execute,
        );
        agent.on_task(&ctx, task).await.unwrap();

        let raw = moderator.recv().await.unwrap();
        let critique: Task = serde_json::from_str(&raw).unwrap();
        assert_eq!(critique.agent, "arbitrator");
        assert_eq!(critique.event, TaskEvent::Execute);
        assert_eq!(critique.target_agent, "moderator");
    }
}
