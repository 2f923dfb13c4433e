//! The refiner reworks a proposal in light of its critique.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ConclaveError, Result};
use crate::llm::TextGenerator;
use crate::protocol::{MessageIntent, Task};
use crate::runtime::{AgentContext, AgentHandler, AgentNotes};

pub struct RefinerAgent {
    name: String,
    generator: Arc<dyn TextGenerator>,
    call_timeout: Duration,
}

impl RefinerAgent {
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
impl AgentHandler for RefinerAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_notes(&self) -> AgentNotes {
        AgentNotes::online(&self.name, "refining proposals from critique")
    }

    async fn on_task(&self, ctx: &AgentContext, task: Task) -> Result<()> {
        let prompt = format!(
            "Rework the proposal below, addressing the critique it carries. \
             Return the improved answer only.\n\n{}",
            task.content
        );
        let generation = tokio::time::timeout(self.call_timeout, self.generator.generate(&prompt))
            .await
            .map_err(|_| ConclaveError::Timeout("refinement generation".into()))??;

        let refined = Task::new(
            &task.task_id,
            &self.name,
            generation.content,
            &task.agent,
            MessageIntent::ModifyTask,
            task.event.clone(),
        )
        .with_confidence(generation.confidence);
        ctx.publish_task(&refined).await
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
    async fn test_refinement_carries_confidence() {
        let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());
        let mut moderator = bus.subscribe("moderator_channel").await.unwrap();

        let ctx = AgentContext::new(
            Arc::clone(&bus),
            "refiner",
            Arc::new(RuntimeCounters::default()),
        );
        let agent = RefinerAgent::new("refiner", Arc::new(CannedGenerator::new("Refined:", 0.92)));

        let task = Task::new(
            "t1",
            "moderator",
            "proposal plus critique",
            "refiner",
            MessageIntent::ModifyTask,
            TaskEvent::Refine,
        );
        agent.on_task(&ctx, task).await.unwrap();

        let raw = moderator.recv().await.unwrap();
        let refined: Task = serde_json::from_str(&raw).unwrap();
        assert_eq!(refined.event, TaskEvent::Refine);
        assert_eq!(refined.confidence, Some(0.92));
        assert!(refined.content.starts_with("Refined:"));
    }
}
