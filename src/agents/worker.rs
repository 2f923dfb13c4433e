//! Generic proposal worker backed by an opaque text generator.
//!
//! Low-effort tasks are answered directly with a streamed response and a
//! terminal result; anything heavier is returned as a proposal so the
//! moderator can run the debate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{ConclaveError, Result};
use crate::llm::TextGenerator;
use crate::protocol::{
    MessageIntent, ReasoningEffort, StreamEvent, Task, TaskEvent, TaskOutcome, TaskResult,
};
use crate::runtime::{AgentContext, AgentHandler, AgentNotes};

pub struct WorkerAgent {
    name: String,
    generator: Arc<dyn TextGenerator>,
    call_timeout: Duration,
}

impl WorkerAgent {
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

    /// Stream the answer to the UI and conclude the task directly.
    async fn answer_directly(&self, ctx: &AgentContext, task: &Task) -> Result<()> {
        ctx.publish_stream(&StreamEvent::start(&task.task_id, &self.name))
            .await?;

        let (tx, mut rx) = mpsc::channel::<String>(64);
        let generator = Arc::clone(&self.generator);
        let prompt = task.content.clone();
        let generate = async move {
            tokio::time::timeout(self.call_timeout, generator.generate_streaming(&prompt, tx))
                .await
                .map_err(|_| ConclaveError::Timeout("text generation".into()))?
        };

        let forward = async {
            while let Some(delta) = rx.recv().await {
                ctx.publish_stream(&StreamEvent::update(&task.task_id, &self.name, delta))
                    .await?;
            }
            Ok::<(), ConclaveError>(())
        };

        let (generation, forwarded) = tokio::join!(generate, forward);
        forwarded?;
        let generation = generation?;

        ctx.publish_stream(&StreamEvent::end(
            &task.task_id,
            &self.name,
            Some(generation.content.clone()),
        ))
        .await?;

        let result = TaskResult::new(
            &task.task_id,
            &self.name,
            generation.content,
            &task.agent,
            TaskEvent::Complete,
            TaskOutcome::Completed,
        )
        .with_contributors(vec![self.name.clone()])
        .with_confidence(generation.confidence);
        ctx.publish_result(&result).await
    }

    /// Produce a proposal for the debate.
    async fn propose(&self, ctx: &AgentContext, task: &Task) -> Result<()> {
        let prompt = format!("Propose a solution for the following task.\n\n{}", task.content);
        let generation = tokio::time::timeout(self.call_timeout, self.generator.generate(&prompt))
            .await
            .map_err(|_| ConclaveError::Timeout("text generation".into()))??;

        let proposal = Task::new(
            &task.task_id,
            &self.name,
            generation.content,
            &task.agent,
            MessageIntent::ModifyTask,
            task.event.clone(),
        )
        .with_confidence(generation.confidence);
        ctx.publish_task(&proposal).await
    }
}

#[async_trait]
impl AgentHandler for WorkerAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_notes(&self) -> AgentNotes {
        AgentNotes::online(&self.name, "accepting tasks and producing proposals")
    }

    async fn on_task(&self, ctx: &AgentContext, task: Task) -> Result<()> {
        let effort = task.reasoning_effort.unwrap_or(ReasoningEffort::Medium);
        debug!(task_id = %task.task_id, effort = %effort, "Worker picked up task");

        if effort == ReasoningEffort::Low {
            self.answer_directly(ctx, &task).await
        } else {
            self.propose(ctx, &task).await
        }
    }
}
