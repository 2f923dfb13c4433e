//! The debate protocol driver.
//!
//! plan -> execute -> refine -> complete | escalate, with loop detection on
//! proposal digests, plateau resolution on confidence windows, and a
//! kill-switch for tasks that stop making progress. The orchestrator is the
//! source of truth for task state; events for unknown tasks are ignored.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{ConclaveError, Result};
use crate::intelligence::{IntelligenceHub, TaskRequest};
use crate::protocol::{Message, MessageIntent, Task, TaskEvent, TaskOutcome, TaskResult};
use crate::runtime::AgentContext;

use super::state::TaskState;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_rounds: u32,
    pub task_timeout: Duration,
    pub plateau_delta: f64,
    pub consensus_threshold: f64,
    pub confidence_window: usize,
    pub critic: String,
    pub refiner: String,
    /// Senders allowed to force an escalation besides the task's own
    /// requester.
    pub privileged_senders: Vec<String>,
    pub kill_switch_poll: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            task_timeout: Duration::from_secs(300),
            plateau_delta: 0.05,
            consensus_threshold: 0.9,
            confidence_window: 3,
            critic: "arbitrator".to_string(),
            refiner: "refiner".to_string(),
            privileged_senders: vec!["coordinator".to_string()],
            kill_switch_poll: Duration::from_secs(1),
        }
    }
}

/// What a state transition decided to do, computed under the state lock and
/// performed after it is released.
enum Action {
    Forward { task: Task },
    Conclude { outcome: TaskOutcome, content: String },
    Escalate { cause: String },
    Ignore,
}

pub struct DebateOrchestrator {
    config: OrchestratorConfig,
    hub: Arc<IntelligenceHub>,
    states: Mutex<HashMap<String, TaskState>>,
}

impl DebateOrchestrator {
    pub fn new(config: OrchestratorConfig, hub: Arc<IntelligenceHub>) -> Self {
        Self {
            config,
            hub,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn hub(&self) -> &Arc<IntelligenceHub> {
        &self.hub
    }

    pub fn active_tasks(&self) -> usize {
        self.states.lock().len()
    }

    /// Accept a new task from a requester: route it through the hub and
    /// hand it to the chosen worker. Empty content is rejected with an
    /// error event and never enters the state machine.
    pub async fn start_task(&self, ctx: &AgentContext, task: &Task) -> Result<()> {
        if task.content.trim().is_empty() {
            warn!(task_id = %task.task_id, "Rejecting empty task");
            return ctx
                .publish_error(&task.task_id, "task content is empty", &task.agent)
                .await;
        }

        let mut request = TaskRequest::new(&task.agent, &task.content)
            .with_task_id(&task.task_id)
            .with_intent(MessageIntent::StartTask)
            .with_event(TaskEvent::Plan);
        if let Some(confidence) = task.confidence {
            request = request.with_confidence(confidence);
        }

        let routed = self.hub.create_and_route_task(request).await?;

        self.states.lock().insert(
            task.task_id.clone(),
            TaskState::new(&task.task_id, &task.agent, self.config.confidence_window),
        );

        info!(
            task_id = %task.task_id,
            worker = %routed.task.target_agent,
            "Debate started"
        );

        // The requester is remembered in task state; on the wire the
        // orchestrator is the sender, so workers reply here.
        let mut outbound = routed.task;
        outbound.agent = ctx.agent().to_string();
        ctx.publish_task(&outbound).await
    }

    /// A continuation from a worker, the critic, or the refiner.
    pub async fn on_update(&self, ctx: &AgentContext, task: &Task) -> Result<()> {
        if let TaskEvent::Escalate = task.event {
            return self
                .force_escalate(ctx, &task.task_id, &task.agent, &task.content)
                .await;
        }

        let action = self.transition(ctx.agent(), task);
        self.perform(ctx, &task.task_id, action).await
    }

    /// A terminal result from a worker. Duplicate terminal results are
    /// ignored: state removal happens exactly once.
    pub async fn on_result(&self, ctx: &AgentContext, result: &TaskResult) -> Result<()> {
        if !result.event.is_terminal() && !result.outcome.is_success() {
            // Mid-flight status results carry no transition.
            debug!(task_id = %result.task_id, "Non-terminal result noted");
            return Ok(());
        }

        {
            let mut states = self.states.lock();
            let Some(state) = states.get_mut(&result.task_id) else {
                debug!(task_id = %result.task_id, "Result for unknown task ignored");
                return Ok(());
            };
            state.record(&result.agent, result.event.clone(), &result.content);
        }

        self.conclude(ctx, &result.task_id, result.outcome.clone(), &result.content)
            .await
    }

    /// Answer a status query from owned state.
    pub async fn check_status(&self, ctx: &AgentContext, message: &Message) -> Result<()> {
        let summary = {
            let states = self.states.lock();
            states.get(&message.task_id).map(|state| {
                json!({
                    "task_id": state.task_id,
                    "status": state.status.as_str(),
                    "round": state.round,
                    "current_step": state.current_step,
                    "contributors": state.contributors,
                    "age_secs": state.age_secs(),
                })
            })
        };

        let content = match summary {
            Some(value) => value.to_string(),
            None => format!("task {} not found", message.task_id),
        };

        let reply = Message::new(&message.task_id, ctx.agent(), content, MessageIntent::Chat)
            .with_target(message.agent.clone());
        ctx.publish_to_agent(&message.agent, &reply).await
    }

    /// Kill-switch entry point for explicit escalations. Only the task's
    /// requester and configured privileged senders may pull it.
    pub async fn force_escalate(
        &self,
        ctx: &AgentContext,
        task_id: &str,
        sender: &str,
        reason: &str,
    ) -> Result<()> {
        let permitted = {
            let states = self.states.lock();
            match states.get(task_id) {
                Some(state) => {
                    state.original_requester == sender
                        || self.config.privileged_senders.iter().any(|s| s == sender)
                }
                None => {
                    debug!(task_id = %task_id, "Escalation for unknown task ignored");
                    return Ok(());
                }
            }
        };

        if !permitted {
            warn!(task_id = %task_id, sender = %sender, "Unprivileged escalation ignored");
            return Ok(());
        }

        let cause = if reason.trim().is_empty() {
            format!("escalated by {sender}")
        } else {
            reason.to_string()
        };
        self.conclude(ctx, task_id, TaskOutcome::Escalated, &cause)
            .await
    }

    /// One kill-switch pass over all live tasks.
    pub async fn sweep(&self, ctx: &AgentContext) {
        let expired: Vec<(String, String)> = {
            let states = self.states.lock();
            states
                .values()
                .filter_map(|state| {
                    if state.age_secs() > self.config.task_timeout.as_secs_f64() {
                        Some((
                            state.task_id.clone(),
                            format!("task exceeded its {}s timeout", self.config.task_timeout.as_secs()),
                        ))
                    } else if state.round > self.config.max_rounds * 2 {
                        Some((
                            state.task_id.clone(),
                            "task exceeded twice the round budget".to_string(),
                        ))
                    } else {
                        None
                    }
                })
                .collect()
        };

        for (task_id, cause) in expired {
            warn!(task_id = %task_id, cause = %cause, "Kill-switch fired");
            if let Err(e) = self
                .conclude(ctx, &task_id, TaskOutcome::Escalated, &cause)
                .await
            {
                warn!(task_id = %task_id, error = %e, "Kill-switch conclude failed");
            }
        }
    }

    /// Periodic kill-switch driver.
    pub async fn run_kill_switch(
        self: Arc<Self>,
        ctx: Arc<AgentContext>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(self.config.kill_switch_poll);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep(&ctx).await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Compute the next action for a continuation, entirely under the
    /// state lock.
    fn transition(&self, own_name: &str, task: &Task) -> Action {
        let mut states = self.states.lock();
        let Some(state) = states.get_mut(&task.task_id) else {
            debug!(task_id = %task.task_id, "Update for unknown task ignored");
            return Action::Ignore;
        };

        let duplicate = state.record(&task.agent, task.event.clone(), &task.content);
        if duplicate {
            if state.similarity_hits >= 3 {
                return Action::Escalate {
                    cause: format!("{} kept repeating an identical proposal", task.agent),
                };
            }
            if state.similarity_hits >= 2 {
                state.advance(TaskEvent::Refine, "awaiting pivoted refinement");
                let pivot = format!(
                    "The last proposals were identical. Pivot to a substantially \
                     different approach.\n\n{}",
                    task.content
                );
                return Action::Forward {
                    task: Task::new(
                        &task.task_id,
                        own_name,
                        pivot,
                        &self.config.refiner,
                        MessageIntent::ModifyTask,
                        TaskEvent::Refine,
                    ),
                };
            }
        }

        match state.status.clone() {
            TaskEvent::Plan => {
                state.advance(TaskEvent::Execute, "awaiting critique");
                Action::Forward {
                    task: Task::new(
                        &task.task_id,
                        own_name,
                        &task.content,
                        &self.config.critic,
                        MessageIntent::ModifyTask,
                        TaskEvent::Execute,
                    ),
                }
            }
            TaskEvent::Execute => {
                // Awaiting the critic; contributions from anyone else are
                // recorded above but do not advance the machine.
                if task.agent != self.config.critic {
                    debug!(task_id = %task.task_id, sender = %task.agent, "Not the critic, ignored");
                    return Action::Ignore;
                }
                state.advance(TaskEvent::Refine, "awaiting refinement");
                Action::Forward {
                    task: Task::new(
                        &task.task_id,
                        own_name,
                        &task.content,
                        &self.config.refiner,
                        MessageIntent::ModifyTask,
                        TaskEvent::Refine,
                    ),
                }
            }
            TaskEvent::Refine => {
                if task.agent != self.config.refiner {
                    debug!(task_id = %task.task_id, sender = %task.agent, "Not the refiner, ignored");
                    return Action::Ignore;
                }
                let confidence = task.confidence.unwrap_or(0.0);
                state.push_confidence(confidence);

                if confidence >= self.config.consensus_threshold {
                    return Action::Conclude {
                        outcome: TaskOutcome::Completed,
                        content: task.content.clone(),
                    };
                }
                if state.plateaued(self.config.plateau_delta) {
                    return Action::Conclude {
                        outcome: TaskOutcome::Merged,
                        content: task.content.clone(),
                    };
                }
                if state.round >= self.config.max_rounds {
                    return if state.mean_confidence() >= 0.5 {
                        Action::Conclude {
                            outcome: TaskOutcome::Merged,
                            content: task.content.clone(),
                        }
                    } else {
                        Action::Escalate {
                            cause: "debate deadlocked below consensus".to_string(),
                        }
                    };
                }

                state.next_round();
                state.advance(TaskEvent::Execute, "awaiting critique");
                Action::Forward {
                    task: Task::new(
                        &task.task_id,
                        own_name,
                        &task.content,
                        &self.config.critic,
                        MessageIntent::ModifyTask,
                        TaskEvent::Execute,
                    ),
                }
            }
            other => {
                debug!(task_id = %task.task_id, status = %other, "Update in terminal state ignored");
                Action::Ignore
            }
        }
    }

    async fn perform(&self, ctx: &AgentContext, task_id: &str, action: Action) -> Result<()> {
        match action {
            Action::Forward { task } => ctx.publish_task(&task).await,
            Action::Conclude { outcome, content } => {
                self.conclude(ctx, task_id, outcome, &content).await
            }
            Action::Escalate { cause } => {
                self.conclude(ctx, task_id, TaskOutcome::Escalated, &cause)
                    .await
            }
            Action::Ignore => Ok(()),
        }
    }

    /// Terminal transition: remove state exactly once, record the outcome,
    /// and notify the original requester.
    async fn conclude(
        &self,
        ctx: &AgentContext,
        task_id: &str,
        outcome: TaskOutcome,
        content: &str,
    ) -> Result<()> {
        let Some(state) = self.states.lock().remove(task_id) else {
            debug!(task_id = %task_id, "Duplicate terminal transition ignored");
            return Ok(());
        };

        let mut result = match self
            .hub
            .complete_task(task_id, outcome.clone(), content, state.contributors.clone())
            .await
        {
            Ok(result) => result,
            Err(ConclaveError::TaskNotFound(_)) => {
                // The task never went through the hub (e.g. created before a
                // restart); still deliver a terminal result.
                TaskResult::new(
                    task_id,
                    ctx.agent(),
                    content,
                    &state.original_requester,
                    TaskEvent::Complete,
                    outcome.clone(),
                )
                .with_contributors(state.contributors.clone())
            }
            Err(e) => return Err(e),
        };

        result.agent = ctx.agent().to_string();
        result.target_agent = state.original_requester.clone();
        result.event = match &outcome {
            TaskOutcome::Escalated => TaskEvent::Escalate,
            _ => TaskEvent::Complete,
        };

        info!(
            task_id = %task_id,
            outcome = %outcome,
            rounds = state.round,
            "Task concluded"
        );
        ctx.publish_result(&result).await
    }
}
