//! Dispatch worker pool.
//!
//! Workers are partitioned by `hash(task_id)` so every payload for one task
//! lands on the same worker and is handled in publication order. Queues are
//! bounded; under pressure the oldest non-critical entry is shed first.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::protocol::{Envelope, MessageIntent};

use super::handler::{AgentContext, AgentHandler};

/// Results and feedback must survive shedding; chatter may not.
fn is_critical(envelope: &Envelope) -> bool {
    matches!(envelope, Envelope::TaskResult(_))
        || *envelope.intent() == MessageIntent::ModifyTask
}

#[derive(Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    ShedOldest,
    RejectedIncoming,
}

struct WorkerQueue {
    capacity: usize,
    jobs: Mutex<VecDeque<Envelope>>,
    notify: Notify,
}

impl WorkerQueue {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            jobs: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    fn push(&self, envelope: Envelope) -> PushOutcome {
        let outcome = {
            let mut jobs = self.jobs.lock();
            if jobs.len() < self.capacity {
                jobs.push_back(envelope);
                PushOutcome::Queued
            } else if let Some(pos) = jobs.iter().position(|e| !is_critical(e)) {
                jobs.remove(pos);
                jobs.push_back(envelope);
                PushOutcome::ShedOldest
            } else if is_critical(&envelope) {
                // Everything queued is critical too; age out the oldest.
                jobs.pop_front();
                jobs.push_back(envelope);
                PushOutcome::ShedOldest
            } else {
                PushOutcome::RejectedIncoming
            }
        };
        self.notify.notify_one();
        outcome
    }

    fn try_pop(&self) -> Option<Envelope> {
        self.jobs.lock().pop_front()
    }

    async fn pop(&self) -> Envelope {
        loop {
            let notified = self.notify.notified();
            if let Some(job) = self.try_pop() {
                return job;
            }
            notified.await;
        }
    }
}

pub struct DispatchPool {
    queues: Vec<Arc<WorkerQueue>>,
    handles: Vec<JoinHandle<()>>,
}

impl DispatchPool {
    pub fn start(
        workers: usize,
        queue_capacity: usize,
        handler: Arc<dyn AgentHandler>,
        ctx: Arc<AgentContext>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let workers = workers.max(1);
        let queues: Vec<Arc<WorkerQueue>> = (0..workers)
            .map(|_| Arc::new(WorkerQueue::new(queue_capacity)))
            .collect();

        let handles = queues
            .iter()
            .enumerate()
            .map(|(idx, queue)| {
                let queue = Arc::clone(queue);
                let handler = Arc::clone(&handler);
                let ctx = Arc::clone(&ctx);
                let mut shutdown = shutdown.clone();
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            envelope = queue.pop() => {
                                run_handler(&handler, &ctx, envelope).await;
                            }
                            _ = shutdown.changed() => {
                                if *shutdown.borrow() {
                                    break;
                                }
                            }
                        }
                    }
                    // Drain what is already queued before exiting.
                    while let Some(envelope) = queue.try_pop() {
                        run_handler(&handler, &ctx, envelope).await;
                    }
                    debug!(worker = idx, "Dispatch worker drained");
                })
            })
            .collect();

        Self { queues, handles }
    }

    /// Route an envelope to its task's worker.
    pub fn dispatch(&self, envelope: Envelope) -> PushOutcome {
        let mut hasher = DefaultHasher::new();
        envelope.task_id().hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.queues.len();

        let outcome = self.queues[idx].push(envelope);
        if outcome != PushOutcome::Queued {
            warn!(worker = idx, ?outcome, "Dispatch queue pressure");
        }
        outcome
    }

    /// Wait for every worker to finish its drain.
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

/// Intent-based dispatch. Handler failures are caught here so one bad
/// message never takes the agent down; the original requester gets an error
/// result instead.
async fn run_handler(handler: &Arc<dyn AgentHandler>, ctx: &Arc<AgentContext>, envelope: Envelope) {
    ctx.counters().dispatched.fetch_add(1, Ordering::Relaxed);

    let task_id = envelope.task_id().to_string();
    let requester = envelope.agent().to_string();

    let outcome = match envelope {
        Envelope::Message(msg) => match msg.intent {
            MessageIntent::CheckStatus => handler.on_check_status(ctx, msg).await,
            _ => handler.on_message(ctx, msg).await,
        },
        Envelope::Task(task) => handler.on_task(ctx, task).await,
        Envelope::TaskResult(result) => {
            if result.intent == MessageIntent::ToolExecute {
                handler.on_tool_response(ctx, result).await
            } else {
                handler.on_task_result(ctx, result).await
            }
        }
    };

    if let Err(e) = outcome {
        ctx.counters().handler_errors.fetch_add(1, Ordering::Relaxed);
        error!(
            agent = %ctx.agent(),
            task_id = %task_id,
            error = %e,
            "Handler failed"
        );
        if let Err(report_err) = ctx.publish_error(&task_id, &e.to_string(), &requester).await {
            error!(error = %report_err, "Failed to report handler error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Message, Task, TaskEvent};

    fn chat(task_id: &str) -> Envelope {
        Envelope::Message(Message::new(task_id, "peer", "hi", MessageIntent::Chat))
    }

    fn feedback(task_id: &str) -> Envelope {
        Envelope::Task(Task::new(
            task_id,
            "peer",
            "revise",
            "worker_a",
            MessageIntent::ModifyTask,
            TaskEvent::Refine,
        ))
    }

    #[test]
    fn test_queue_sheds_oldest_non_critical() {
        let queue = WorkerQueue::new(2);
        assert_eq!(queue.push(chat("t1")), PushOutcome::Queued);
        assert_eq!(queue.push(feedback("t2")), PushOutcome::Queued);
        assert_eq!(queue.push(feedback("t3")), PushOutcome::ShedOldest);

        // The chat was evicted; both feedback tasks remain in order.
        assert_eq!(queue.try_pop().unwrap().task_id(), "t2");
        assert_eq!(queue.try_pop().unwrap().task_id(), "t3");
    }

    #[test]
    fn test_queue_rejects_non_critical_when_full_of_critical() {
        let queue = WorkerQueue::new(2);
        queue.push(feedback("t1"));
        queue.push(feedback("t2"));
        assert_eq!(queue.push(chat("t3")), PushOutcome::RejectedIncoming);
    }

    #[test]
    fn test_queue_preserves_order() {
        let queue = WorkerQueue::new(8);
        for i in 0..5 {
            queue.push(chat(&format!("t{i}")));
        }
        for i in 0..5 {
            assert_eq!(queue.try_pop().unwrap().task_id(), format!("t{i}"));
        }
    }
}
