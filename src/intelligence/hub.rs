//! Task intelligence facade.
//!
//! Composes the effort estimator, the clustering router, and the outcome
//! log behind three operations: create-and-route, complete, and status.
//! Periodic background work rebuilds the cluster model and retunes the
//! estimator from recorded outcomes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::bus::Bus;
use crate::error::{ConclaveError, Result};
use crate::protocol::channels::SYSTEM_STATUS;
use crate::protocol::{
    effort_priority_boost, intent_priority, new_task_id, MessageIntent, Task, TaskDiagnostics,
    TaskEvent, TaskOutcome, TaskResult,
};

use super::cluster::{self, ClusteringMethod};
use super::effort::{tune_weights, EffortContext, EffortEstimator, EstimatorConfig};
use super::features::{build_features, Embedder};
use super::outcomes::{OutcomeLog, OutcomeRecord, OutcomeStats};
use super::router::{RouteDecision, RouterConfig, TaskRouter};

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub available_agents: Vec<String>,
    pub cluster_rebuild_interval: Duration,
    pub retrain_threshold: usize,
    pub clustering: ClusteringMethod,
    pub outcome_capacity: usize,
    pub router_seed: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            available_agents: vec!["worker_a".to_string(), "worker_b".to_string()],
            cluster_rebuild_interval: Duration::from_secs(600),
            retrain_threshold: 50,
            clustering: ClusteringMethod::default(),
            outcome_capacity: 1000,
            router_seed: 42,
        }
    }
}

/// Everything produced by `create_and_route_task`.
#[derive(Debug, Clone)]
pub struct RoutedTask {
    pub task: Task,
    pub diagnostics: TaskDiagnostics,
    pub decision: RouteDecision,
}

/// Inputs to `create_and_route_task`.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub agent: String,
    pub content: String,
    pub intent: MessageIntent,
    pub event: TaskEvent,
    pub confidence: Option<f64>,
    pub deadline_pressure: Option<f64>,
    /// Reuse an id already issued upstream (e.g. by the gateway) so clients
    /// can keep correlating; a fresh id is generated when absent.
    pub task_id: Option<String>,
}

impl TaskRequest {
    pub fn new(agent: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            content: content.into(),
            intent: MessageIntent::StartTask,
            event: TaskEvent::Plan,
            confidence: None,
            deadline_pressure: None,
            task_id: None,
        }
    }

    pub fn with_intent(mut self, intent: MessageIntent) -> Self {
        self.intent = intent;
        self
    }

    pub fn with_event(mut self, event: TaskEvent) -> Self {
        self.event = event;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_deadline_pressure(mut self, pressure: f64) -> Self {
        self.deadline_pressure = Some(pressure);
        self
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }
}

struct ActiveTask {
    task: Task,
    diagnostics: TaskDiagnostics,
    cluster_id: Option<usize>,
    started: Instant,
}

#[derive(Debug, Clone, Serialize)]
pub struct HubStatus {
    pub agents: Vec<String>,
    pub active_tasks: usize,
    pub tasks_created: u64,
    pub tasks_completed: u64,
    pub exploration_rate: f64,
    pub model_ready: bool,
    pub last_cluster_rebuild_at: Option<DateTime<Utc>>,
    pub outcomes: OutcomeStats,
}

pub struct IntelligenceHub {
    bus: Arc<dyn Bus>,
    config: HubConfig,
    estimator: RwLock<Arc<EffortEstimator>>,
    router: TaskRouter,
    outcomes: OutcomeLog,
    embedder: Arc<dyn Embedder>,
    active: Mutex<HashMap<String, ActiveTask>>,
    tasks_created: AtomicU64,
    tasks_completed: AtomicU64,
    outcomes_since_rebuild: AtomicUsize,
    outcomes_since_tune: AtomicUsize,
    last_rebuild: RwLock<Option<DateTime<Utc>>>,
}

impl IntelligenceHub {
    pub fn new(
        bus: Arc<dyn Bus>,
        config: HubConfig,
        estimator_config: EstimatorConfig,
        router_config: RouterConfig,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        let outcome_capacity = config.outcome_capacity;
        let router_seed = config.router_seed;
        Self {
            bus,
            config,
            estimator: RwLock::new(Arc::new(EffortEstimator::new(estimator_config))),
            router: TaskRouter::new(router_config, router_seed),
            outcomes: OutcomeLog::new(outcome_capacity),
            embedder,
            active: Mutex::new(HashMap::new()),
            tasks_created: AtomicU64::new(0),
            tasks_completed: AtomicU64::new(0),
            outcomes_since_rebuild: AtomicUsize::new(0),
            outcomes_since_tune: AtomicUsize::new(0),
            last_rebuild: RwLock::new(None),
        }
    }

    /// Current estimator snapshot.
    pub fn estimator(&self) -> Arc<EffortEstimator> {
        Arc::clone(&self.estimator.read())
    }

    pub fn router(&self) -> &TaskRouter {
        &self.router
    }

    fn category_names(&self) -> Vec<String> {
        self.estimator.read().config().categories.keys().cloned().collect()
    }

    /// Estimate effort, choose an agent, and assemble the task for
    /// publication. Deterministic for fixed inputs and router seed.
    pub async fn create_and_route_task(&self, request: TaskRequest) -> Result<RoutedTask> {
        if request.content.trim().is_empty() {
            return Err(ConclaveError::Protocol("task content is empty".into()));
        }

        let estimator = self.estimator();
        let ctx = EffortContext {
            event: Some(&request.event),
            intent: Some(&request.intent),
            confidence: request.confidence,
            deadline_pressure: request.deadline_pressure,
        };
        let (effort, diagnostics) = estimator.estimate(&request.content, ctx);

        let embedding = self.embedder.embed(&request.content).await?;
        let features = build_features(embedding, &diagnostics, &self.category_names());

        let task_id = request.task_id.clone().unwrap_or_else(new_task_id);
        let decision = self
            .router
            .route(&task_id, Some(&features), &self.config.available_agents);

        let priority = intent_priority(&request.intent) + effort_priority_boost(effort);
        let task = Task::new(
            &task_id,
            &request.agent,
            &request.content,
            &decision.agent,
            request.intent.clone(),
            request.event.clone(),
        )
        .with_confidence(request.confidence.unwrap_or(0.9))
        .with_effort(effort)
        .with_priority(priority)
        .with_diagnostics(diagnostics.clone());

        self.active.lock().insert(
            task_id.clone(),
            ActiveTask {
                task: task.clone(),
                diagnostics: diagnostics.clone(),
                cluster_id: decision.cluster_id,
                started: Instant::now(),
            },
        );
        self.tasks_created.fetch_add(1, Ordering::Relaxed);

        self.broadcast(
            "task_created",
            json!({
                "task_id": task_id,
                "agent": request.agent,
                "target_agent": decision.agent,
                "reasoning_effort": effort.as_str(),
                "routing_method": decision.method,
            }),
        )
        .await;

        info!(
            task_id = %task_id,
            target = %decision.agent,
            effort = %effort,
            method = ?decision.method,
            "Task routed"
        );

        Ok(RoutedTask {
            task,
            diagnostics,
            decision,
        })
    }

    /// Conclude a task: build its result, record the outcome for the
    /// estimator and router, and broadcast the completion.
    pub async fn complete_task(
        &self,
        task_id: &str,
        outcome: TaskOutcome,
        result_content: &str,
        contributing_agents: Vec<String>,
    ) -> Result<TaskResult> {
        let Some(active) = self.active.lock().remove(task_id) else {
            return Err(ConclaveError::TaskNotFound(task_id.to_string()));
        };

        let duration = active.started.elapsed().as_secs_f64();
        let success = outcome.is_success();
        let worker = active.task.target_agent.clone();

        let contributors = if contributing_agents.is_empty() {
            vec![worker.clone()]
        } else {
            contributing_agents
        };

        let mut result = TaskResult::new(
            task_id,
            &active.task.agent,
            result_content,
            &active.task.target_agent,
            TaskEvent::Complete,
            outcome.clone(),
        )
        .with_contributors(contributors);
        result.confidence = active.task.confidence;
        result.reasoning_effort = active.task.reasoning_effort;

        let effort = active
            .task
            .reasoning_effort
            .unwrap_or(crate::protocol::ReasoningEffort::Medium);
        let mut record = OutcomeRecord::new(task_id, &worker, effort, duration, success)
            .with_content(&active.task.content)
            .with_diagnostics(&active.diagnostics);
        if let Some(cluster) = active.cluster_id {
            record = record.with_cluster(cluster);
        }
        self.outcomes.append(record);
        self.outcomes_since_rebuild.fetch_add(1, Ordering::Relaxed);
        self.outcomes_since_tune.fetch_add(1, Ordering::Relaxed);

        self.router
            .update_agent_stats(&worker, duration, success, active.cluster_id);
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);

        self.maybe_tune();

        self.broadcast(
            "task_completed",
            json!({
                "task_id": task_id,
                "agent": worker,
                "outcome": outcome.as_str(),
                "duration": duration,
            }),
        )
        .await;

        Ok(result)
    }

    pub fn get_system_status(&self) -> HubStatus {
        HubStatus {
            agents: self.config.available_agents.clone(),
            active_tasks: self.active.lock().len(),
            tasks_created: self.tasks_created.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            exploration_rate: self.router.epsilon(),
            model_ready: self.router.has_model(),
            last_cluster_rebuild_at: *self.last_rebuild.read(),
            outcomes: self.outcomes.stats(),
        }
    }

    pub fn api_get_router_decisions(&self, limit: usize) -> Vec<RouteDecision> {
        self.router.decisions(limit)
    }

    /// Rebuild the cluster model when enough new outcomes accumulated.
    /// Returns true when a new model was swapped in.
    pub async fn maybe_rebuild(&self) -> Result<bool> {
        if self.outcomes_since_rebuild.load(Ordering::Relaxed) < self.config.retrain_threshold {
            return Ok(false);
        }

        let snapshot = self.outcomes.snapshot();
        let model = cluster::fit(
            &snapshot,
            self.embedder.as_ref(),
            self.config.clustering,
            &self.category_names(),
            self.config.router_seed,
        )
        .await?;

        let Some(model) = model else {
            return Ok(false);
        };

        self.router.swap_model(Arc::new(model));
        *self.last_rebuild.write() = Some(Utc::now());
        self.outcomes_since_rebuild.store(0, Ordering::Relaxed);

        self.broadcast("clustering_updated", json!({"trained_on": snapshot.len()}))
            .await;
        Ok(true)
    }

    /// Swap in a retuned estimator snapshot when the analysis window fills.
    fn maybe_tune(&self) {
        let current = self.estimator();
        let autotune = &current.config().autotune;
        if !autotune.enabled {
            return;
        }
        if self.outcomes_since_tune.load(Ordering::Relaxed) < autotune.analysis_after {
            return;
        }

        let tuned = tune_weights(current.config(), &self.outcomes.snapshot());
        *self.estimator.write() = Arc::new(EffortEstimator::new(tuned));
        self.outcomes_since_tune.store(0, Ordering::Relaxed);
        info!("Estimator weights retuned");
    }

    async fn broadcast(&self, kind: &str, data: serde_json::Value) {
        let payload = json!({
            "type": kind,
            "data": data,
            "timestamp": Utc::now(),
        });
        if let Err(e) = self.bus.publish(SYSTEM_STATUS, &payload.to_string()).await {
            warn!(error = %e, kind, "Status broadcast failed");
        }
    }

    /// Periodic rebuild driver.
    pub async fn run_background(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.cluster_rebuild_interval);
        ticker.tick().await; // skip the immediate first tick

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.maybe_rebuild().await {
                        Ok(true) => info!("Cluster model rebuilt on schedule"),
                        Ok(false) => {}
                        Err(e) => warn!(error = %e, "Cluster rebuild failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::intelligence::features::HashEmbedder;

    fn hub() -> IntelligenceHub {
        hub_with(HubConfig {
            retrain_threshold: 10,
            ..HubConfig::default()
        })
    }

    fn hub_with(config: HubConfig) -> IntelligenceHub {
        IntelligenceHub::new(
            Arc::new(MemoryBus::new()),
            config,
            EstimatorConfig::default(),
            RouterConfig::default(),
            Arc::new(HashEmbedder::new(16)),
        )
    }

    #[tokio::test]
    async fn test_create_and_route_builds_full_task() {
        let hub = hub();
        let routed = hub
            .create_and_route_task(TaskRequest::new(
                "client-1",
                "Summarize the text 'hello world' in one sentence.",
            ))
            .await
            .unwrap();

        assert_eq!(routed.task.intent, MessageIntent::StartTask);
        assert_eq!(routed.task.event, TaskEvent::Plan);
        assert!(routed.task.reasoning_effort.is_some());
        assert!(routed.task.diagnostics.is_some());
        assert!(routed.task.priority.is_some());
        assert!(hub
            .config
            .available_agents
            .contains(&routed.task.target_agent));
        assert_eq!(hub.get_system_status().active_tasks, 1);
    }

    #[tokio::test]
    async fn test_upstream_task_id_preserved() {
        let hub = hub();
        let routed = hub
            .create_and_route_task(TaskRequest::new("client-1", "carry my id").with_task_id("task_T1"))
            .await
            .unwrap();
        assert_eq!(routed.task.task_id, "task_T1");
    }

    #[tokio::test]
    async fn test_empty_content_rejected() {
        let hub = hub();
        let err = hub
            .create_and_route_task(TaskRequest::new("client-1", "   "))
            .await
            .unwrap_err();
        assert!(matches!(err, ConclaveError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_complete_task_records_outcome() {
        let hub = hub();
        let routed = hub
            .create_and_route_task(TaskRequest::new("client-1", "Short task"))
            .await
            .unwrap();

        let result = hub
            .complete_task(
                &routed.task.task_id,
                TaskOutcome::Completed,
                "done",
                vec![],
            )
            .await
            .unwrap();

        assert_eq!(result.outcome, TaskOutcome::Completed);
        assert_eq!(result.contributing_agents, vec![routed.task.target_agent]);

        let status = hub.get_system_status();
        assert_eq!(status.active_tasks, 0);
        assert_eq!(status.tasks_completed, 1);
        assert_eq!(status.outcomes.recorded, 1);
    }

    #[tokio::test]
    async fn test_complete_unknown_task_is_error() {
        let hub = hub();
        let err = hub
            .complete_task("missing", TaskOutcome::Completed, "x", vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, ConclaveError::TaskNotFound(_)));
    }

    #[tokio::test]
    async fn test_rebuild_waits_for_threshold() {
        let hub = hub();
        assert!(!hub.maybe_rebuild().await.unwrap());

        for i in 0..12 {
            let routed = hub
                .create_and_route_task(TaskRequest::new(
                    "client",
                    format!("analyze dataset number {i} with care and detail"),
                ))
                .await
                .unwrap();
            hub.complete_task(&routed.task.task_id, TaskOutcome::Completed, "ok", vec![])
                .await
                .unwrap();
        }

        assert!(hub.maybe_rebuild().await.unwrap());
        assert!(hub.router.has_model());
        assert!(hub.get_system_status().last_cluster_rebuild_at.is_some());

        // Counter reset: an immediate second rebuild is a no-op.
        assert!(!hub.maybe_rebuild().await.unwrap());
    }

    #[tokio::test]
    async fn test_status_broadcast_published() {
        let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());
        let mut sub = bus.subscribe(SYSTEM_STATUS).await.unwrap();
        let hub = IntelligenceHub::new(
            Arc::clone(&bus),
            HubConfig::default(),
            EstimatorConfig::default(),
            RouterConfig::default(),
            Arc::new(HashEmbedder::new(16)),
        );

        hub.create_and_route_task(TaskRequest::new("client", "do something"))
        .await
        .unwrap();

        let raw = sub.recv().await.unwrap();
        assert!(raw.contains("task_created"));
    }
}
