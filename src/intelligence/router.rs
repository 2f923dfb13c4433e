//! Performance-weighted task routing with bounded exploration.
//!
//! Scores candidates inside the task's cluster first, falls back to overall
//! per-agent performance, then round-robin, then the first candidate. An
//! ε-greedy draw keeps gathering data on non-best agents; ε decays as the
//! outcome sample grows.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::debug;

use super::cluster::{AgentCell, ClusterModel};

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub success_weight: f64,
    pub duration_weight: f64,
    pub min_samples: u64,
    pub epsilon_min: f64,
    pub epsilon_max: f64,
    pub tau: f64,
    pub decision_log_limit: usize,
    pub default_agent: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            success_weight: 0.6,
            duration_weight: 0.4,
            min_samples: 5,
            epsilon_min: 0.05,
            epsilon_max: 0.3,
            tau: 200.0,
            decision_log_limit: 1000,
            default_agent: "moderator".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteMethod {
    ClusterScore,
    OverallPerformance,
    RoundRobin,
    FirstCandidate,
}

/// Record of one routing decision, kept for dashboards and audits.
#[derive(Debug, Clone, Serialize)]
pub struct RouteDecision {
    pub task_id: String,
    pub agent: String,
    pub method: RouteMethod,
    /// Score gap between the best and second-best candidate.
    pub confidence: f64,
    pub cluster_id: Option<usize>,
    pub epsilon: f64,
    pub exploration: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_recommendation: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub alternatives: BTreeMap<String, f64>,
    pub timestamp: DateTime<Utc>,
}

pub struct TaskRouter {
    config: RouterConfig,
    model: RwLock<Option<Arc<ClusterModel>>>,
    cells: RwLock<HashMap<(usize, String), AgentCell>>,
    overall: RwLock<HashMap<String, AgentCell>>,
    samples: AtomicU64,
    rr_cursor: AtomicUsize,
    decisions: Mutex<VecDeque<RouteDecision>>,
    rng: Mutex<StdRng>,
}

impl TaskRouter {
    pub fn new(config: RouterConfig, seed: u64) -> Self {
        Self {
            config,
            model: RwLock::new(None),
            cells: RwLock::new(HashMap::new()),
            overall: RwLock::new(HashMap::new()),
            samples: AtomicU64::new(0),
            rr_cursor: AtomicUsize::new(0),
            decisions: Mutex::new(VecDeque::new()),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Current exploration rate, decayed by observed sample count.
    pub fn epsilon(&self) -> f64 {
        let n = self.samples.load(Ordering::Relaxed) as f64;
        let c = &self.config;
        let value = c.epsilon_min + (c.epsilon_max - c.epsilon_min) * (-n / c.tau).exp();
        value.clamp(c.epsilon_min, c.epsilon_max)
    }

    pub fn has_model(&self) -> bool {
        self.model.read().is_some()
    }

    pub fn model_built_at(&self) -> Option<DateTime<Utc>> {
        self.model.read().as_ref().map(|m| m.built_at)
    }

    /// Adopt a freshly fitted model and its seeded performance cells.
    pub fn swap_model(&self, model: Arc<ClusterModel>) {
        {
            let mut cells = self.cells.write();
            for (cluster, agents) in &model.performance {
                for (agent, cell) in agents {
                    cells.insert((*cluster, agent.clone()), *cell);
                }
            }
        }
        *self.model.write() = Some(model);
    }

    /// Choose an agent for a task described by its raw feature vector.
    pub fn route(
        &self,
        task_id: &str,
        raw_features: Option<&[f64]>,
        candidates: &[String],
    ) -> RouteDecision {
        let epsilon = self.epsilon();
        let cluster_id = raw_features.and_then(|features| {
            self.model
                .read()
                .as_ref()
                .and_then(|model| model.assign(features))
        });

        if candidates.is_empty() {
            return self.log(RouteDecision {
                task_id: task_id.to_string(),
                agent: self.config.default_agent.clone(),
                method: RouteMethod::FirstCandidate,
                confidence: 0.0,
                cluster_id,
                epsilon,
                exploration: false,
                original_recommendation: None,
                alternatives: BTreeMap::new(),
                timestamp: Utc::now(),
            });
        }

        // Cluster-scoped scores, then overall scores as the first fallback.
        let (method, scored) = match cluster_id {
            Some(cluster) => {
                let scored = self.score_in_cluster(cluster, candidates);
                if scored.is_empty() {
                    (RouteMethod::OverallPerformance, self.score_overall(candidates))
                } else {
                    (RouteMethod::ClusterScore, scored)
                }
            }
            None => (RouteMethod::OverallPerformance, self.score_overall(candidates)),
        };

        if !scored.is_empty() {
            let (best, confidence) = pick_best(&scored);
            let explored = self.maybe_explore(candidates, epsilon);

            let (agent, exploration, original) = match explored {
                Some(agent) if agent != best => (agent, true, Some(best.clone())),
                _ => (best.clone(), false, None),
            };

            let alternatives = scored
                .iter()
                .map(|(name, (score, _))| (name.clone(), *score))
                .collect();

            return self.log(RouteDecision {
                task_id: task_id.to_string(),
                agent,
                method,
                confidence,
                cluster_id,
                epsilon,
                exploration,
                original_recommendation: original,
                alternatives,
                timestamp: Utc::now(),
            });
        }

        // Round-robin over candidates before giving up on data entirely.
        let cursor = self.rr_cursor.fetch_add(1, Ordering::Relaxed);
        let agent = candidates[cursor % candidates.len()].clone();
        let method = if candidates.len() > 1 {
            RouteMethod::RoundRobin
        } else {
            RouteMethod::FirstCandidate
        };

        self.log(RouteDecision {
            task_id: task_id.to_string(),
            agent,
            method,
            confidence: 0.0,
            cluster_id,
            epsilon,
            exploration: false,
            original_recommendation: None,
            alternatives: BTreeMap::new(),
            timestamp: Utc::now(),
        })
    }

    /// Record an observed outcome for the chosen agent.
    pub fn update_agent_stats(
        &self,
        agent: &str,
        duration_secs: f64,
        success: bool,
        cluster_id: Option<usize>,
    ) {
        if let Some(cluster) = cluster_id {
            self.cells
                .write()
                .entry((cluster, agent.to_string()))
                .or_default()
                .observe(duration_secs, success);
        }
        self.overall
            .write()
            .entry(agent.to_string())
            .or_default()
            .observe(duration_secs, success);
        self.samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Latest decisions, newest first.
    pub fn decisions(&self, limit: usize) -> Vec<RouteDecision> {
        self.decisions
            .lock()
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    fn maybe_explore(&self, candidates: &[String], epsilon: f64) -> Option<String> {
        let mut rng = self.rng.lock();
        if rng.gen_range(0.0..1.0) < epsilon {
            let idx = rng.gen_range(0..candidates.len());
            debug!(agent = %candidates[idx], "Exploration draw");
            Some(candidates[idx].clone())
        } else {
            None
        }
    }

    fn score_in_cluster(
        &self,
        cluster: usize,
        candidates: &[String],
    ) -> BTreeMap<String, (f64, u64)> {
        let cells = self.cells.read();
        let eligible: Vec<(&String, AgentCell)> = candidates
            .iter()
            .filter_map(|agent| {
                cells
                    .get(&(cluster, agent.clone()))
                    .filter(|cell| cell.n >= self.config.min_samples)
                    .map(|cell| (agent, *cell))
            })
            .collect();

        self.score_cells(&eligible)
    }

    fn score_overall(&self, candidates: &[String]) -> BTreeMap<String, (f64, u64)> {
        let overall = self.overall.read();
        let eligible: Vec<(&String, AgentCell)> = candidates
            .iter()
            .filter_map(|agent| {
                overall
                    .get(agent)
                    .filter(|cell| cell.n > 0)
                    .map(|cell| (agent, *cell))
            })
            .collect();

        self.score_cells(&eligible)
    }

    fn score_cells(&self, eligible: &[(&String, AgentCell)]) -> BTreeMap<String, (f64, u64)> {
        let max_duration = eligible
            .iter()
            .map(|(_, cell)| cell.mean_duration)
            .fold(0.0f64, f64::max);

        eligible
            .iter()
            .map(|(agent, cell)| {
                let normalized = if max_duration > 0.0 {
                    cell.mean_duration / max_duration
                } else {
                    0.0
                };
                let score = self.config.success_weight * cell.success_rate
                    + self.config.duration_weight * (1.0 - normalized);
                ((*agent).clone(), (score, cell.n))
            })
            .collect()
    }

    fn log(&self, decision: RouteDecision) -> RouteDecision {
        let mut decisions = self.decisions.lock();
        if decisions.len() == self.config.decision_log_limit {
            decisions.pop_front();
        }
        decisions.push_back(decision.clone());
        decision
    }
}

/// Argmax with deterministic tie-breaking: score, then sample count, then
/// lexicographic agent name. Returns the winner and the gap to the runner-up.
fn pick_best(scored: &BTreeMap<String, (f64, u64)>) -> (String, f64) {
    let mut best: Option<(&String, f64, u64)> = None;
    let mut second_score = 0.0f64;

    for (agent, (score, n)) in scored {
        match best {
            None => best = Some((agent, *score, *n)),
            Some((_, best_score, best_n)) => {
                let wins = *score > best_score + f64::EPSILON
                    || ((*score - best_score).abs() <= f64::EPSILON && *n > best_n);
                if wins {
                    second_score = best_score;
                    best = Some((agent, *score, *n));
                } else if *score > second_score {
                    second_score = *score;
                }
            }
        }
    }

    let (agent, score, _) = best.expect("pick_best called with non-empty scores");
    let confidence = if scored.len() > 1 {
        score - second_score
    } else {
        score
    };
    (agent.clone(), confidence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intelligence::cluster::ClusteringMethod;
    use crate::intelligence::features::Standardizer;

    fn single_cluster_model() -> Arc<ClusterModel> {
        Arc::new(ClusterModel {
            centroids: vec![vec![0.0]],
            standardizer: Standardizer::default(),
            categories: Vec::new(),
            performance: HashMap::new(),
            method: ClusteringMethod::Kmeans { k: 1 },
            trained_on: 0,
            built_at: Utc::now(),
        })
    }

    fn candidates() -> Vec<String> {
        vec!["x".to_string(), "y".to_string(), "z".to_string()]
    }

    #[test]
    fn test_epsilon_decays_with_samples() {
        let router = TaskRouter::new(RouterConfig::default(), 42);
        let fresh = router.epsilon();
        assert!((fresh - 0.3).abs() < 1e-9);

        for _ in 0..500 {
            router.update_agent_stats("x", 1.0, true, None);
        }
        let decayed = router.epsilon();
        assert!(decayed < 0.08);
        assert!(decayed >= 0.05);
    }

    #[test]
    fn test_round_robin_without_any_data() {
        let router = TaskRouter::new(RouterConfig::default(), 42);
        let first = router.route("t1", None, &candidates());
        let second = router.route("t2", None, &candidates());

        assert_eq!(first.method, RouteMethod::RoundRobin);
        assert_ne!(first.agent, second.agent);
    }

    #[test]
    fn test_default_agent_when_no_candidates() {
        let router = TaskRouter::new(RouterConfig::default(), 42);
        let decision = router.route("t1", None, &[]);
        assert_eq!(decision.agent, "moderator");
        assert_eq!(decision.method, RouteMethod::FirstCandidate);
    }

    #[test]
    fn test_cluster_scoring_prefers_strong_agent() {
        let router = TaskRouter::new(RouterConfig::default(), 42);
        router.swap_model(single_cluster_model());

        for _ in 0..500 {
            router.update_agent_stats("x", 5.0, true, Some(0));
        }

        let mut chose_x = 0;
        let mut explored = 0;
        for i in 0..40 {
            let decision = router.route(&format!("t{i}"), Some(&[0.0]), &candidates());
            assert_eq!(decision.cluster_id, Some(0));
            if decision.agent == "x" {
                chose_x += 1;
            }
            if decision.exploration {
                explored += 1;
                assert_eq!(decision.original_recommendation.as_deref(), Some("x"));
            } else {
                assert_eq!(decision.method, RouteMethod::ClusterScore);
                assert_eq!(decision.agent, "x");
            }
        }

        // With epsilon decayed near its floor the best agent dominates, but
        // exploration still fires occasionally over 40 draws.
        assert!(chose_x >= 30, "x chosen {chose_x}/40");
        assert!(explored <= 10);
    }

    #[test]
    fn test_min_samples_gate_falls_back_to_overall() {
        let router = TaskRouter::new(RouterConfig::default(), 42);
        router.swap_model(single_cluster_model());

        // Two observations in the cluster: below the min_samples gate.
        router.update_agent_stats("x", 5.0, true, Some(0));
        router.update_agent_stats("x", 5.0, true, Some(0));

        let decision = router.route("t1", Some(&[0.0]), &candidates());
        assert_eq!(decision.method, RouteMethod::OverallPerformance);
        assert_eq!(decision.agent, "x");
    }

    #[test]
    fn test_tie_broken_by_sample_count_then_name() {
        let mut scored = BTreeMap::new();
        scored.insert("beta".to_string(), (0.8, 10u64));
        scored.insert("alpha".to_string(), (0.8, 10u64));
        let (winner, _) = pick_best(&scored);
        assert_eq!(winner, "alpha");

        scored.insert("beta".to_string(), (0.8, 20u64));
        let (winner, _) = pick_best(&scored);
        assert_eq!(winner, "beta");
    }

    #[test]
    fn test_confidence_is_score_gap() {
        let mut scored = BTreeMap::new();
        scored.insert("a".to_string(), (0.9, 10u64));
        scored.insert("b".to_string(), (0.6, 10u64));
        let (winner, confidence) = pick_best(&scored);
        assert_eq!(winner, "a");
        assert!((confidence - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_decision_log_bounded() {
        let config = RouterConfig {
            decision_log_limit: 5,
            ..RouterConfig::default()
        };
        let router = TaskRouter::new(config, 42);
        for i in 0..10 {
            router.route(&format!("t{i}"), None, &candidates());
        }

        let decisions = router.decisions(100);
        assert_eq!(decisions.len(), 5);
        assert_eq!(decisions[0].task_id, "t9");
    }

    #[test]
    fn test_routing_deterministic_for_fixed_seed() {
        let run = || {
            let router = TaskRouter::new(RouterConfig::default(), 7);
            router.swap_model(single_cluster_model());
            for _ in 0..20 {
                router.update_agent_stats("x", 5.0, true, Some(0));
                router.update_agent_stats("y", 9.0, true, Some(0));
            }
            (0..20)
                .map(|i| router.route(&format!("t{i}"), Some(&[0.0]), &candidates()).agent)
                .collect::<Vec<_>>()
        };

        assert_eq!(run(), run());
    }
}
