use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{ConclaveError, Result};
use crate::gateway::GatewayConfig;
use crate::intelligence::{ClusteringMethod, EstimatorConfig, HubConfig, RouterConfig};
use crate::orchestrator::OrchestratorConfig;
use crate::runtime::RuntimeConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    pub url: String,
    pub password: Option<String>,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            password: None,
        }
    }
}

impl BusSettings {
    /// Bus URL with the password spliced in when configured separately.
    pub fn effective_url(&self) -> String {
        match &self.password {
            Some(password) if !self.url.contains('@') => match self.url.split_once("://") {
                Some((scheme, rest)) => format!("{scheme}://:{password}@{rest}"),
                None => self.url.clone(),
            },
            _ => self.url.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub name: String,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_ttl_secs: u64,
    pub dispatch_workers: usize,
    pub queue_capacity: usize,
    pub dedup_capacity: usize,
    pub drain_timeout_secs: u64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            name: "agent".to_string(),
            heartbeat_interval_secs: 5,
            heartbeat_ttl_secs: 15,
            dispatch_workers: 4,
            queue_capacity: 64,
            dedup_capacity: 1024,
            drain_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    pub max_rounds: u32,
    pub task_timeout_secs: u64,
    pub plateau_delta: f64,
    pub consensus_threshold: f64,
    pub confidence_window: usize,
    pub critic: String,
    pub refiner: String,
    pub privileged_senders: Vec<String>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            task_timeout_secs: 300,
            plateau_delta: 0.05,
            consensus_threshold: 0.9,
            confidence_window: 3,
            critic: "arbitrator".to_string(),
            refiner: "refiner".to_string(),
            privileged_senders: vec!["coordinator".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSettings {
    pub available_agents: Vec<String>,
    pub cluster_rebuild_interval_secs: u64,
    pub retrain_threshold: usize,
    pub outcome_capacity: usize,
    pub router_seed: u64,
    pub embedding_dimension: usize,
    /// Last field: serializes as a table, which TOML requires after values.
    pub clustering: ClusteringMethod,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            available_agents: vec!["worker_a".to_string(), "worker_b".to_string()],
            cluster_rebuild_interval_secs: 600,
            retrain_threshold: 50,
            clustering: ClusteringMethod::default(),
            outcome_capacity: 1000,
            router_seed: 42,
            embedding_dimension: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterSettings {
    pub success_weight: f64,
    pub duration_weight: f64,
    pub min_samples: u64,
    pub epsilon_min: f64,
    pub epsilon_max: f64,
    pub tau: f64,
    pub decision_log_limit: usize,
    pub default_agent: String,
}

impl Default for RouterSettings {
    fn default() -> Self {
        let defaults = RouterConfig::default();
        Self {
            success_weight: defaults.success_weight,
            duration_weight: defaults.duration_weight,
            min_samples: defaults.min_samples,
            epsilon_min: defaults.epsilon_min,
            epsilon_max: defaults.epsilon_max,
            tau: defaults.tau,
            decision_log_limit: defaults.decision_log_limit,
            default_agent: defaults.default_agent,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub bind_addr: String,
    pub orchestrator: String,
    pub queue_capacity: usize,
    pub ping_interval_secs: u64,
    pub max_missed_pings: u32,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        let defaults = GatewayConfig::default();
        Self {
            bind_addr: defaults.bind_addr,
            orchestrator: defaults.orchestrator,
            queue_capacity: defaults.queue_capacity,
            ping_interval_secs: 30,
            max_missed_pings: defaults.max_missed_pings,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSettings {
    pub required_agents: Vec<String>,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            required_agents: vec![
                "moderator".to_string(),
                "arbitrator".to_string(),
                "refiner".to_string(),
                "tool_executor".to_string(),
                "worker_a".to_string(),
                "worker_b".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorSettings {
    pub call_timeout_secs: u64,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            call_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConclaveConfig {
    pub bus: BusSettings,
    pub agent: AgentSettings,
    pub orchestrator: OrchestratorSettings,
    pub hub: HubSettings,
    pub router: RouterSettings,
    pub estimator: EstimatorConfig,
    pub gateway: GatewaySettings,
    pub coordinator: CoordinatorSettings,
    pub generator: GeneratorSettings,
}

impl ConclaveConfig {
    /// Load from an optional TOML file, then apply environment overrides,
    /// then validate.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let content = fs::read_to_string(path).await?;
                toml::from_str(&content)?
            }
            _ => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        fn parse<T: std::str::FromStr>(key: &str, value: String) -> Result<T> {
            value
                .parse()
                .map_err(|_| ConclaveError::Config(format!("invalid value for {key}: {value}")))
        }

        if let Ok(url) = std::env::var("BUS_URL") {
            self.bus.url = url;
        }
        if let Ok(password) = std::env::var("BUS_PASSWORD") {
            self.bus.password = Some(password);
        }
        if let Ok(name) = std::env::var("AGENT_NAME") {
            self.agent.name = name;
        }
        if let Ok(v) = std::env::var("HEARTBEAT_INTERVAL_SEC") {
            self.agent.heartbeat_interval_secs = parse("HEARTBEAT_INTERVAL_SEC", v)?;
        }
        if let Ok(v) = std::env::var("HEARTBEAT_TTL_SEC") {
            self.agent.heartbeat_ttl_secs = parse("HEARTBEAT_TTL_SEC", v)?;
        }
        if let Ok(v) = std::env::var("MAX_ROUNDS") {
            self.orchestrator.max_rounds = parse("MAX_ROUNDS", v)?;
        }
        if let Ok(v) = std::env::var("TASK_TIMEOUT_SEC") {
            self.orchestrator.task_timeout_secs = parse("TASK_TIMEOUT_SEC", v)?;
        }
        if let Ok(v) = std::env::var("PLATEAU_DELTA") {
            self.orchestrator.plateau_delta = parse("PLATEAU_DELTA", v)?;
        }
        if let Ok(v) = std::env::var("CONSENSUS_THRESHOLD") {
            self.orchestrator.consensus_threshold = parse("CONSENSUS_THRESHOLD", v)?;
        }
        Ok(())
    }

    /// Validate for consistency; collects every violation.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.agent.name.trim().is_empty() {
            errors.push("agent.name must not be empty".into());
        }
        if self.agent.heartbeat_interval_secs == 0 {
            errors.push("agent.heartbeat_interval_secs must be greater than 0".into());
        }
        if self.agent.heartbeat_ttl_secs < self.agent.heartbeat_interval_secs * 2 {
            errors.push("agent.heartbeat_ttl_secs must be at least twice the interval".into());
        }
        if self.agent.dispatch_workers == 0 {
            errors.push("agent.dispatch_workers must be greater than 0".into());
        }

        if self.orchestrator.max_rounds == 0 {
            errors.push("orchestrator.max_rounds must be greater than 0".into());
        }
        if !(0.0..=1.0).contains(&self.orchestrator.plateau_delta) {
            errors.push("orchestrator.plateau_delta must be between 0.0 and 1.0".into());
        }
        if !(0.0..=1.0).contains(&self.orchestrator.consensus_threshold) {
            errors.push("orchestrator.consensus_threshold must be between 0.0 and 1.0".into());
        }

        if self.hub.available_agents.is_empty() {
            errors.push("hub.available_agents must not be empty".into());
        }
        if let ClusteringMethod::Kmeans { k } = self.hub.clustering {
            if k == 0 {
                errors.push("hub.clustering k must be greater than 0".into());
            }
        }

        if !(0.0..=1.0).contains(&self.router.epsilon_min)
            || !(0.0..=1.0).contains(&self.router.epsilon_max)
        {
            errors.push("router epsilon bounds must be between 0.0 and 1.0".into());
        }
        if self.router.epsilon_min > self.router.epsilon_max {
            errors.push("router.epsilon_min must not exceed epsilon_max".into());
        }
        if self.router.tau <= 0.0 {
            errors.push("router.tau must be positive".into());
        }

        for (name, category) in &self.estimator.categories {
            if category.weight <= 0.0 {
                errors.push(format!("estimator category {name} weight must be positive"));
            }
        }
        if !(0.0..=1.0).contains(&self.estimator.overrides.low_confidence) {
            errors.push("estimator.overrides.low_confidence must be between 0.0 and 1.0".into());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConclaveError::Config(errors.join("; ")))
        }
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            heartbeat_interval: Duration::from_secs(self.agent.heartbeat_interval_secs),
            dispatch_workers: self.agent.dispatch_workers,
            queue_capacity: self.agent.queue_capacity,
            dedup_capacity: self.agent.dedup_capacity,
            drain_timeout: Duration::from_secs(self.agent.drain_timeout_secs),
            ..RuntimeConfig::default()
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_rounds: self.orchestrator.max_rounds,
            task_timeout: Duration::from_secs(self.orchestrator.task_timeout_secs),
            plateau_delta: self.orchestrator.plateau_delta,
            consensus_threshold: self.orchestrator.consensus_threshold,
            confidence_window: self.orchestrator.confidence_window,
            critic: self.orchestrator.critic.clone(),
            refiner: self.orchestrator.refiner.clone(),
            privileged_senders: self.orchestrator.privileged_senders.clone(),
            ..OrchestratorConfig::default()
        }
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            available_agents: self.hub.available_agents.clone(),
            cluster_rebuild_interval: Duration::from_secs(self.hub.cluster_rebuild_interval_secs),
            retrain_threshold: self.hub.retrain_threshold,
            clustering: self.hub.clustering,
            outcome_capacity: self.hub.outcome_capacity,
            router_seed: self.hub.router_seed,
        }
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            success_weight: self.router.success_weight,
            duration_weight: self.router.duration_weight,
            min_samples: self.router.min_samples,
            epsilon_min: self.router.epsilon_min,
            epsilon_max: self.router.epsilon_max,
            tau: self.router.tau,
            decision_log_limit: self.router.decision_log_limit,
            default_agent: self.router.default_agent.clone(),
        }
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            bind_addr: self.gateway.bind_addr.clone(),
            orchestrator: self.gateway.orchestrator.clone(),
            queue_capacity: self.gateway.queue_capacity,
            ping_interval: Duration::from_secs(self.gateway.ping_interval_secs),
            max_missed_pings: self.gateway.max_missed_pings,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.generator.call_timeout_secs)
    }
}
