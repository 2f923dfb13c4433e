//! Task intelligence: effort estimation, typology clustering, and
//! performance-weighted routing with online feedback.

pub mod cluster;
pub mod effort;
pub mod features;
pub mod hub;
pub mod outcomes;
pub mod router;

pub use cluster::{AgentCell, ClusterModel, ClusteringMethod};
pub use effort::{EffortContext, EffortEstimator, EstimatorConfig};
pub use features::{Embedder, HashEmbedder};
pub use hub::{HubConfig, HubStatus, IntelligenceHub, RoutedTask, TaskRequest};
pub use outcomes::{OutcomeLog, OutcomeRecord, OutcomeStats};
pub use router::{RouteDecision, RouteMethod, RouterConfig, TaskRouter};
