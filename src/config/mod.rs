//! Configuration: TOML file plus environment overrides, validated into an
//! immutable snapshot.

mod settings;

pub use settings::{
    AgentSettings, BusSettings, ConclaveConfig, CoordinatorSettings, GatewaySettings,
    GeneratorSettings, HubSettings, OrchestratorSettings, RouterSettings,
};
