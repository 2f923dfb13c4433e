pub mod agents;
pub mod bus;
pub mod config;
pub mod error;
pub mod gateway;
pub mod heartbeat;
pub mod intelligence;
pub mod llm;
pub mod orchestrator;
pub mod protocol;
pub mod runtime;

pub use bus::{Bus, MemoryBus, RedisBus};
pub use config::ConclaveConfig;
pub use error::{ConclaveError, Result};
pub use gateway::{Gateway, GatewayConfig};
pub use heartbeat::{HeartbeatEmitter, ReadinessMonitor, SystemStatus};
pub use intelligence::{IntelligenceHub, TaskRequest};
pub use llm::{CannedGenerator, TextGenerator};
pub use orchestrator::{DebateOrchestrator, OrchestratorConfig};
pub use protocol::{Envelope, Message, MessageIntent, Task, TaskEvent, TaskOutcome, TaskResult};
pub use runtime::{AgentContext, AgentHandler, AgentRuntime, RuntimeConfig};
