//! Debate orchestration: per-task state and the protocol state machine.

pub mod machine;
pub mod state;

pub use machine::{DebateOrchestrator, OrchestratorConfig};
pub use state::TaskState;
