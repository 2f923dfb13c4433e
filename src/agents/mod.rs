//! Agent variants of the reference deployment.

pub mod arbitrator;
pub mod coordinator;
pub mod moderator;
pub mod refiner;
pub mod tool_executor;
pub mod worker;
pub mod workflow;

pub use arbitrator::ArbitratorAgent;
pub use coordinator::CoordinatorAgent;
pub use moderator::ModeratorAgent;
pub use refiner::RefinerAgent;
pub use tool_executor::{EchoBackend, ToolBackend, ToolExecutorAgent};
pub use worker::WorkerAgent;
pub use workflow::WorkflowGeneratorAgent;
