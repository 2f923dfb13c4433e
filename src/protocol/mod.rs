//! Canonical wire schemas, codec, and channel naming.

pub mod channels;
pub mod codec;
pub mod message;
pub mod stream;

pub use codec::{decode, encode, validate, DeadLetter, FieldError};
pub use message::{
    effort_priority_boost, intent_priority, new_task_id, Envelope, Message, MessageIntent,
    ReasoningEffort, ReasoningStrategy, Task, TaskDiagnostics, TaskEvent, TaskOutcome, TaskResult,
};
pub use stream::StreamEvent;
