//! Streaming delta events published by workers and forwarded verbatim by the
//! gateway. For a given `(task_id, agent)` pair, `stream_start` precedes all
//! updates and `stream_end` closes the sequence; concatenated deltas equal
//! the final result content when one is emitted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    StreamStart {
        task_id: String,
        agent: String,
        timestamp: DateTime<Utc>,
    },
    StreamUpdate {
        task_id: String,
        agent: String,
        delta: String,
    },
    StreamEnd {
        task_id: String,
        agent: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
}

impl StreamEvent {
    pub fn start(task_id: impl Into<String>, agent: impl Into<String>) -> Self {
        Self::StreamStart {
            task_id: task_id.into(),
            agent: agent.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn update(
        task_id: impl Into<String>,
        agent: impl Into<String>,
        delta: impl Into<String>,
    ) -> Self {
        Self::StreamUpdate {
            task_id: task_id.into(),
            agent: agent.into(),
            delta: delta.into(),
        }
    }

    pub fn end(
        task_id: impl Into<String>,
        agent: impl Into<String>,
        content: Option<String>,
    ) -> Self {
        Self::StreamEnd {
            task_id: task_id.into(),
            agent: agent.into(),
            content,
        }
    }

    pub fn task_id(&self) -> &str {
        match self {
            Self::StreamStart { task_id, .. }
            | Self::StreamUpdate { task_id, .. }
            | Self::StreamEnd { task_id, .. } => task_id,
        }
    }

    pub fn agent(&self) -> &str {
        match self {
            Self::StreamStart { agent, .. }
            | Self::StreamUpdate { agent, .. }
            | Self::StreamEnd { agent, .. } => agent,
        }
    }
}
