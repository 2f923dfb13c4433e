//! Wire model for inter-agent communication.
//!
//! One canonical envelope covers every payload on the bus: a plain
//! `Message`, a routed `Task`, or a terminal `TaskResult`. Enum literals
//! unknown to this build decode into `Unknown` variants so a newer peer
//! never crashes an older agent.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Semantic category of a message, controlling dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageIntent {
    Chat,
    StartTask,
    CheckStatus,
    ModifyTask,
    ToolSuggest,
    ToolExecute,
    Unknown(String),
}

impl MessageIntent {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Chat => "chat",
            Self::StartTask => "start_task",
            Self::CheckStatus => "check_status",
            Self::ModifyTask => "modify_task",
            Self::ToolSuggest => "tool_suggest",
            Self::ToolExecute => "tool_execute",
            Self::Unknown(s) => s,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl From<&str> for MessageIntent {
    fn from(s: &str) -> Self {
        match s {
            "chat" => Self::Chat,
            "start_task" => Self::StartTask,
            "check_status" => Self::CheckStatus,
            "modify_task" => Self::ModifyTask,
            "tool_suggest" => Self::ToolSuggest,
            "tool_execute" => Self::ToolExecute,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for MessageIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MessageIntent {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageIntent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from(s.as_str()))
    }
}

/// Lifecycle stage of a task within the orchestrator state machine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskEvent {
    Plan,
    Execute,
    Refine,
    Complete,
    Escalate,
    Unknown(String),
}

impl TaskEvent {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Plan => "plan",
            Self::Execute => "execute",
            Self::Refine => "refine",
            Self::Complete => "complete",
            Self::Escalate => "escalate",
            Self::Unknown(s) => s,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Escalate)
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl From<&str> for TaskEvent {
    fn from(s: &str) -> Self {
        match s {
            "plan" => Self::Plan,
            "execute" => Self::Execute,
            "refine" => Self::Refine,
            "complete" => Self::Complete,
            "escalate" => Self::Escalate,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for TaskEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for TaskEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TaskEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from(s.as_str()))
    }
}

/// Terminal disposition of a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskOutcome {
    Merged,
    Completed,
    Escalated,
    Unknown(String),
}

impl TaskOutcome {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Merged => "merged",
            Self::Completed => "completed",
            Self::Escalated => "escalated",
            Self::Unknown(s) => s,
        }
    }

    /// Merged and completed both count as success for outcome recording.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Merged | Self::Completed)
    }
}

impl From<&str> for TaskOutcome {
    fn from(s: &str) -> Self {
        match s {
            "merged" => Self::Merged,
            "completed" => Self::Completed,
            "escalated" => Self::Escalated,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for TaskOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TaskOutcome {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from(s.as_str()))
    }
}

/// Estimated reasoning effort for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn rank(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
        }
    }

    /// One step up, saturating at High.
    pub fn bumped(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium | Self::High => Self::High,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for ReasoningEffort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cognitive strategy hint derived from effort. Informational metadata for
/// the UI; the core never branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReasoningStrategy {
    #[serde(rename = "direct_answer")]
    DirectAnswer,
    #[serde(rename = "chain-of-thought")]
    ChainOfThought,
    #[serde(rename = "chain-of-draft")]
    ChainOfDraft,
}

impl From<ReasoningEffort> for ReasoningStrategy {
    fn from(effort: ReasoningEffort) -> Self {
        match effort {
            ReasoningEffort::Low => Self::DirectAnswer,
            ReasoningEffort::Medium => Self::ChainOfThought,
            ReasoningEffort::High => Self::ChainOfDraft,
        }
    }
}

/// Feature vector recorded by the effort estimator, carried on tasks for
/// routing and later analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskDiagnostics {
    pub word_count: usize,
    pub complexity_score: f64,
    /// Keyword hits per enabled category.
    #[serde(default)]
    pub category_hits: BTreeMap<String, u32>,
    pub high_threshold: f64,
    pub medium_threshold: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_effort: Option<ReasoningEffort>,
    /// Adjustment rules that fired, in application order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub adjustments: Vec<String>,
}

/// A chat or control utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub task_id: String,
    pub agent: String,
    pub content: String,
    pub intent: MessageIntent,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_agent: Option<String>,
}

impl Message {
    pub fn new(
        task_id: impl Into<String>,
        agent: impl Into<String>,
        content: impl Into<String>,
        intent: MessageIntent,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            agent: agent.into(),
            content: content.into(),
            intent,
            timestamp: Utc::now(),
            target_agent: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target_agent = Some(target.into());
        self
    }
}

/// A message with a target and lifecycle metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub agent: String,
    pub content: String,
    pub intent: MessageIntent,
    pub timestamp: DateTime<Utc>,
    pub target_agent: String,
    pub event: TaskEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_strategy: Option<ReasoningStrategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<TaskDiagnostics>,
}

impl Task {
    pub fn new(
        task_id: impl Into<String>,
        agent: impl Into<String>,
        content: impl Into<String>,
        target_agent: impl Into<String>,
        intent: MessageIntent,
        event: TaskEvent,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            agent: agent.into(),
            content: content.into(),
            intent,
            timestamp: Utc::now(),
            target_agent: target_agent.into(),
            event,
            confidence: None,
            reasoning_effort: None,
            reasoning_strategy: None,
            priority: None,
            diagnostics: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_effort(mut self, effort: ReasoningEffort) -> Self {
        self.reasoning_effort = Some(effort);
        self.reasoning_strategy = Some(effort.into());
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: TaskDiagnostics) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Base dispatch priority by intent, before the effort boost.
pub fn intent_priority(intent: &MessageIntent) -> i32 {
    match intent {
        MessageIntent::ModifyTask => 7,
        MessageIntent::StartTask => 5,
        MessageIntent::CheckStatus => 3,
        MessageIntent::Chat => 1,
        _ => 5,
    }
}

/// Effort boost applied on top of the intent priority.
pub fn effort_priority_boost(effort: ReasoningEffort) -> i32 {
    match effort {
        ReasoningEffort::Low => 0,
        ReasoningEffort::Medium => 2,
        ReasoningEffort::High => 5,
    }
}

/// A task with a terminal outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub agent: String,
    pub content: String,
    pub intent: MessageIntent,
    pub timestamp: DateTime<Utc>,
    pub target_agent: String,
    pub event: TaskEvent,
    pub outcome: TaskOutcome,
    #[serde(default)]
    pub contributing_agents: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<TaskDiagnostics>,
}

impl TaskResult {
    pub fn new(
        task_id: impl Into<String>,
        agent: impl Into<String>,
        content: impl Into<String>,
        target_agent: impl Into<String>,
        event: TaskEvent,
        outcome: TaskOutcome,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            agent: agent.into(),
            content: content.into(),
            intent: MessageIntent::ModifyTask,
            timestamp: Utc::now(),
            target_agent: target_agent.into(),
            event,
            outcome,
            contributing_agents: Vec::new(),
            confidence: None,
            reasoning_effort: None,
            diagnostics: None,
        }
    }

    pub fn with_contributors(mut self, agents: Vec<String>) -> Self {
        self.contributing_agents = agents;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// Shape-discriminated wire envelope. Decode order matters: a payload with
/// an `outcome` is a result, one with `target_agent` + `event` is a task,
/// anything else with the base fields is a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Envelope {
    TaskResult(TaskResult),
    Task(Task),
    Message(Message),
}

impl Envelope {
    pub fn task_id(&self) -> &str {
        match self {
            Self::TaskResult(r) => &r.task_id,
            Self::Task(t) => &t.task_id,
            Self::Message(m) => &m.task_id,
        }
    }

    pub fn agent(&self) -> &str {
        match self {
            Self::TaskResult(r) => &r.agent,
            Self::Task(t) => &t.agent,
            Self::Message(m) => &m.agent,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::TaskResult(r) => &r.content,
            Self::Task(t) => &t.content,
            Self::Message(m) => &m.content,
        }
    }

    pub fn intent(&self) -> &MessageIntent {
        match self {
            Self::TaskResult(r) => &r.intent,
            Self::Task(t) => &t.intent,
            Self::Message(m) => &m.intent,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::TaskResult(r) => r.timestamp,
            Self::Task(t) => t.timestamp,
            Self::Message(m) => m.timestamp,
        }
    }

    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::TaskResult(_) => "task_result",
            Self::Task(_) => "task",
            Self::Message(_) => "message",
        }
    }
}

/// Generate a fresh task id.
pub fn new_task_id() -> String {
    format!("task_{}", Uuid::new_v4().simple())
}
