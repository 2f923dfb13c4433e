//! Per-task debate state owned by the orchestrator.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::protocol::TaskEvent;
use crate::runtime::history::content_digest;

const HISTORY_CAP: usize = 64;

#[derive(Debug, Clone)]
pub struct StateEntry {
    pub sender: String,
    pub event: TaskEvent,
    pub digest: String,
    pub timestamp: DateTime<Utc>,
}

/// Live state of one task moving through the debate protocol. Exists while
/// any agent is expected to reply; deleted on terminal outcome or
/// kill-switch.
#[derive(Debug)]
pub struct TaskState {
    pub task_id: String,
    pub status: TaskEvent,
    pub original_requester: String,
    pub current_step: String,
    /// Non-decreasing debate round, starting at 1.
    pub round: u32,
    pub history: VecDeque<StateEntry>,
    pub last_confidences: VecDeque<f64>,
    confidence_window: usize,
    last_digest_by_sender: HashMap<String, String>,
    pub similarity_hits: u32,
    /// Agents in order of first contribution.
    pub contributors: Vec<String>,
    pub created_at: Instant,
    pub created_at_utc: DateTime<Utc>,
}

impl TaskState {
    pub fn new(
        task_id: impl Into<String>,
        original_requester: impl Into<String>,
        confidence_window: usize,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskEvent::Plan,
            original_requester: original_requester.into(),
            current_step: "awaiting proposal".to_string(),
            round: 1,
            history: VecDeque::new(),
            last_confidences: VecDeque::new(),
            confidence_window: confidence_window.max(1),
            last_digest_by_sender: HashMap::new(),
            similarity_hits: 0,
            contributors: Vec::new(),
            created_at: Instant::now(),
            created_at_utc: Utc::now(),
        }
    }

    /// Record a contribution. Returns true when the sender repeated their
    /// previous proposal verbatim (normalized), which also bumps
    /// `similarity_hits`.
    pub fn record(&mut self, sender: &str, event: TaskEvent, content: &str) -> bool {
        let digest = content_digest(content);

        if self.history.len() == HISTORY_CAP {
            self.history.pop_front();
        }
        self.history.push_back(StateEntry {
            sender: sender.to_string(),
            event,
            digest: digest.clone(),
            timestamp: Utc::now(),
        });

        if !self.contributors.iter().any(|c| c == sender) {
            self.contributors.push(sender.to_string());
        }

        let duplicate = self
            .last_digest_by_sender
            .insert(sender.to_string(), digest.clone())
            .is_some_and(|previous| previous == digest);
        if duplicate {
            self.similarity_hits += 1;
        }
        duplicate
    }

    pub fn push_confidence(&mut self, confidence: f64) {
        if self.last_confidences.len() == self.confidence_window {
            self.last_confidences.pop_front();
        }
        self.last_confidences.push_back(confidence);
    }

    /// Confidence has flatlined: the window is full and its spread is below
    /// the plateau delta.
    pub fn plateaued(&self, delta: f64) -> bool {
        if self.last_confidences.len() < self.confidence_window {
            return false;
        }
        let max = self.last_confidences.iter().cloned().fold(f64::MIN, f64::max);
        let min = self.last_confidences.iter().cloned().fold(f64::MAX, f64::min);
        max - min < delta
    }

    pub fn mean_confidence(&self) -> f64 {
        if self.last_confidences.is_empty() {
            return 0.0;
        }
        self.last_confidences.iter().sum::<f64>() / self.last_confidences.len() as f64
    }

    /// Move to the next lifecycle stage. The round counter only grows.
    pub fn advance(&mut self, status: TaskEvent, step: impl Into<String>) {
        self.status = status;
        self.current_step = step.into();
    }

    pub fn next_round(&mut self) {
        self.round += 1;
    }

    pub fn age_secs(&self) -> f64 {
        self.created_at.elapsed().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_detection_per_sender() {
        let mut state = TaskState::new("t1", "client", 3);

        assert!(!state.record("worker_a", TaskEvent::Execute, "proposal one"));
        assert!(state.record("worker_a", TaskEvent::Execute, "Proposal   ONE"));
        assert_eq!(state.similarity_hits, 1);

        // A different sender with the same content is not a duplicate.
        assert!(!state.record("worker_b", TaskEvent::Execute, "proposal one"));
        assert_eq!(state.similarity_hits, 1);
    }

    #[test]
    fn test_contributors_in_first_contribution_order() {
        let mut state = TaskState::new("t1", "client", 3);
        state.record("worker_a", TaskEvent::Execute, "a");
        state.record("arbitrator", TaskEvent::Refine, "b");
        state.record("worker_a", TaskEvent::Execute, "c");

        assert_eq!(state.contributors, vec!["worker_a", "arbitrator"]);
    }

    #[test]
    fn test_plateau_requires_full_window() {
        let mut state = TaskState::new("t1", "client", 3);
        state.push_confidence(0.81);
        state.push_confidence(0.83);
        assert!(!state.plateaued(0.05));

        state.push_confidence(0.82);
        assert!(state.plateaued(0.05));
    }

    #[test]
    fn test_no_plateau_with_wide_spread() {
        let mut state = TaskState::new("t1", "client", 3);
        for c in [0.4, 0.6, 0.9] {
            state.push_confidence(c);
        }
        assert!(!state.plateaued(0.05));
    }

    #[test]
    fn test_confidence_window_slides() {
        let mut state = TaskState::new("t1", "client", 3);
        for c in [0.1, 0.9, 0.81, 0.83, 0.82] {
            state.push_confidence(c);
        }
        assert_eq!(state.last_confidences.len(), 3);
        assert!(state.plateaued(0.05));
    }

    #[test]
    fn test_round_non_decreasing() {
        let mut state = TaskState::new("t1", "client", 3);
        let before = state.round;
        state.next_round();
        state.advance(TaskEvent::Refine, "refining");
        assert!(state.round > before);
    }
}
