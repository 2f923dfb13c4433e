//! Bounded conversational history per active task.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Digest of proposal content: lowercased, whitespace collapsed, hashed.
/// Two proposals with the same digest are the same proposal for loop
/// detection purposes.
pub fn content_digest(content: &str) -> String {
    let normalized = content
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub sender: String,
    pub digest: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-task ring of the last K contributions, with the task map itself
/// bounded so abandoned tasks age out.
pub struct TaskHistory {
    per_task: usize,
    max_tasks: usize,
    tasks: HashMap<String, VecDeque<HistoryEntry>>,
    task_order: VecDeque<String>,
}

impl TaskHistory {
    pub fn new(per_task: usize, max_tasks: usize) -> Self {
        Self {
            per_task: per_task.max(1),
            max_tasks: max_tasks.max(1),
            tasks: HashMap::new(),
            task_order: VecDeque::new(),
        }
    }

    pub fn record(&mut self, task_id: &str, sender: &str, content: &str) {
        if !self.tasks.contains_key(task_id) {
            if self.task_order.len() == self.max_tasks {
                if let Some(evicted) = self.task_order.pop_front() {
                    self.tasks.remove(&evicted);
                }
            }
            self.task_order.push_back(task_id.to_string());
            self.tasks.insert(task_id.to_string(), VecDeque::new());
        }

        let ring = self.tasks.get_mut(task_id).expect("ring just inserted");
        if ring.len() == self.per_task {
            ring.pop_front();
        }
        ring.push_back(HistoryEntry {
            sender: sender.to_string(),
            digest: content_digest(content),
            timestamp: Utc::now(),
        });
    }

    pub fn entries(&self, task_id: &str) -> Vec<&HistoryEntry> {
        self.tasks
            .get(task_id)
            .map(|ring| ring.iter().collect())
            .unwrap_or_default()
    }

    pub fn forget(&mut self, task_id: &str) {
        self.tasks.remove(task_id);
        self.task_order.retain(|t| t != task_id);
    }

    pub fn active_tasks(&self) -> usize {
        self.tasks.len()
    }
}
