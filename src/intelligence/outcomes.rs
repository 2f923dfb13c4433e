//! Append-only outcome history.
//!
//! A bounded ring of task outcomes feeds estimator auto-tuning and cluster
//! rebuilds. Appends take a short critical section; analysis works on a
//! snapshot.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::protocol::{ReasoningEffort, TaskDiagnostics};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub task_id: String,
    pub agent: String,
    pub content: String,
    pub predicted_effort: ReasoningEffort,
    pub actual_duration_secs: f64,
    pub success: bool,
    pub cluster_id: Option<usize>,
    pub complexity_score: f64,
    pub word_count: usize,
    pub category_hits: BTreeMap<String, u32>,
    pub timestamp: DateTime<Utc>,
}

impl OutcomeRecord {
    pub fn new(
        task_id: impl Into<String>,
        agent: impl Into<String>,
        predicted_effort: ReasoningEffort,
        actual_duration_secs: f64,
        success: bool,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            agent: agent.into(),
            content: String::new(),
            predicted_effort,
            actual_duration_secs,
            success,
            cluster_id: None,
            complexity_score: 0.0,
            word_count: 0,
            category_hits: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: &TaskDiagnostics) -> Self {
        self.complexity_score = diagnostics.complexity_score;
        self.word_count = diagnostics.word_count;
        self.category_hits = diagnostics.category_hits.clone();
        self
    }

    pub fn with_cluster(mut self, cluster_id: usize) -> Self {
        self.cluster_id = Some(cluster_id);
        self
    }
}

/// Bounded outcome ring.
pub struct OutcomeLog {
    capacity: usize,
    records: Mutex<VecDeque<OutcomeRecord>>,
    total_appended: AtomicU64,
}

impl OutcomeLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: Mutex::new(VecDeque::new()),
            total_appended: AtomicU64::new(0),
        }
    }

    pub fn append(&self, record: OutcomeRecord) {
        let mut records = self.records.lock();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
        self.total_appended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Vec<OutcomeRecord> {
        self.records.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Lifetime count, unaffected by ring eviction.
    pub fn total_appended(&self) -> u64 {
        self.total_appended.load(Ordering::Relaxed)
    }

    /// Aggregate statistics for status reporting.
    pub fn stats(&self) -> OutcomeStats {
        let records = self.records.lock();

        let mut by_effort: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_success = (0usize, 0usize);
        let mut duration_sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();

        for record in records.iter() {
            let effort = record.predicted_effort.as_str().to_string();
            *by_effort.entry(effort.clone()).or_insert(0) += 1;

            if record.success {
                by_success.0 += 1;
            } else {
                by_success.1 += 1;
            }

            let entry = duration_sums.entry(effort).or_insert((0.0, 0));
            entry.0 += record.actual_duration_secs;
            entry.1 += 1;
        }

        let avg_duration_by_effort = duration_sums
            .into_iter()
            .map(|(effort, (sum, n))| (effort, sum / n as f64))
            .collect();

        OutcomeStats {
            recorded: records.len(),
            succeeded: by_success.0,
            failed: by_success.1,
            by_effort,
            avg_duration_by_effort,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutcomeStats {
    pub recorded: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub by_effort: BTreeMap<String, usize>,
    pub avg_duration_by_effort: BTreeMap<String, f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_evicts_oldest() {
        let log = OutcomeLog::new(2);
        for i in 0..3 {
            log.append(OutcomeRecord::new(
                format!("t{i}"),
                "worker_a",
                ReasoningEffort::Low,
                1.0,
                true,
            ));
        }

        let snapshot = log.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].task_id, "t1");
        assert_eq!(log.total_appended(), 3);
    }

    #[test]
    fn test_stats_aggregation() {
        let log = OutcomeLog::new(16);
        log.append(OutcomeRecord::new(
            "t1",
            "worker_a",
            ReasoningEffort::Low,
            10.0,
            true,
        ));
        log.append(OutcomeRecord::new(
            "t2",
            "worker_a",
            ReasoningEffort::Low,
            20.0,
            false,
        ));
        log.append(OutcomeRecord::new(
            "t3",
            "worker_b",
            ReasoningEffort::High,
            200.0,
            true,
        ));

        let stats = log.stats();
        assert_eq!(stats.recorded, 3);
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.by_effort["low"], 2);
        assert!((stats.avg_duration_by_effort["low"] - 15.0).abs() < 1e-9);
    }
}
