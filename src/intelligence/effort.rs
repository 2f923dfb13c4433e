//! Reasoning-effort estimation.
//!
//! A pure function from content, event, and intent to an effort label plus
//! diagnostics, with keyword-category weights that auto-tune from recorded
//! outcomes. Config is an immutable snapshot; tuning swaps the whole
//! snapshot so readers always see a consistent view.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::protocol::{MessageIntent, ReasoningEffort, TaskDiagnostics, TaskEvent};

use super::outcomes::OutcomeRecord;

/// Bound on how far one tuning cycle may move a category weight.
const TUNE_STEP: f64 = 0.10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub enabled: bool,
    pub weight: f64,
    pub keywords: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds {
    pub high_word_count: usize,
    pub medium_word_count: usize,
    pub high_scale: f64,
    pub medium_scale: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            high_word_count: 50,
            medium_word_count: 20,
            high_scale: 5.0,
            medium_scale: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Overrides {
    pub low_confidence: f64,
    pub deadline_pressure: f64,
    pub category_overlap_bonus: f64,
}

impl Default for Overrides {
    fn default() -> Self {
        Self {
            low_confidence: 0.7,
            deadline_pressure: 0.8,
            category_overlap_bonus: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutotuneConfig {
    pub enabled: bool,
    pub analysis_after: usize,
    pub retain_history: bool,
    pub history_limit: usize,
    /// Duration cutoffs (seconds) binning actual durations into empirical
    /// low / medium / high effort.
    pub duration_cutoffs: (f64, f64),
}

impl Default for AutotuneConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            analysis_after: 100,
            retain_history: true,
            history_limit: 1000,
            duration_cutoffs: (30.0, 120.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimatorConfig {
    pub categories: BTreeMap<String, CategoryConfig>,
    pub thresholds: Thresholds,
    pub overrides: Overrides,
    pub autotune: AutotuneConfig,
}

fn category(weight: f64, keywords: &[&str]) -> CategoryConfig {
    CategoryConfig {
        enabled: true,
        weight,
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
    }
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        let mut categories = BTreeMap::new();
        categories.insert(
            "analytical".to_string(),
            category(
                1.0,
                &[
                    "analyze",
                    "evaluate",
                    "assess",
                    "research",
                    "investigate",
                    "study",
                    "examine",
                    "review",
                    "diagnose",
                    "audit",
                    "survey",
                    "inspect",
                ],
            ),
        );
        categories.insert(
            "comparative".to_string(),
            category(
                1.5,
                &[
                    "compare",
                    "contrast",
                    "differentiate",
                    "versus",
                    "pros and cons",
                    "trade-off",
                    "benchmark",
                    "measure against",
                    "weigh",
                    "rank",
                ],
            ),
        );
        categories.insert(
            "creative".to_string(),
            category(
                2.0,
                &[
                    "design",
                    "create",
                    "optimize",
                    "improve",
                    "innovate",
                    "develop",
                    "build",
                    "construct",
                    "craft",
                    "devise",
                    "formulate",
                    "invent",
                ],
            ),
        );
        categories.insert(
            "complex".to_string(),
            category(
                2.5,
                &[
                    "hypothesize",
                    "synthesize",
                    "debate",
                    "refactor",
                    "architect",
                    "theorize",
                    "model",
                    "simulate",
                    "predict",
                    "extrapolate",
                    "integrate",
                    "transform",
                    "restructure",
                ],
            ),
        );

        Self {
            categories,
            thresholds: Thresholds::default(),
            overrides: Overrides::default(),
            autotune: AutotuneConfig::default(),
        }
    }
}

/// Extra signals for estimation beyond the content itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct EffortContext<'a> {
    pub event: Option<&'a TaskEvent>,
    pub intent: Option<&'a MessageIntent>,
    pub confidence: Option<f64>,
    pub deadline_pressure: Option<f64>,
}

/// Count keyword occurrences for one category. Multi-word keywords match as
/// case-insensitive substrings; single words match on word boundaries.
fn count_hits(content_lower: &str, words: &[&str], keywords: &BTreeSet<String>) -> u32 {
    let mut count = 0u32;
    for keyword in keywords {
        if keyword.contains(' ') {
            count += content_lower.matches(keyword.as_str()).count() as u32;
        } else {
            count += words.iter().filter(|w| **w == keyword.as_str()).count() as u32;
        }
    }
    count
}

/// Pure estimator over an immutable config snapshot.
#[derive(Debug, Clone)]
pub struct EffortEstimator {
    config: EstimatorConfig,
}

impl EffortEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// Weighted complexity score and per-category hit counts.
    pub fn complexity(&self, content: &str) -> (f64, BTreeMap<String, u32>) {
        let content_lower = content.to_lowercase();
        let words: Vec<&str> = content_lower
            .split(|c: char| !c.is_alphanumeric() && c != '-')
            .filter(|w| !w.is_empty())
            .collect();

        let mut hits = BTreeMap::new();
        let mut score = 0.0;

        for (name, cat) in &self.config.categories {
            if !cat.enabled {
                continue;
            }
            let count = count_hits(&content_lower, &words, &cat.keywords);
            score += count as f64 * cat.weight;
            hits.insert(name.clone(), count);
        }

        // Tasks spanning several domains are harder than any single domain
        // suggests.
        let active = hits.values().filter(|c| **c > 0).count();
        if active > 2 {
            score += self.config.overrides.category_overlap_bonus * (active as f64 - 2.0);
        }

        (score, hits)
    }

    /// Estimate the effort for a piece of content. Adjustments only ever
    /// raise the level; every rule that fires is recorded in diagnostics.
    pub fn estimate(&self, content: &str, ctx: EffortContext<'_>) -> (ReasoningEffort, TaskDiagnostics) {
        let (complexity_score, category_hits) = self.complexity(content);
        let word_count = content.split_whitespace().count();

        let t = &self.config.thresholds;
        let high_threshold =
            (t.high_word_count as f64 - complexity_score * t.high_scale).max(10.0);
        let medium_threshold =
            (t.medium_word_count as f64 - complexity_score * t.medium_scale).max(5.0);

        let base = if complexity_score >= 3.0 || word_count as f64 > high_threshold {
            ReasoningEffort::High
        } else if complexity_score >= 1.0 || word_count as f64 > medium_threshold {
            ReasoningEffort::Medium
        } else {
            ReasoningEffort::Low
        };

        let mut effort = base;
        let mut adjustments = Vec::new();

        if let Some(event) = ctx.event {
            if matches!(event, TaskEvent::Refine | TaskEvent::Escalate)
                && effort != ReasoningEffort::High
            {
                effort = ReasoningEffort::High;
                adjustments.push(format!("event:{event}"));
            }
        }

        if ctx.intent == Some(&MessageIntent::ModifyTask) && effort != ReasoningEffort::High {
            effort = ReasoningEffort::High;
            adjustments.push("intent:modify_task".to_string());
        }

        if let Some(confidence) = ctx.confidence {
            if confidence < self.config.overrides.low_confidence
                && effort != ReasoningEffort::High
            {
                effort = effort.bumped();
                adjustments.push(format!("low_confidence:{confidence:.2}"));
            }
        }

        if let Some(pressure) = ctx.deadline_pressure {
            if pressure > self.config.overrides.deadline_pressure
                && effort != ReasoningEffort::High
            {
                effort = ReasoningEffort::High;
                adjustments.push(format!("deadline_pressure:{pressure:.2}"));
            }
        }

        let active_categories = category_hits.values().filter(|c| **c > 0).count();
        if active_categories >= 2 && effort != ReasoningEffort::High {
            effort = effort.bumped();
            adjustments.push("category_overlap".to_string());
        }

        // Complex-keyword content is never Low.
        if category_hits.get("complex").copied().unwrap_or(0) > 0
            && effort == ReasoningEffort::Low
        {
            effort = ReasoningEffort::Medium;
            adjustments.push("complex_keywords".to_string());
        }

        let diagnostics = TaskDiagnostics {
            word_count,
            complexity_score,
            category_hits,
            high_threshold,
            medium_threshold,
            base_effort: Some(base),
            adjustments,
        };

        (effort, diagnostics)
    }
}

/// Bin an actual duration into an empirical effort level.
pub fn empirical_effort(duration_secs: f64, cutoffs: (f64, f64)) -> ReasoningEffort {
    if duration_secs <= cutoffs.0 {
        ReasoningEffort::Low
    } else if duration_secs <= cutoffs.1 {
        ReasoningEffort::Medium
    } else {
        ReasoningEffort::High
    }
}

/// Recompute category weights from outcome history. Each category with
/// recorded hits moves by at most ±10%: up when its tasks ran longer than
/// predicted, down when shorter. Returns the tuned snapshot.
pub fn tune_weights(config: &EstimatorConfig, outcomes: &[OutcomeRecord]) -> EstimatorConfig {
    let mut tuned = config.clone();
    let cutoffs = config.autotune.duration_cutoffs;

    for (name, cat) in tuned.categories.iter_mut() {
        let relevant: Vec<&OutcomeRecord> = outcomes
            .iter()
            .filter(|o| o.category_hits.get(name).copied().unwrap_or(0) > 0)
            .collect();
        if relevant.is_empty() {
            continue;
        }

        let mut drift = 0i64;
        for outcome in &relevant {
            let empirical = empirical_effort(outcome.actual_duration_secs, cutoffs);
            drift += empirical.rank() as i64 - outcome.predicted_effort.rank() as i64;
        }

        let mean_drift = drift as f64 / relevant.len() as f64;
        let factor = 1.0 + (mean_drift.clamp(-1.0, 1.0) * TUNE_STEP);
        cat.weight = (cat.weight * factor).max(0.1);
    }

    tuned
}
