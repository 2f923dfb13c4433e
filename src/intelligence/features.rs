//! Task feature extraction for clustering.
//!
//! A task's features are its content embedding concatenated with scaled
//! numeric signals from the effort diagnostics. The embedding provider is
//! opaque; a deterministic hashing projector covers tests and offline use.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::TaskDiagnostics;

/// Relative weights keeping the embedding dominant over numeric signals.
const COMPLEXITY_SCALE: f64 = 0.5;
const WORD_COUNT_SCALE: f64 = 0.1;
const CATEGORY_SCALE: f64 = 0.3;

/// Fixed-dimension content embedding provider.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, content: &str) -> Result<Vec<f64>>;
    fn dimension(&self) -> usize;
}

/// Deterministic bag-of-words projector: each word hashes into a bucket.
/// Not a semantic embedding, but stable, cheap, and good enough to give the
/// clusterer signal when no external provider is wired in.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, content: &str) -> Result<Vec<f64>> {
        let mut vector = vec![0.0f64; self.dimension];
        for word in content.to_lowercase().split_whitespace() {
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            let bucket = (hasher.finish() as usize) % self.dimension;
            vector[bucket] += 1.0;
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn l2_normalize(vector: &mut [f64]) {
    let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Assemble the full feature vector: normalized embedding, then scaled
/// complexity, word count, and per-category hits in the given order.
pub fn build_features(
    embedding: Vec<f64>,
    diagnostics: &TaskDiagnostics,
    categories: &[String],
) -> Vec<f64> {
    let mut features = embedding;
    l2_normalize(&mut features);

    features.push(diagnostics.complexity_score * COMPLEXITY_SCALE);
    features.push(diagnostics.word_count as f64 * WORD_COUNT_SCALE);
    for category in categories {
        let hits = diagnostics.category_hits.get(category).copied().unwrap_or(0);
        features.push(hits as f64 * CATEGORY_SCALE);
    }

    features
}

/// Zero-mean unit-variance standardization over the numeric tail of the
/// feature vector; the embedding prefix is already normalized.
#[derive(Debug, Clone, Default)]
pub struct Standardizer {
    offset: usize,
    means: Vec<f64>,
    stds: Vec<f64>,
}

impl Standardizer {
    /// Fit from a feature matrix, standardizing columns from `offset` on.
    pub fn fit(matrix: &[Vec<f64>], offset: usize) -> Self {
        let Some(width) = matrix.first().map(|row| row.len()) else {
            return Self::default();
        };
        let tail = width.saturating_sub(offset);
        let n = matrix.len() as f64;

        let mut means = vec![0.0; tail];
        for row in matrix {
            for (i, value) in row[offset..].iter().enumerate() {
                means[i] += value;
            }
        }
        for mean in &mut means {
            *mean /= n;
        }

        let mut stds = vec![0.0; tail];
        for row in matrix {
            for (i, value) in row[offset..].iter().enumerate() {
                let d = value - means[i];
                stds[i] += d * d;
            }
        }
        for std in &mut stds {
            *std = (*std / n).sqrt();
            if *std < 1e-9 {
                *std = 1.0;
            }
        }

        Self {
            offset,
            means,
            stds,
        }
    }

    pub fn transform(&self, features: &[f64]) -> Vec<f64> {
        let mut out = features.to_vec();
        for (i, value) in out[self.offset..].iter_mut().enumerate() {
            if i < self.means.len() {
                *value = (*value - self.means[i]) / self.stds[i];
            }
        }
        out
    }
}
