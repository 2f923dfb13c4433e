//! Task typology clustering.
//!
//! Rebuilt from outcome history, the cluster model is an immutable snapshot:
//! centroids, the standardizer fitted alongside them, and per-cluster agent
//! performance seeds. Assignment of a new task is nearest-centroid.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;

use super::features::{build_features, Embedder, Standardizer};
use super::outcomes::OutcomeRecord;

const KMEANS_MAX_ITERATIONS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "method")]
pub enum ClusteringMethod {
    Kmeans { k: usize },
    Density { eps: f64, min_pts: usize },
}

impl Default for ClusteringMethod {
    fn default() -> Self {
        Self::Kmeans { k: 5 }
    }
}

/// Performance of one agent within one cluster.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AgentCell {
    pub success_rate: f64,
    pub mean_duration: f64,
    pub n: u64,
}

impl AgentCell {
    /// Incremental update with one more observation.
    pub fn observe(&mut self, duration_secs: f64, success: bool) {
        let n = self.n as f64;
        self.success_rate = (self.success_rate * n + if success { 1.0 } else { 0.0 }) / (n + 1.0);
        self.mean_duration = (self.mean_duration * n + duration_secs) / (n + 1.0);
        self.n += 1;
    }
}

/// Immutable clustering snapshot, swapped whole on rebuild.
pub struct ClusterModel {
    pub centroids: Vec<Vec<f64>>,
    pub standardizer: Standardizer,
    pub categories: Vec<String>,
    /// Seed performance cells computed from the history this model was
    /// fitted on: cluster id -> agent -> cell.
    pub performance: HashMap<usize, HashMap<String, AgentCell>>,
    pub method: ClusteringMethod,
    pub trained_on: usize,
    pub built_at: DateTime<Utc>,
}

impl ClusterModel {
    /// Nearest centroid for an already-assembled raw feature vector.
    pub fn assign(&self, raw_features: &[f64]) -> Option<usize> {
        if self.centroids.is_empty() {
            return None;
        }
        let features = self.standardizer.transform(raw_features);
        let mut best = 0usize;
        let mut best_dist = f64::MAX;
        for (i, centroid) in self.centroids.iter().enumerate() {
            let dist = squared_distance(&features, centroid);
            if dist < best_dist {
                best_dist = dist;
                best = i;
            }
        }
        Some(best)
    }

    pub fn cluster_count(&self) -> usize {
        self.centroids.len()
    }
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum()
}

/// Fit a model from outcome history. Returns `None` when the history is too
/// small to produce the requested clustering.
pub async fn fit(
    records: &[OutcomeRecord],
    embedder: &dyn Embedder,
    method: ClusteringMethod,
    categories: &[String],
    seed: u64,
) -> Result<Option<ClusterModel>> {
    let usable: Vec<&OutcomeRecord> = records.iter().filter(|r| !r.content.is_empty()).collect();
    let needed = match method {
        ClusteringMethod::Kmeans { k } => k,
        ClusteringMethod::Density { min_pts, .. } => min_pts,
    };
    if usable.len() < needed.max(2) {
        debug!(records = usable.len(), "Too little history to cluster");
        return Ok(None);
    }

    let mut matrix = Vec::with_capacity(usable.len());
    for record in &usable {
        let embedding = embedder.embed(&record.content).await?;
        let diagnostics = crate::protocol::TaskDiagnostics {
            word_count: record.word_count,
            complexity_score: record.complexity_score,
            category_hits: record.category_hits.clone(),
            ..Default::default()
        };
        matrix.push(build_features(embedding, &diagnostics, categories));
    }

    let standardizer = Standardizer::fit(&matrix, embedder.dimension());
    let standardized: Vec<Vec<f64>> = matrix.iter().map(|row| standardizer.transform(row)).collect();

    let (centroids, labels) = match method {
        ClusteringMethod::Kmeans { k } => kmeans(&standardized, k, seed),
        ClusteringMethod::Density { eps, min_pts } => density(&standardized, eps, min_pts),
    };

    if centroids.is_empty() {
        debug!("Clustering produced no clusters");
        return Ok(None);
    }

    // Seed per-cluster agent performance from the fitted history.
    let mut performance: HashMap<usize, HashMap<String, AgentCell>> = HashMap::new();
    for (record, label) in usable.iter().zip(labels.iter()) {
        let Some(cluster) = label else { continue };
        performance
            .entry(*cluster)
            .or_default()
            .entry(record.agent.clone())
            .or_default()
            .observe(record.actual_duration_secs, record.success);
    }

    info!(
        clusters = centroids.len(),
        records = usable.len(),
        "Cluster model rebuilt"
    );

    Ok(Some(ClusterModel {
        centroids,
        standardizer,
        categories: categories.to_vec(),
        performance,
        method,
        trained_on: usable.len(),
        built_at: Utc::now(),
    }))
}

/// Lloyd's algorithm with seeded initialization. Labels align with the
/// input rows; every row gets a cluster.
fn kmeans(data: &[Vec<f64>], k: usize, seed: u64) -> (Vec<Vec<f64>>, Vec<Option<usize>>) {
    let k = k.min(data.len()).max(1);
    let mut rng = StdRng::seed_from_u64(seed);

    let mut indices: Vec<usize> = (0..data.len()).collect();
    indices.shuffle(&mut rng);
    let mut centroids: Vec<Vec<f64>> = indices[..k].iter().map(|&i| data[i].clone()).collect();

    let mut labels = vec![0usize; data.len()];
    for _ in 0..KMEANS_MAX_ITERATIONS {
        let mut changed = false;
        for (i, row) in data.iter().enumerate() {
            let mut best = 0usize;
            let mut best_dist = f64::MAX;
            for (c, centroid) in centroids.iter().enumerate() {
                let dist = squared_distance(row, centroid);
                if dist < best_dist {
                    best_dist = dist;
                    best = c;
                }
            }
            if labels[i] != best {
                labels[i] = best;
                changed = true;
            }
        }

        let width = data[0].len();
        let mut sums = vec![vec![0.0; width]; k];
        let mut counts = vec![0usize; k];
        for (row, &label) in data.iter().zip(labels.iter()) {
            counts[label] += 1;
            for (j, value) in row.iter().enumerate() {
                sums[label][j] += value;
            }
        }
        for (c, centroid) in centroids.iter_mut().enumerate() {
            if counts[c] > 0 {
                for (j, value) in centroid.iter_mut().enumerate() {
                    *value = sums[c][j] / counts[c] as f64;
                }
            }
        }

        if !changed {
            break;
        }
    }

    (centroids, labels.into_iter().map(Some).collect())
}

/// Density clustering. Noise rows get no label; centroids are cluster means
/// so nearest-centroid assignment still works for new tasks.
fn density(data: &[Vec<f64>], eps: f64, min_pts: usize) -> (Vec<Vec<f64>>, Vec<Option<usize>>) {
    let eps_sq = eps * eps;
    let n = data.len();
    let mut labels: Vec<Option<usize>> = vec![None; n];
    let mut visited = vec![false; n];
    let mut cluster = 0usize;

    let neighbors = |i: usize| -> Vec<usize> {
        (0..n)
            .filter(|&j| squared_distance(&data[i], &data[j]) <= eps_sq)
            .collect()
    };

    for i in 0..n {
        if visited[i] {
            continue;
        }
        visited[i] = true;

        let seeds = neighbors(i);
        if seeds.len() < min_pts {
            continue;
        }

        labels[i] = Some(cluster);
        let mut queue = seeds;
        while let Some(j) = queue.pop() {
            if labels[j].is_none() {
                labels[j] = Some(cluster);
            }
            if !visited[j] {
                visited[j] = true;
                let expansion = neighbors(j);
                if expansion.len() >= min_pts {
                    queue.extend(expansion);
                }
            }
        }
        cluster += 1;
    }

    let width = data.first().map(|r| r.len()).unwrap_or(0);
    let mut centroids = vec![vec![0.0; width]; cluster];
    let mut counts = vec![0usize; cluster];
    for (row, label) in data.iter().zip(labels.iter()) {
        if let Some(c) = label {
            counts[*c] += 1;
            for (j, value) in row.iter().enumerate() {
                centroids[*c][j] += value;
            }
        }
    }
    for (c, centroid) in centroids.iter_mut().enumerate() {
        if counts[c] > 0 {
            for value in centroid.iter_mut() {
                *value /= counts[c] as f64;
            }
        }
    }

    (centroids, labels)
}
