//! Opaque text generation seam.
//!
//! Provider adapters live outside the core; agents only see this trait. The
//! canned generator keeps single-process deployments and tests
//! deterministic.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct Generation {
    pub content: String,
    pub confidence: f64,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<Generation>;

    /// Streamed variant: chunks go to the sink as they are produced, and
    /// the full generation is returned at the end. The default produces a
    /// single chunk.
    async fn generate_streaming(
        &self,
        prompt: &str,
        chunks: mpsc::Sender<String>,
    ) -> Result<Generation> {
        let generation = self.generate(prompt).await?;
        let _ = chunks.send(generation.content.clone()).await;
        Ok(generation)
    }
}

/// Deterministic stand-in generator. Produces a fixed-shape answer derived
/// from the prompt and streams it word by word.
pub struct CannedGenerator {
    prefix: String,
    confidence: f64,
}

impl CannedGenerator {
    pub fn new(prefix: impl Into<String>, confidence: f64) -> Self {
        Self {
            prefix: prefix.into(),
            confidence,
        }
    }
}

impl Default for CannedGenerator {
    fn default() -> Self {
        Self::new("Response:", 0.95)
    }
}

#[async_trait]
impl TextGenerator for CannedGenerator {
    async fn generate(&self, prompt: &str) -> Result<Generation> {
        // A tag derived from the full prompt keeps distinct inputs mapping
        // to distinct outputs, the way a real generator would.
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        prompt.hash(&mut hasher);
        let tag = format!("{:08x}", hasher.finish() as u32);

        let words: Vec<&str> = prompt.split_whitespace().collect();
        let tail = words[words.len().saturating_sub(12)..].join(" ");

        Ok(Generation {
            content: format!("{} [{}] {}", self.prefix, tag, tail),
            confidence: self.confidence,
        })
    }

    async fn generate_streaming(
        &self,
        prompt: &str,
        chunks: mpsc::Sender<String>,
    ) -> Result<Generation> {
        let generation = self.generate(prompt).await?;
        let words: Vec<&str> = generation.content.split_inclusive(' ').collect();
        for word in words {
            if chunks.send(word.to_string()).await.is_err() {
                break;
            }
        }
        Ok(generation)
    }
}
