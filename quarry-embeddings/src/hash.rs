use crate::error::Result;
use crate::{normalize, Embedder};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Deterministic feature-hashing embedder.
///
/// Maps word tokens into a fixed number of buckets via SHA-256 and counts
/// occurrences, so identical texts always produce identical vectors and
/// overlapping vocabularies produce correlated ones. No model download, no
/// network. Useful as a stand-in provider in tests and offline environments.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text.split_whitespace() {
            let lowered = token.to_lowercase();
            let digest = Sha256::digest(lowered.as_bytes());
            let bucket = u64::from_le_bytes(digest[..8].try_into().unwrap_or([0; 8]));
            let slot = (bucket % self.dimension as u64) as usize;
            // Sign bit from a second hash byte reduces bucket collisions
            // cancelling each other out.
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign;
        }
        normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dim(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hash"
    }
}
