//! # Quarry Embeddings
//!
//! Embedding providers for semantic code retrieval.
//!
//! Two modes, chosen at startup: a remote OpenAI-compatible endpoint
//! (preferred) and an in-process fastembed model used when no remote
//! credentials are configured. The two modes produce vectors of different
//! dimensions and are not interchangeable; a project's dimension is frozen
//! when its vector index is created.
//!
//! All vectors leave this crate L2-unit-normalized, so inner product equals
//! cosine similarity downstream.

mod error;
mod hash;
mod local;
mod remote;

pub use error::EmbeddingError;
pub use hash::HashEmbedder;
pub use local::LocalEmbedder;
pub use local::LOCAL_EMBEDDING_DIM;
pub use remote::RemoteConfig;
pub use remote::RemoteEmbedder;
pub use remote::REMOTE_BATCH_SIZE;

use async_trait::async_trait;

/// An embedding provider.
///
/// Implementations must return one vector per input text, each of dimension
/// `dim()` and unit length.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Fixed output dimension of this provider.
    fn dim(&self) -> usize;

    /// Short provider name for logs and status output.
    fn name(&self) -> &str;
}

/// Scale a vector to unit L2 norm in place. Zero vectors are left unchanged.
pub fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Dot product of two equal-length vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_produces_unit_length() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_leaves_zero_vector_alone() {
        let mut v = vec![0.0, 0.0, 0.0];
        normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn dot_of_unit_vectors_is_cosine() {
        let mut a = vec![1.0, 1.0];
        let mut b = vec![1.0, 0.0];
        normalize(&mut a);
        normalize(&mut b);
        let cos = dot(&a, &b);
        assert!((cos - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }
}
