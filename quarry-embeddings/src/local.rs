use crate::error::{EmbeddingError, Result};
use crate::{normalize, Embedder};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use log::info;
use std::sync::{Arc, Mutex};

/// Output dimension of the shipped local model (all-MiniLM-L6-v2).
pub const LOCAL_EMBEDDING_DIM: usize = 384;

const LOCAL_BATCH_SIZE: usize = 32;

/// In-process embedding provider. Used when no remote endpoint is configured
/// or the remote endpoint cannot be constructed.
pub struct LocalEmbedder {
    model: Arc<Mutex<TextEmbedding>>,
}

impl LocalEmbedder {
    pub fn new() -> Result<Self> {
        info!("initializing local embedding model (all-MiniLM-L6-v2)");
        let options = InitOptions::new(EmbeddingModel::AllMiniLML6V2);
        let model = TextEmbedding::try_new(options)
            .map_err(|e| EmbeddingError::ModelInitialization(e.to_string()))?;
        Ok(Self {
            model: Arc::new(Mutex::new(model)),
        })
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = self.model.clone();
        let texts = texts.to_vec();
        let vectors = tokio::task::spawn_blocking(move || {
            let mut guard = match model.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.embed(texts, Some(LOCAL_BATCH_SIZE))
        })
        .await
        .map_err(|e| EmbeddingError::Transient(format!("embedding task panicked: {e}")))?
        .map_err(|e| EmbeddingError::Transient(e.to_string()))?;

        let mut out = Vec::with_capacity(vectors.len());
        for mut vector in vectors {
            if vector.len() != LOCAL_EMBEDDING_DIM {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: LOCAL_EMBEDDING_DIM,
                    actual: vector.len(),
                });
            }
            normalize(&mut vector);
            out.push(vector);
        }
        Ok(out)
    }

    fn dim(&self) -> usize {
        LOCAL_EMBEDDING_DIM
    }

    fn name(&self) -> &str {
        "all-MiniLM-L6-v2"
    }
}
