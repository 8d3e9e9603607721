use crate::error::{EmbeddingError, Result};
use crate::{normalize, Embedder};
use async_trait::async_trait;
use log::{debug, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Maximum number of texts per HTTP request.
pub const REMOTE_BATCH_SIZE: usize = 64;

const MAX_RETRIES: u32 = 3;
const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_FACTOR: u64 = 2;
const BACKOFF_JITTER: f64 = 0.2;

/// Connection settings for an OpenAI-compatible embeddings endpoint.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: String,
    pub dimension: usize,
    pub timeout: Duration,
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

/// Remote embedding provider speaking the OpenAI embeddings API shape.
pub struct RemoteEmbedder {
    http: reqwest::Client,
    config: RemoteConfig,
}

impl RemoteEmbedder {
    pub fn new(config: RemoteConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(EmbeddingError::MissingCredentials);
        }
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| EmbeddingError::Transient(e.to_string()))?;
        Ok(Self { http, config })
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut attempt = 0u32;
        loop {
            match self.request_once(batch).await {
                Ok(vectors) => return Ok(vectors),
                Err(err) if err.is_transient() && attempt < MAX_RETRIES => {
                    let delay = backoff_delay(attempt);
                    warn!(
                        "embedding request failed ({err}), retry {} of {MAX_RETRIES} in {delay:?}",
                        attempt + 1
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn request_once(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.config.endpoint.trim_end_matches('/'));
        let body = EmbeddingsRequest {
            model: &self.config.model,
            input: batch,
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbeddingError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(EmbeddingError::Transient(format!("server error: {status}")));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Rejected(format!("{status}: {text}")));
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Rejected(e.to_string()))?;

        if parsed.data.len() != batch.len() {
            return Err(EmbeddingError::Rejected(format!(
                "expected {} embeddings, got {}",
                batch.len(),
                parsed.data.len()
            )));
        }

        let mut vectors = Vec::with_capacity(parsed.data.len());
        for row in parsed.data {
            if row.embedding.len() != self.config.dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.config.dimension,
                    actual: row.embedding.len(),
                });
            }
            let mut vector = row.embedding;
            normalize(&mut vector);
            vectors.push(vector);
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!("embedding {} texts via {}", texts.len(), self.config.model);

        let mut all = Vec::with_capacity(texts.len());
        for batch in texts.chunks(REMOTE_BATCH_SIZE) {
            let vectors = self.embed_batch(batch).await?;
            all.extend(vectors);
        }
        Ok(all)
    }

    fn dim(&self) -> usize {
        self.config.dimension
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let base = BACKOFF_BASE_MS * BACKOFF_FACTOR.pow(attempt);
    let jitter = rand::rng().random_range(-BACKOFF_JITTER..BACKOFF_JITTER);
    let millis = (base as f64 * (1.0 + jitter)).max(0.0) as u64;
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_api_key_is_rejected_at_construction() {
        let config = RemoteConfig {
            endpoint: "http://localhost:9999/v1".to_string(),
            model: "test-embed".to_string(),
            api_key: String::new(),
            dimension: 8,
            timeout: Duration::from_secs(5),
        };
        assert!(matches!(
            RemoteEmbedder::new(config),
            Err(EmbeddingError::MissingCredentials)
        ));
    }

    #[test]
    fn backoff_grows_with_attempts() {
        let first = backoff_delay(0);
        let third = backoff_delay(2);
        // 500ms * 4 = 2000ms nominal for the third attempt; jitter is ±20%.
        assert!(first < Duration::from_millis(700));
        assert!(third > Duration::from_millis(1500));
    }
}
