//! Text embedders backing the policy index.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::time::Duration;

use super::RetrievalError;

/// Maps text to fixed-dimension vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError>;

    fn dimension(&self) -> usize;
}

/// Deterministic offline embedder.
///
/// Expands the SHA-256 digest of the text to the target dimension and scales
/// each byte into `[-1, 1]`. Identical text always produces the identical
/// vector, which keeps retrieval reproducible without a model provider.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        digest
            .iter()
            .cycle()
            .take(self.dimension)
            .map(|&byte| (f32::from(byte) / 127.5) - 1.0)
            .collect()
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Hosted embedding provider speaking the common `{model, input}` JSON shape
/// with bearer-token auth.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimension: usize,
}

#[derive(serde::Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(serde::Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(serde::Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
    ) -> Result<Self, RetrievalError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| RetrievalError::Embedding {
                message: err.to_string(),
            })?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            dimension,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| RetrievalError::Embedding {
                message: err.to_string(),
            })?;
        let body: EmbeddingResponse =
            response
                .json()
                .await
                .map_err(|err| RetrievalError::Embedding {
                    message: err.to_string(),
                })?;
        if body.data.len() != texts.len() {
            return Err(RetrievalError::Embedding {
                message: format!(
                    "provider returned {} vectors for {} inputs",
                    body.data.len(),
                    texts.len()
                ),
            });
        }
        Ok(body.data.into_iter().map(|row| row.embedding).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
