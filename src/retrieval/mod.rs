//! Policy retrieval substrate: embeddings plus a persistent vector index.
//!
//! Policies are indexed one document per rule. Similarity is cosine. The
//! index is read-mostly (stage queries) with exclusive writers (the ingest
//! pathway, which clears and bulk-upserts).

pub mod embedder;
pub mod ingest;
pub mod sqlite;

use async_trait::async_trait;
use miette::Diagnostic;
use parking_lot::RwLock;
use std::sync::Arc;
use thiserror::Error;

pub use embedder::{Embedder, HashEmbedder, HttpEmbedder};
pub use sqlite::SqlitePolicyIndex;

/// One indexed policy rule.
///
/// `doc_id` is `"{policy_id}:{version}:{chunk_id}"`; `content` is the rule
/// text the hint scanner reads.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PolicyDocument {
    pub doc_id: String,
    pub content: String,
    pub policy_id: String,
    pub version: String,
    pub chunk_id: String,
}

impl PolicyDocument {
    /// Build the document for one rule, always a single chunk.
    #[must_use]
    pub fn from_rule(
        policy_id: impl Into<String>,
        version: impl Into<String>,
        rule: impl Into<String>,
    ) -> Self {
        let policy_id = policy_id.into();
        let version = version.into();
        Self {
            doc_id: format!("{policy_id}:{version}:1"),
            content: rule.into(),
            policy_id,
            version,
            chunk_id: "1".to_string(),
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum RetrievalError {
    #[error("embedding failure: {message}")]
    #[diagnostic(
        code(fraudgraph::retrieval::embedding),
        help("Check the embeddings provider configuration and credentials.")
    )]
    Embedding { message: String },

    #[error("vector store failure during {operation}: {message}")]
    #[diagnostic(code(fraudgraph::retrieval::storage))]
    Storage { operation: String, message: String },
}

/// Persistent approximate-nearest-neighbor index over policy rules.
#[async_trait]
pub trait PolicyIndex: Send + Sync {
    /// Insert or replace documents by `doc_id`.
    async fn upsert(&self, docs: Vec<PolicyDocument>) -> Result<(), RetrievalError>;

    /// Top-`top_k` documents by cosine similarity to `text`, best first.
    async fn query(
        &self,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<(PolicyDocument, f32)>, RetrievalError>;

    /// Administrative wipe of every vector in the collection.
    async fn clear(&self) -> Result<(), RetrievalError>;

    async fn count(&self) -> Result<usize, RetrievalError>;
}

/// Exact-scan in-memory index. Deterministic with [`HashEmbedder`]; used by
/// tests and local runs without a database file.
pub struct InMemoryPolicyIndex {
    embedder: Arc<dyn Embedder>,
    rows: RwLock<Vec<(PolicyDocument, Vec<f32>)>>,
}

impl InMemoryPolicyIndex {
    #[must_use]
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            rows: RwLock::new(Vec::new()),
        }
    }
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl PolicyIndex for InMemoryPolicyIndex {
    async fn upsert(&self, docs: Vec<PolicyDocument>) -> Result<(), RetrievalError> {
        if docs.is_empty() {
            return Ok(());
        }
        let texts: Vec<String> = docs.iter().map(|d| d.content.clone()).collect();
        let embeddings = self.embedder.embed(&texts).await?;
        let mut rows = self.rows.write();
        for (doc, embedding) in docs.into_iter().zip(embeddings) {
            if let Some(row) = rows.iter_mut().find(|(d, _)| d.doc_id == doc.doc_id) {
                *row = (doc, embedding);
            } else {
                rows.push((doc, embedding));
            }
        }
        Ok(())
    }

    async fn query(
        &self,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<(PolicyDocument, f32)>, RetrievalError> {
        let query = self
            .embedder
            .embed(std::slice::from_ref(&text.to_string()))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RetrievalError::Embedding {
                message: "embedder returned no vector for the query".into(),
            })?;
        let rows = self.rows.read();
        let mut scored: Vec<(PolicyDocument, f32)> = rows
            .iter()
            .map(|(doc, embedding)| (doc.clone(), cosine_similarity(&query, embedding)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn clear(&self) -> Result<(), RetrievalError> {
        self.rows.write().clear();
        Ok(())
    }

    async fn count(&self) -> Result<usize, RetrievalError> {
        Ok(self.rows.read().len())
    }
}
