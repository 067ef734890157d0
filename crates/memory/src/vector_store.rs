//! In-memory vector store.
//!
//! Holds documents in insertion order. Scores queries with embedding cosine
//! similarity when an embedding provider is attached, and with lexical
//! similarity otherwise. Tag-only lookups score every matching document 1.0,
//! so they come back in insertion order.

use crate::vector::{cosine_similarity, lexical_similarity};
use async_trait::async_trait;
use agentloop_core::error::RetrievalError;
use agentloop_core::memory::{Document, SearchRequest, VectorStore};
use agentloop_core::provider::{EmbeddingRequest, Provider};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

struct StoredDocument {
    /// Monotonic insertion sequence; breaks score ties
    seq: u64,
    document: Document,
    embedding: Option<Vec<f32>>,
}

#[derive(Default)]
struct Inner {
    documents: Vec<StoredDocument>,
    next_seq: u64,
}

struct Embedder {
    provider: Arc<dyn Provider>,
    model: String,
}

/// A vector store kept entirely in process memory.
pub struct InMemoryVectorStore {
    inner: Arc<RwLock<Inner>>,
    embedder: Option<Embedder>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            embedder: None,
        }
    }

    /// Score queries by embedding similarity using `provider`'s embedding endpoint.
    pub fn with_embeddings(mut self, provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        self.embedder = Some(Embedder {
            provider,
            model: model.into(),
        });
        self
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.documents.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn embed(&self, inputs: Vec<String>) -> Result<Option<Vec<Vec<f32>>>, RetrievalError> {
        let Some(embedder) = &self.embedder else {
            return Ok(None);
        };
        if inputs.is_empty() {
            return Ok(Some(Vec::new()));
        }
        let expected = inputs.len();
        let response = embedder
            .provider
            .embed(EmbeddingRequest {
                model: embedder.model.clone(),
                inputs,
            })
            .await
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        if response.embeddings.len() != expected {
            return Err(RetrievalError::Embedding(format!(
                "expected {expected} embeddings, got {}",
                response.embeddings.len()
            )));
        }
        Ok(Some(response.embeddings))
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn add(&self, documents: Vec<Document>) -> Result<(), RetrievalError> {
        if documents.is_empty() {
            return Ok(());
        }

        // Empty texts (tool-call turns) are only ever found by tag, so skip embedding them.
        let to_embed: Vec<(usize, String)> = documents
            .iter()
            .enumerate()
            .filter(|(_, d)| !d.text.trim().is_empty())
            .map(|(i, d)| (i, d.text.clone()))
            .collect();
        let (positions, texts): (Vec<usize>, Vec<String>) = to_embed.into_iter().unzip();
        let mut embeddings: Vec<Option<Vec<f32>>> = vec![None; documents.len()];
        if let Some(vectors) = self.embed(texts).await? {
            for (pos, vector) in positions.into_iter().zip(vectors) {
                embeddings[pos] = Some(vector);
            }
        }

        let mut inner = self.inner.write().await;
        let count = documents.len();
        for (mut document, embedding) in documents.into_iter().zip(embeddings) {
            if document.id.is_empty() {
                document.id = uuid::Uuid::new_v4().to_string();
            }
            document.score = None;
            if let Some(existing) = inner
                .documents
                .iter_mut()
                .find(|s| s.document.id == document.id)
            {
                existing.document = document;
                existing.embedding = embedding;
                continue;
            }
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.documents.push(StoredDocument {
                seq,
                document,
                embedding,
            });
        }

        debug!(count, total = inner.documents.len(), "Added documents to vector store");
        Ok(())
    }

    async fn similarity_search(&self, request: SearchRequest) -> Result<Vec<Document>, RetrievalError> {
        let query_embedding = match request.query.as_deref() {
            Some(q) if self.embedder.is_some() => self
                .embed(vec![q.to_string()])
                .await?
                .and_then(|mut v| v.pop()),
            _ => None,
        };

        let inner = self.inner.read().await;
        let mut scored: Vec<(f64, u64, &Document)> = inner
            .documents
            .iter()
            .filter(|s| {
                request
                    .filter
                    .as_ref()
                    .is_none_or(|f| f.matches(&s.document.metadata))
            })
            .map(|s| {
                let score = match (&request.query, &query_embedding) {
                    (None, _) => 1.0,
                    (Some(_), Some(q)) => s
                        .embedding
                        .as_deref()
                        .map(|e| f64::from(cosine_similarity(e, q)))
                        .unwrap_or(0.0),
                    (Some(q), None) => lexical_similarity(q, &s.document.text),
                };
                (score, s.seq, &s.document)
            })
            .filter(|(score, _, _)| *score >= request.similarity_threshold)
            .collect();

        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        if let Some(top_k) = request.top_k {
            scored.truncate(top_k);
        }

        Ok(scored
            .into_iter()
            .map(|(score, _, doc)| {
                let mut doc = doc.clone();
                doc.score = Some(score);
                doc
            })
            .collect())
    }

    async fn delete(&self, ids: &[String]) -> Result<usize, RetrievalError> {
        let mut inner = self.inner.write().await;
        let before = inner.documents.len();
        inner.documents.retain(|s| !ids.contains(&s.document.id));
        Ok(before - inner.documents.len())
    }
}
