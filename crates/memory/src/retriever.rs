//! Knowledge retrieval for user-message augmentation.

use agentloop_core::error::RetrievalError;
use agentloop_core::memory::{Document, SearchRequest, VectorStore};
use std::sync::Arc;
use tracing::{debug, warn};

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.8;
pub const DEFAULT_TOP_K: usize = 5;

/// Looks up documents similar to a query in the knowledge vector store.
#[derive(Clone)]
pub struct KnowledgeRetriever {
    store: Arc<dyn VectorStore>,
    similarity_threshold: f64,
    top_k: usize,
}

impl KnowledgeRetriever {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self {
            store,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Documents ordered by descending similarity.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<Document>, RetrievalError> {
        let request = SearchRequest::query(query)
            .with_threshold(self.similarity_threshold)
            .with_top_k(self.top_k);
        let documents = self.store.similarity_search(request).await?;
        debug!(hits = documents.len(), "Knowledge retrieval complete");
        Ok(documents)
    }

    /// The user message text, prefixed with any retrieved knowledge.
    ///
    /// Retrieval failures degrade to no augmentation.
    pub async fn augment(&self, message: &str) -> String {
        match self.retrieve(message).await {
            Ok(documents) => format_augmented(&documents, message),
            Err(e) => {
                warn!(error = %e, "Knowledge retrieval failed, continuing without context");
                message.to_string()
            }
        }
    }
}

pub fn format_augmented(documents: &[Document], message: &str) -> String {
    if documents.is_empty() {
        return message.to_string();
    }
    let knowledge = documents
        .iter()
        .map(|d| d.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("{knowledge}\n\n{message}")
}
