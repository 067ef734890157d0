//! Storage traits: the two tiers conversation memory is built on.
//!
//! - [`ChatMemoryRepository`]: cheap, ordered storage of ordinary turns.
//! - [`VectorStore`]: similarity search over [`Document`]s, also used as a
//!   tag-addressable archive for tool-call and tool-result turns.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use crate::error::{RetrievalError, StorageError};
use crate::message::Message;

/// A unit of retrievable text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique ID, assigned on creation
    pub id: String,

    /// The text that is embedded and searched
    pub text: String,

    /// Arbitrary metadata; filters match against it
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,

    /// Similarity score, set by search operations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.into(),
            metadata: Map::new(),
            score: None,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Exact-match predicate on one metadata key: `key == value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub key: String,
    pub value: Value,
}

impl MetadataFilter {
    pub fn eq(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, metadata: &Map<String, Value>) -> bool {
        metadata.get(&self.key) == Some(&self.value)
    }
}

impl std::fmt::Display for MetadataFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} == {}", self.key, self.value)
    }
}

/// A similarity search: a semantic query, a tag filter, or both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Text to compare against; `None` means every filtered document matches fully
    #[serde(default)]
    pub query: Option<String>,

    /// Restrict results to documents whose metadata matches
    #[serde(default)]
    pub filter: Option<MetadataFilter>,

    /// Minimum score in `[0, 1]` a document needs to be returned
    #[serde(default)]
    pub similarity_threshold: f64,

    /// Maximum number of results; `None` returns all matches
    #[serde(default)]
    pub top_k: Option<usize>,
}

impl SearchRequest {
    /// Semantic search for `query`.
    pub fn query(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            filter: None,
            similarity_threshold: 0.0,
            top_k: Some(4),
        }
    }

    /// Tag lookup: every document matching `filter`.
    pub fn tagged(filter: MetadataFilter) -> Self {
        Self {
            query: None,
            filter: Some(filter),
            similarity_threshold: 0.0,
            top_k: None,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }
}

/// The vector store contract.
///
/// `similarity_search` returns documents ordered by descending score; equal
/// scores keep insertion order.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// The backend name (e.g., "in_memory").
    fn name(&self) -> &str;

    /// Store documents.
    async fn add(&self, documents: Vec<Document>) -> std::result::Result<(), RetrievalError>;

    /// Search documents.
    async fn similarity_search(
        &self,
        request: SearchRequest,
    ) -> std::result::Result<Vec<Document>, RetrievalError>;

    /// Delete documents by ID, returning how many were removed.
    async fn delete(&self, ids: &[String]) -> std::result::Result<usize, RetrievalError>;
}

/// The repository tier contract.
#[async_trait]
pub trait ChatMemoryRepository: Send + Sync {
    /// The backend name (e.g., "in_memory", "sqlite").
    fn name(&self) -> &str;

    /// Every conversation id with stored turns.
    async fn find_conversation_ids(&self) -> std::result::Result<Vec<String>, StorageError>;

    /// Stored turns of one conversation, in order. Unknown ids yield an empty list.
    async fn find_by_conversation_id(
        &self,
        conversation_id: &str,
    ) -> std::result::Result<Vec<Message>, StorageError>;

    /// Replace the stored turns of one conversation.
    async fn save_all(
        &self,
        conversation_id: &str,
        messages: &[Message],
    ) -> std::result::Result<(), StorageError>;

    async fn delete_by_conversation_id(
        &self,
        conversation_id: &str,
    ) -> std::result::Result<(), StorageError>;
}
