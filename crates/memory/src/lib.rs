//! Conversation memory and knowledge storage for agentloop.
//!
//! - [`WindowedChatMemory`]: bounded history with archived tool turns
//! - [`InMemoryVectorStore`]: the archive and knowledge store
//! - [`InMemoryChatRepository`] / [`SqliteChatRepository`]: repository tier
//! - [`SqliteArchiveStore`]: durable archive tier beside the SQLite repository
//! - [`KnowledgeRetriever`] and [`TokenTextSplitter`] for retrieval and ingestion

pub mod repository;
pub mod retriever;
pub mod splitter;
pub mod vector;
pub mod vector_store;
pub mod window;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use repository::InMemoryChatRepository;
pub use retriever::KnowledgeRetriever;
pub use splitter::TokenTextSplitter;
pub use vector::{cosine_similarity, lexical_similarity};
pub use vector_store::InMemoryVectorStore;
pub use window::{classify, Tier, WindowedChatMemory, WindowedChatMemoryBuilder};

#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteArchiveStore, SqliteChatRepository};
