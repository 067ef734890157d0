//! SQLite repository and archive tiers.
//!
//! `chat_messages` is keyed by `(conversation_id, position)`. Tool calls,
//! tool responses and metadata are stored as JSON text, and `save_all`
//! replaces a conversation's rows inside one transaction.
//!
//! `archived_documents` backs [`SqliteArchiveStore`], which keeps archived
//! tool turns in the same database so they survive a restart with the rest
//! of the history.

use async_trait::async_trait;
use chrono::Utc;
use crate::vector::lexical_similarity;
use agentloop_core::error::{RetrievalError, StorageError};
use agentloop_core::memory::{ChatMemoryRepository, Document, SearchRequest, VectorStore};
use agentloop_core::message::{Message, Role};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// Durable repository tier backed by a SQLite database.
pub struct SqliteChatRepository {
    pool: SqlitePool,
}

impl SqliteChatRepository {
    /// Open (or create) the database at `path`.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database.
    pub async fn new(path: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StorageError::Repository(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // Every connection to an in-memory database sees its own empty database.
        let max_connections = if path.contains(":memory:") { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Repository(format!("Failed to open SQLite: {e}")))?;

        let repository = Self { pool };
        repository.run_migrations().await?;
        info!("SQLite chat repository initialized at {path}");
        Ok(repository)
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StorageError> {
        let repository = Self { pool };
        repository.run_migrations().await?;
        Ok(repository)
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_messages (
                conversation_id TEXT NOT NULL,
                position        INTEGER NOT NULL,
                role            TEXT NOT NULL,
                content         TEXT NOT NULL,
                tool_calls      TEXT NOT NULL DEFAULT '[]',
                tool_responses  TEXT NOT NULL DEFAULT '[]',
                metadata        TEXT NOT NULL DEFAULT '{}',
                created_at      TEXT NOT NULL,
                PRIMARY KEY (conversation_id, position)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Repository(format!("chat_messages table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS archived_documents (
                seq       INTEGER PRIMARY KEY AUTOINCREMENT,
                id        TEXT NOT NULL UNIQUE,
                text      TEXT NOT NULL,
                metadata  TEXT NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Repository(format!("archived_documents table: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    /// An archive tier stored in the same database.
    pub fn archive(&self) -> SqliteArchiveStore {
        SqliteArchiveStore {
            pool: self.pool.clone(),
        }
    }

    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message, StorageError> {
        let column = |name: &str, e: sqlx::Error| StorageError::Repository(format!("{name} column: {e}"));

        let role: String = row.try_get("role").map_err(|e| column("role", e))?;
        let content: String = row.try_get("content").map_err(|e| column("content", e))?;
        let tool_calls: String = row.try_get("tool_calls").map_err(|e| column("tool_calls", e))?;
        let tool_responses: String = row
            .try_get("tool_responses")
            .map_err(|e| column("tool_responses", e))?;
        let metadata: String = row.try_get("metadata").map_err(|e| column("metadata", e))?;

        let codec = |e: serde_json::Error| StorageError::Codec(e.to_string());
        Ok(Message {
            role: Role::from_message_type(&role)
                .ok_or_else(|| StorageError::Codec(format!("unknown role {role}")))?,
            content,
            tool_calls: serde_json::from_str(&tool_calls).map_err(codec)?,
            tool_responses: serde_json::from_str(&tool_responses).map_err(codec)?,
            metadata: serde_json::from_str(&metadata).map_err(codec)?,
        })
    }
}

#[async_trait]
impl ChatMemoryRepository for SqliteChatRepository {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn find_conversation_ids(&self) -> Result<Vec<String>, StorageError> {
        let rows = sqlx::query(
            "SELECT DISTINCT conversation_id FROM chat_messages ORDER BY conversation_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Repository(format!("SELECT failed: {e}")))?;

        rows.iter()
            .map(|row| {
                row.try_get("conversation_id")
                    .map_err(|e| StorageError::Repository(format!("conversation_id column: {e}")))
            })
            .collect()
    }

    async fn find_by_conversation_id(&self, conversation_id: &str) -> Result<Vec<Message>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM chat_messages WHERE conversation_id = ?1 ORDER BY position ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Repository(format!("SELECT failed: {e}")))?;

        rows.iter().map(Self::row_to_message).collect()
    }

    async fn save_all(&self, conversation_id: &str, messages: &[Message]) -> Result<(), StorageError> {
        let codec = |e: serde_json::Error| StorageError::Codec(e.to_string());
        let now = Utc::now().to_rfc3339();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Repository(format!("BEGIN failed: {e}")))?;

        sqlx::query("DELETE FROM chat_messages WHERE conversation_id = ?1")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Repository(format!("DELETE failed: {e}")))?;

        for (position, message) in messages.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO chat_messages
                    (conversation_id, position, role, content, tool_calls, tool_responses, metadata, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(conversation_id)
            .bind(position as i64)
            .bind(message.role.message_type())
            .bind(&message.content)
            .bind(serde_json::to_string(&message.tool_calls).map_err(codec)?)
            .bind(serde_json::to_string(&message.tool_responses).map_err(codec)?)
            .bind(serde_json::to_string(&message.metadata).map_err(codec)?)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Repository(format!("INSERT failed: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::Repository(format!("COMMIT failed: {e}")))?;

        debug!(conversation_id, count = messages.len(), "Saved conversation window");
        Ok(())
    }

    async fn delete_by_conversation_id(&self, conversation_id: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM chat_messages WHERE conversation_id = ?1")
            .bind(conversation_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Repository(format!("DELETE failed: {e}")))?;
        Ok(())
    }
}

/// Durable archive tier. Queries are scored lexically; tag-only lookups
/// score 1.0 and come back in insertion order.
#[derive(Clone)]
pub struct SqliteArchiveStore {
    pool: SqlitePool,
}

fn backend(e: sqlx::Error) -> RetrievalError {
    RetrievalError::Backend(e.to_string())
}

#[async_trait]
impl VectorStore for SqliteArchiveStore {
    fn name(&self) -> &str {
        "sqlite_archive"
    }

    async fn add(&self, documents: Vec<Document>) -> Result<(), RetrievalError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        for document in &documents {
            let metadata = serde_json::to_string(&document.metadata)
                .map_err(|e| RetrievalError::Backend(e.to_string()))?;
            // Upsert keeps `seq`, so a re-tagged turn keeps its insertion order.
            sqlx::query(
                r#"
                INSERT INTO archived_documents (id, text, metadata) VALUES (?1, ?2, ?3)
                ON CONFLICT(id) DO UPDATE SET text = excluded.text, metadata = excluded.metadata
                "#,
            )
            .bind(&document.id)
            .bind(&document.text)
            .bind(metadata)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }
        tx.commit().await.map_err(backend)?;
        debug!(count = documents.len(), "Archived documents");
        Ok(())
    }

    async fn similarity_search(&self, request: SearchRequest) -> Result<Vec<Document>, RetrievalError> {
        let rows = sqlx::query("SELECT id, text, metadata FROM archived_documents ORDER BY seq ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        let mut scored = Vec::new();
        for row in &rows {
            let metadata: String = row.try_get("metadata").map_err(backend)?;
            let metadata: serde_json::Map<String, serde_json::Value> =
                serde_json::from_str(&metadata).map_err(|e| RetrievalError::Backend(e.to_string()))?;
            if !request.filter.as_ref().is_none_or(|f| f.matches(&metadata)) {
                continue;
            }
            let text: String = row.try_get("text").map_err(backend)?;
            let score = request
                .query
                .as_deref()
                .map_or(1.0, |q| lexical_similarity(q, &text));
            if score < request.similarity_threshold {
                continue;
            }
            scored.push(Document {
                id: row.try_get("id").map_err(backend)?,
                text,
                metadata,
                score: Some(score),
            });
        }

        // Stable: ties keep insertion order.
        scored.sort_by(|a, b| b.score.unwrap_or_default().total_cmp(&a.score.unwrap_or_default()));
        if let Some(top_k) = request.top_k {
            scored.truncate(top_k);
        }
        Ok(scored)
    }

    async fn delete(&self, ids: &[String]) -> Result<usize, RetrievalError> {
        let mut removed = 0;
        for id in ids {
            let result = sqlx::query("DELETE FROM archived_documents WHERE id = ?1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(backend)?;
            removed += result.rows_affected() as usize;
        }
        Ok(removed)
    }
}
