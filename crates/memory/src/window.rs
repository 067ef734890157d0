//! Windowed conversation memory.
//!
//! Text turns (system, user, assistant answers) live in a bounded
//! [`ChatMemoryRepository`]. Tool-call and tool-result turns are archived
//! in a [`VectorStore`], tagged with the conversation id and their current
//! position, and spliced back into place on read. Every save re-tags them,
//! so positions stay true after the window trims.

use crate::repository::InMemoryChatRepository;
use agentloop_core::error::{Error, Result, StorageError};
use agentloop_core::memory::{ChatMemoryRepository, Document, MetadataFilter, SearchRequest, VectorStore};
use agentloop_core::message::{
    Message, MessageToolCall, Role, ToolResponse, CONVERSATION_ID_KEY, ID_KEY, INDEX_KEY,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_MAX_MESSAGES: usize = 20;

/// Archive lookups are exact tag matches, so the threshold only needs to admit them.
pub const ARCHIVE_SIMILARITY_THRESHOLD: f64 = 0.7;

const MESSAGE_TYPE_KEY: &str = "messageType";
const TOOL_CALLS_KEY: &str = "toolCalls";
const TOOL_RESPONSES_KEY: &str = "toolResponses";

/// Where a turn is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Repository,
    Archive,
    /// Archived by an earlier save; carries the document `id`.
    AlreadyArchived,
}

pub fn classify(message: &Message) -> Tier {
    let archivable = match message.role {
        Role::System | Role::User => false,
        Role::Assistant => message.content.is_empty(),
        Role::Tool => true,
    };
    match (archivable, message.metadata.contains_key(ID_KEY)) {
        (false, _) => Tier::Repository,
        (true, false) => Tier::Archive,
        (true, true) => Tier::AlreadyArchived,
    }
}

/// Chat memory that caps the repository tier at `max_messages` and keeps
/// tool turns in a vector store.
pub struct WindowedChatMemory {
    repository: Arc<dyn ChatMemoryRepository>,
    store: Arc<dyn VectorStore>,
    max_messages: usize,
    archive_threshold: f64,
}

impl std::fmt::Debug for WindowedChatMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowedChatMemory")
            .field("repository", &self.repository.name())
            .field("store", &self.store.name())
            .field("max_messages", &self.max_messages)
            .finish()
    }
}

impl WindowedChatMemory {
    pub fn builder() -> WindowedChatMemoryBuilder {
        WindowedChatMemoryBuilder::default()
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    /// Append `messages` to the conversation, resetting on a new system
    /// message and trimming the oldest non-system turns past the window.
    pub async fn add(&self, conversation_id: &str, messages: Vec<Message>) -> Result<()> {
        validate_conversation_id(conversation_id)?;
        for message in &messages {
            message.validate().map_err(Error::InvalidArgument)?;
        }

        let history = self.get_all(conversation_id).await?;
        let before: Vec<String> = history.iter().filter_map(archived_id).collect();
        let processed = self.process(history, messages);
        let trimmed: Vec<String> = before
            .into_iter()
            .filter(|id| !processed.iter().any(|m| archived_id(m).as_ref() == Some(id)))
            .collect();
        self.save_all(conversation_id, processed, trimmed).await
    }

    /// The full ordered history, with archived tool turns restored in place.
    pub async fn get(&self, conversation_id: &str) -> Result<Vec<Message>> {
        validate_conversation_id(conversation_id)?;
        self.get_all(conversation_id).await
    }

    pub async fn clear(&self, conversation_id: &str) -> Result<()> {
        validate_conversation_id(conversation_id)?;
        Err(Error::Unsupported("clearing conversation memory".into()))
    }

    fn process(&self, history: Vec<Message>, new_messages: Vec<Message>) -> Vec<Message> {
        let has_new_system = new_messages
            .iter()
            .filter(|m| m.is_system())
            .any(|m| !history.contains(m));

        let mut processed: Vec<Message> = history
            .into_iter()
            .filter(|m| !(has_new_system && m.is_system()))
            .collect();
        processed.extend(new_messages);

        if processed.len() <= self.max_messages {
            return processed;
        }

        let mut to_remove = processed.len() - self.max_messages;
        processed.retain(|m| {
            if m.is_system() || to_remove == 0 {
                true
            } else {
                to_remove -= 1;
                false
            }
        });
        processed
    }

    async fn get_all(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let mut memory = self.repository.find_by_conversation_id(conversation_id).await?;

        let request = SearchRequest::tagged(MetadataFilter::eq(CONVERSATION_ID_KEY, conversation_id))
            .with_threshold(self.archive_threshold);
        let documents = self
            .store
            .similarity_search(request)
            .await
            .map_err(|e| StorageError::Archive(e.to_string()))?;

        let mut archived = documents
            .into_iter()
            .map(from_document)
            .collect::<std::result::Result<Vec<_>, StorageError>>()?;
        // Stable: equal indices keep the store's insertion order.
        archived.sort_by_key(|(index, _)| *index);

        for (index, message) in archived {
            let at = index.min(memory.len());
            memory.insert(at, message);
        }
        Ok(memory)
    }

    /// Persist the window. Every archived turn is re-tagged with its current
    /// position, and archived turns that fell out of the window are deleted.
    async fn save_all(
        &self,
        conversation_id: &str,
        messages: Vec<Message>,
        trimmed: Vec<String>,
    ) -> Result<()> {
        let mut chat_messages = Vec::new();
        let mut documents = Vec::new();

        for (index, mut message) in messages.into_iter().enumerate() {
            let tier = classify(&message);
            if tier == Tier::Repository {
                chat_messages.push(message);
                continue;
            }
            let existing = archived_id(&message);
            message.metadata.remove(ID_KEY);
            message
                .metadata
                .insert(CONVERSATION_ID_KEY.into(), conversation_id.into());
            message.metadata.insert(INDEX_KEY.into(), index.into());
            let mut document = to_document(&message)?;
            if let Some(id) = existing {
                // Same id: the store replaces the earlier entry.
                document.id = id;
            }
            documents.push(document);
        }

        debug!(
            conversation_id,
            window = chat_messages.len(),
            archived = documents.len(),
            trimmed = trimmed.len(),
            "Saving conversation memory"
        );

        self.repository.save_all(conversation_id, &chat_messages).await?;
        if !documents.is_empty() {
            self.store
                .add(documents)
                .await
                .map_err(|e| StorageError::Archive(e.to_string()))?;
        }
        if !trimmed.is_empty() {
            self.store
                .delete(&trimmed)
                .await
                .map_err(|e| StorageError::Archive(e.to_string()))?;
        }
        Ok(())
    }
}

/// The archive document id of a turn restored from the archive.
fn archived_id(message: &Message) -> Option<String> {
    if classify(message) != Tier::AlreadyArchived {
        return None;
    }
    message.metadata.get(ID_KEY).and_then(Value::as_str).map(String::from)
}

fn validate_conversation_id(conversation_id: &str) -> Result<()> {
    if conversation_id.trim().is_empty() {
        return Err(Error::invalid("conversationId cannot be null or empty"));
    }
    Ok(())
}

fn to_document(message: &Message) -> std::result::Result<Document, StorageError> {
    let mut metadata = message.metadata.clone();
    metadata.insert(MESSAGE_TYPE_KEY.into(), message.role.message_type().into());
    let encoded = match message.role {
        Role::Assistant => (TOOL_CALLS_KEY, serde_json::to_value(&message.tool_calls)),
        Role::Tool => (TOOL_RESPONSES_KEY, serde_json::to_value(&message.tool_responses)),
        role => {
            return Err(StorageError::Codec(format!("{role} turns are not archived")));
        }
    };
    let (key, value) = encoded;
    metadata.insert(key.into(), value.map_err(|e| StorageError::Codec(e.to_string()))?);

    let mut document = Document::new(message.content.clone());
    document.metadata = metadata;
    Ok(document)
}

fn from_document(document: Document) -> std::result::Result<(usize, Message), StorageError> {
    let Document {
        id, text, mut metadata, ..
    } = document;

    let index = metadata
        .remove(INDEX_KEY)
        .and_then(|v| v.as_u64())
        .ok_or_else(|| StorageError::Codec(format!("document {id} has no index")))? as usize;
    metadata.remove(CONVERSATION_ID_KEY);

    let role = metadata
        .remove(MESSAGE_TYPE_KEY)
        .as_ref()
        .and_then(Value::as_str)
        .and_then(Role::from_message_type)
        .ok_or_else(|| StorageError::Codec(format!("document {id} has no message type")))?;

    let mut message = match role {
        Role::Assistant => {
            let calls: Vec<MessageToolCall> = take_list(&mut metadata, TOOL_CALLS_KEY, &id)?;
            Message::tool_request(calls)
        }
        Role::Tool => {
            let responses: Vec<ToolResponse> = take_list(&mut metadata, TOOL_RESPONSES_KEY, &id)?;
            Message::tool_results(responses)
        }
        other => {
            return Err(StorageError::Codec(format!(
                "document {id} holds a {other} turn"
            )));
        }
    };
    message.content = text;
    metadata.insert(ID_KEY.into(), id.into());
    message.metadata = metadata;
    Ok((index, message))
}

fn take_list<T: serde::de::DeserializeOwned>(
    metadata: &mut Map<String, Value>,
    key: &str,
    id: &str,
) -> std::result::Result<Vec<T>, StorageError> {
    let value = metadata.remove(key).unwrap_or(Value::Array(Vec::new()));
    serde_json::from_value(value).map_err(|e| StorageError::Codec(format!("document {id}: {e}")))
}

/// Builder for [`WindowedChatMemory`]. The vector store is required; the
/// repository defaults to [`InMemoryChatRepository`].
pub struct WindowedChatMemoryBuilder {
    repository: Option<Arc<dyn ChatMemoryRepository>>,
    store: Option<Arc<dyn VectorStore>>,
    max_messages: usize,
    archive_threshold: f64,
}

impl Default for WindowedChatMemoryBuilder {
    fn default() -> Self {
        Self {
            repository: None,
            store: None,
            max_messages: DEFAULT_MAX_MESSAGES,
            archive_threshold: ARCHIVE_SIMILARITY_THRESHOLD,
        }
    }
}

impl WindowedChatMemoryBuilder {
    pub fn repository(mut self, repository: Arc<dyn ChatMemoryRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = max_messages;
        self
    }

    pub fn archive_threshold(mut self, threshold: f64) -> Self {
        self.archive_threshold = threshold;
        self
    }

    pub fn build(self) -> Result<WindowedChatMemory> {
        if self.max_messages == 0 {
            return Err(Error::invalid("maxMessages must be greater than 0"));
        }
        let store = self
            .store
            .ok_or_else(|| Error::invalid("vectorStore must be provided"))?;
        let repository = self
            .repository
            .unwrap_or_else(|| Arc::new(InMemoryChatRepository::new()));

        Ok(WindowedChatMemory {
            repository,
            store,
            max_messages: self.max_messages,
            archive_threshold: self.archive_threshold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::InMemoryVectorStore;
    use agentloop_core::error::RetrievalError;
    use agentloop_core::ErrorKind;
    use async_trait::async_trait;

    fn memory(max: usize) -> (WindowedChatMemory, Arc<InMemoryVectorStore>, Arc<InMemoryChatRepository>) {
        let store = Arc::new(InMemoryVectorStore::new());
        let repo = Arc::new(InMemoryChatRepository::new());
        let memory = WindowedChatMemory::builder()
            .repository(repo.clone())
            .vector_store(store.clone())
            .max_messages(max)
            .build()
            .unwrap();
        (memory, store, repo)
    }

    fn calculator_call() -> Message {
        Message::tool_request(vec![MessageToolCall::function(
            "call_1",
            "calculator",
            r#"{"expression":"2+2"}"#,
        )])
    }

    fn calculator_result() -> Message {
        Message::tool_results(vec![ToolResponse::new("call_1", "calculator", "4")])
    }

    struct BrokenStore;

    #[async_trait]
    impl VectorStore for BrokenStore {
        fn name(&self) -> &str {
            "broken"
        }

        async fn add(&self, _documents: Vec<Document>) -> std::result::Result<(), RetrievalError> {
            Err(RetrievalError::Backend("connection refused".into()))
        }

        async fn similarity_search(
            &self,
            _request: SearchRequest,
        ) -> std::result::Result<Vec<Document>, RetrievalError> {
            Err(RetrievalError::Backend("connection refused".into()))
        }

        async fn delete(&self, _ids: &[String]) -> std::result::Result<usize, RetrievalError> {
            Ok(0)
        }
    }

    #[test]
    fn classify_routes_turns_to_tiers() {
        assert_eq!(classify(&Message::system("rules")), Tier::Repository);
        assert_eq!(classify(&Message::user("hi")), Tier::Repository);
        assert_eq!(classify(&Message::assistant("answer")), Tier::Repository);
        assert_eq!(classify(&calculator_call()), Tier::Archive);
        assert_eq!(classify(&calculator_result()), Tier::Archive);

        let mut archived = calculator_result();
        archived.metadata.insert(ID_KEY.into(), "doc-1".into());
        assert_eq!(classify(&archived), Tier::AlreadyArchived);
    }

    #[test]
    fn builder_rejects_zero_window_and_missing_store() {
        let err = WindowedChatMemory::builder()
            .vector_store(Arc::new(InMemoryVectorStore::new()))
            .max_messages(0)
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = WindowedChatMemory::builder().build().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn window_keeps_newest_turns_and_system_message() {
        let (memory, _, repo) = memory(5);
        memory
            .add("c1", vec![Message::system("rules")])
            .await
            .unwrap();
        for i in 0..8 {
            memory
                .add("c1", vec![Message::user(format!("msg {i}"))])
                .await
                .unwrap();
        }

        let stored = repo.find_by_conversation_id("c1").await.unwrap();
        assert_eq!(stored.len(), 5);
        assert_eq!(stored[0], Message::system("rules"));
        let texts: Vec<&str> = stored[1..].iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, vec!["msg 4", "msg 5", "msg 6", "msg 7"]);
    }

    #[tokio::test]
    async fn new_system_message_replaces_old_one() {
        let (memory, _, _) = memory(20);
        memory
            .add("c1", vec![Message::system("v1"), Message::user("first")])
            .await
            .unwrap();
        memory
            .add("c1", vec![Message::system("v2"), Message::user("second")])
            .await
            .unwrap();

        let history = memory.get("c1").await.unwrap();
        let systems: Vec<&Message> = history.iter().filter(|m| m.is_system()).collect();
        assert_eq!(systems, vec![&Message::system("v2")]);
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn repeated_system_message_is_not_a_reset() {
        let (memory, _, _) = memory(20);
        memory
            .add("c1", vec![Message::system("v1"), Message::user("first")])
            .await
            .unwrap();
        memory.add("c1", vec![Message::user("second")]).await.unwrap();

        let history = memory.get("c1").await.unwrap();
        assert_eq!(history[0], Message::system("v1"));
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn tool_turns_are_restored_at_their_position() {
        let (memory, store, repo) = memory(20);
        memory
            .add("c1", vec![Message::system("rules"), Message::user("what is 2+2?")])
            .await
            .unwrap();
        memory.add("c1", vec![calculator_call()]).await.unwrap();
        memory.add("c1", vec![calculator_result()]).await.unwrap();
        memory
            .add("c1", vec![Message::assistant("It is 4.")])
            .await
            .unwrap();

        let history = memory.get("c1").await.unwrap();
        let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );

        let call = &history[2];
        assert_eq!(call.tool_calls[0].name, "calculator");
        assert!(call.metadata.contains_key(ID_KEY));
        assert!(!call.metadata.contains_key(INDEX_KEY));
        assert!(!call.metadata.contains_key(CONVERSATION_ID_KEY));
        assert_eq!(history[3].tool_responses[0].response_data, "4");
        assert_eq!(history[4].content, "It is 4.");

        // Only the two tool turns were archived, exactly once each.
        assert_eq!(store.len().await, 2);
        assert_eq!(repo.find_by_conversation_id("c1").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn trimming_retags_archived_turns() {
        let (memory, store, _) = memory(4);
        memory
            .add("c1", vec![Message::system("rules"), Message::user("what is 2+2?")])
            .await
            .unwrap();
        memory.add("c1", vec![calculator_call()]).await.unwrap();
        memory.add("c1", vec![calculator_result()]).await.unwrap();
        memory
            .add("c1", vec![Message::assistant("It is 4.")])
            .await
            .unwrap();

        let history = memory.get("c1").await.unwrap();
        let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert_eq!(history[1].tool_calls[0].name, "calculator");
        assert_eq!(history[3].content, "It is 4.");
        assert_eq!(store.len().await, 2);

        // Reading again without writes gives the same sequence.
        assert_eq!(memory.get("c1").await.unwrap(), history);
    }

    #[tokio::test]
    async fn trimmed_tool_turns_leave_the_archive() {
        let (memory, store, _) = memory(4);
        memory
            .add(
                "c1",
                vec![
                    Message::system("rules"),
                    calculator_call(),
                    calculator_result(),
                    Message::assistant("It is 4."),
                ],
            )
            .await
            .unwrap();
        memory
            .add("c1", vec![Message::user("thanks"), Message::assistant("Any time.")])
            .await
            .unwrap();

        let history = memory.get("c1").await.unwrap();
        let texts: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, vec!["rules", "It is 4.", "thanks", "Any time."]);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn archived_turn_keeps_its_metadata() {
        let (memory, _, _) = memory(20);
        let mut call = calculator_call();
        call.metadata
            .insert("reasoningContent".into(), "need arithmetic".into());
        memory
            .add("c1", vec![Message::user("2+2?"), call])
            .await
            .unwrap();

        let history = memory.get("c1").await.unwrap();
        assert_eq!(history[1].reasoning(), Some("need arithmetic"));
    }

    #[tokio::test]
    async fn conversations_do_not_share_archived_turns() {
        let (memory, _, _) = memory(20);
        memory
            .add("a", vec![Message::user("hi"), calculator_call()])
            .await
            .unwrap();
        memory.add("b", vec![Message::user("hello")]).await.unwrap();

        assert_eq!(memory.get("a").await.unwrap().len(), 2);
        assert_eq!(memory.get("b").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn blank_conversation_id_is_rejected() {
        let (memory, _, _) = memory(20);
        let err = memory.add("  ", vec![Message::user("hi")]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let err = memory.get("").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn invalid_message_is_rejected_before_any_write() {
        let (memory, store, repo) = memory(20);
        let err = memory
            .add("c1", vec![Message::user("ok"), Message::tool_results(vec![])])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(repo.find_conversation_ids().await.unwrap().is_empty());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn clear_is_unsupported() {
        let (memory, _, _) = memory(20);
        let err = memory.clear("c1").await.unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[tokio::test]
    async fn archive_failures_surface_as_storage_errors() {
        let memory = WindowedChatMemory::builder()
            .vector_store(Arc::new(BrokenStore))
            .build()
            .unwrap();

        let err = memory.get("c1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageUnavailable);

        let err = memory.add("c1", vec![Message::user("hi")]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageUnavailable);
    }
}
