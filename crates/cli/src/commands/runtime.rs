//! Builds the orchestrator and its collaborators from configuration.

use agentloop_agent::{Orchestrator, RegistryToolExecutor};
use agentloop_config::AppConfig;
use agentloop_core::memory::{ChatMemoryRepository, VectorStore};
use agentloop_core::provider::Provider;
use agentloop_memory::{
    InMemoryChatRepository, InMemoryVectorStore, SqliteChatRepository, TokenTextSplitter,
    WindowedChatMemory,
};
use agentloop_providers::OpenAiCompatProvider;
use anyhow::Context;
use std::sync::Arc;
use tracing::info;

pub struct Runtime {
    pub orchestrator: Orchestrator,
    pub splitter: TokenTextSplitter,
}

pub async fn build(config: &AppConfig) -> anyhow::Result<Runtime> {
    let provider: Arc<dyn Provider> = Arc::new(OpenAiCompatProvider::from_config(&config.provider));

    let mut knowledge = InMemoryVectorStore::new();
    if let Some(model) = &config.provider.embedding_model {
        knowledge = knowledge.with_embeddings(provider.clone(), model.clone());
    }
    let knowledge = Arc::new(knowledge);

    // SQLite keeps both tiers in one database; otherwise both live in memory.
    let (repository, archive): (Arc<dyn ChatMemoryRepository>, Arc<dyn VectorStore>) =
        match config.memory.backend.as_str() {
            "sqlite" => {
                let path = &config.memory.sqlite_path;
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("Failed to create {}", parent.display()))?;
                }
                let repository = SqliteChatRepository::new(&path.to_string_lossy()).await?;
                let archive: Arc<dyn VectorStore> = Arc::new(repository.archive());
                let repository: Arc<dyn ChatMemoryRepository> = Arc::new(repository);
                (repository, archive)
            }
            _ => {
                let repository: Arc<dyn ChatMemoryRepository> = Arc::new(InMemoryChatRepository::new());
                let archive: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
                (repository, archive)
            }
        };

    let memory = WindowedChatMemory::builder()
        .repository(repository)
        .vector_store(archive)
        .max_messages(config.memory.max_messages)
        .archive_threshold(config.memory.archive_threshold)
        .build()?;

    let registry = agentloop_tools::default_registry(knowledge.clone());
    let executor = RegistryToolExecutor::new(Arc::new(registry));

    let orchestrator = Orchestrator::new(
        provider,
        Arc::new(executor),
        Arc::new(memory),
        knowledge,
    )
    .configure(config);

    let ingestion = &config.ingestion;
    let splitter = TokenTextSplitter::new(
        ingestion.chunk_size,
        ingestion.min_chunk_size_chars,
        ingestion.min_chunk_length_to_embed,
        ingestion.max_num_chunks,
        ingestion.keep_separator,
    );

    info!(
        provider = orchestrator.provider_name(),
        model = %config.provider.model,
        memory = %config.memory.backend,
        "Runtime ready"
    );
    Ok(Runtime {
        orchestrator,
        splitter,
    })
}
