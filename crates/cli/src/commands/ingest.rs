//! `agentloop ingest`: Split text files into knowledge documents.
//!
//! The knowledge store lives in process memory, so this reports what an
//! upload of the same files would store.

use super::runtime;
use agentloop_config::AppConfig;
use anyhow::Context;
use std::path::PathBuf;

pub async fn run(config: AppConfig, files: &[PathBuf]) -> anyhow::Result<()> {
    let runtime = runtime::build(&config).await?;

    let mut documents = Vec::new();
    for path in files {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Files can't be processed: {}", path.display()))?;
        let source = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let chunks = runtime.splitter.apply(&source, &text);
        println!("   {source}: {} chunks", chunks.len());
        documents.extend(chunks);
    }

    let stored = runtime.orchestrator.store(documents).await?;
    println!("Stored {stored} documents from {} files", files.len());
    Ok(())
}
