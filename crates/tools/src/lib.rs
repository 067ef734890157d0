//! Built-in tool implementations for agentloop.
//!
//! Tools give the agent a way to act between model calls: do arithmetic
//! and search the ingested knowledge base.

pub mod calculator;
pub mod knowledge_search;

use agentloop_core::memory::VectorStore;
use agentloop_core::tool::ToolRegistry;
use std::sync::Arc;

pub use calculator::CalculatorTool;
pub use knowledge_search::KnowledgeSearchTool;

/// Create a registry with every built-in tool.
pub fn default_registry(store: Arc<dyn VectorStore>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(CalculatorTool));
    registry.register(Box::new(KnowledgeSearchTool::new(store)));
    registry
}
