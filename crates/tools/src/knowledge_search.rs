//! Knowledge search tool: similarity search over the ingested documents.

use async_trait::async_trait;
use agentloop_core::error::ToolError;
use agentloop_core::memory::{SearchRequest, VectorStore};
use agentloop_core::tool::{Tool, ToolResult};
use std::sync::Arc;
use tracing::debug;

const DEFAULT_TOP_K: u64 = 3;
const MAX_TOP_K: u64 = 10;

pub struct KnowledgeSearchTool {
    store: Arc<dyn VectorStore>,
}

impl KnowledgeSearchTool {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self { store }
    }
}

#[derive(serde::Serialize)]
struct KnowledgeHit {
    document_id: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<String>,
    similarity: f64,
}

#[async_trait]
impl Tool for KnowledgeSearchTool {
    fn name(&self) -> &str {
        "knowledge_search"
    }

    fn description(&self) -> &str {
        "Search the uploaded knowledge base. Returns document chunks sorted by relevance."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to look for"
                },
                "top_k": {
                    "type": "integer",
                    "description": "Maximum number of results to return (default 3, max 10)",
                    "default": DEFAULT_TOP_K
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let query = arguments["query"]
            .as_str()
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;
        let top_k = arguments["top_k"]
            .as_u64()
            .unwrap_or(DEFAULT_TOP_K)
            .clamp(1, MAX_TOP_K) as usize;

        let documents = self
            .store
            .similarity_search(SearchRequest::query(query).with_top_k(top_k))
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().to_string(),
                reason: e.to_string(),
            })?;

        let hits: Vec<KnowledgeHit> = documents
            .into_iter()
            .filter(|d| d.score.is_some_and(|s| s > 0.0))
            .map(|d| KnowledgeHit {
                source: d.metadata.get("source").and_then(|s| s.as_str()).map(String::from),
                similarity: d.score.unwrap_or_default(),
                document_id: d.id,
                content: d.text,
            })
            .collect();
        debug!(query, top_k, hits = hits.len(), "Knowledge search complete");

        if hits.is_empty() {
            return Ok(ToolResult {
                call_id: String::new(),
                success: true,
                output: format!("No knowledge found for '{query}'."),
                data: Some(serde_json::json!([])),
            });
        }

        let data = serde_json::to_value(&hits).map_err(|e| ToolError::ExecutionFailed {
            tool_name: self.name().to_string(),
            reason: e.to_string(),
        })?;
        Ok(ToolResult {
            call_id: String::new(),
            success: true,
            output: serde_json::to_string_pretty(&data).unwrap_or_default(),
            data: Some(data),
        })
    }
}
