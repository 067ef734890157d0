//! Scripted providers and tools for orchestrator tests.

use crate::aggregator::aggregate_chunks;
use crate::executor::RegistryToolExecutor;
use agentloop_core::error::{ProviderError, ToolError};
use agentloop_core::message::MessageToolCall;
use agentloop_core::provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk};
use agentloop_core::tool::{Tool, ToolRegistry, ToolResult};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// What the provider does on one model call.
#[derive(Debug, Clone)]
pub enum Round {
    /// Stream these chunks, then end normally.
    Chunks(Vec<StreamChunk>),
    /// Stream these chunks, then fail.
    Broken(Vec<StreamChunk>, ProviderError),
}

/// A plain text answer split into the given deltas.
pub fn text_round(parts: &[&str]) -> Round {
    Round::Chunks(parts.iter().map(|p| StreamChunk::text(*p)).collect())
}

/// A preamble followed by one `echo` tool call.
pub fn tool_round(call_id: &str, text: &str) -> Round {
    let call = StreamChunk {
        tool_calls: vec![MessageToolCall::function(
            call_id,
            "echo",
            serde_json::json!({ "text": text }).to_string(),
        )],
        done: true,
        ..Default::default()
    };
    Round::Chunks(vec![StreamChunk::text("Let me check."), call])
}

/// A provider that plays back scripted rounds, one per call.
///
/// Once the script is exhausted it repeats the `repeat` round if one was
/// given, and panics otherwise.
pub struct ScriptedProvider {
    rounds: Mutex<VecDeque<Round>>,
    repeat: Option<Round>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(rounds: Vec<Round>) -> Self {
        Self {
            rounds: Mutex::new(rounds.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A provider that answers every call with `round`.
    pub fn repeating(round: Round) -> Self {
        Self {
            repeat: Some(round),
            ..Self::new(Vec::new())
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_round(&self, request: ProviderRequest) -> Round {
        let mut requests = self.requests.lock().unwrap();
        requests.push(request);
        let next = self.rounds.lock().unwrap().pop_front();
        next.or_else(|| self.repeat.clone()).unwrap_or_else(|| {
            panic!("ScriptedProvider: no round for call #{}", requests.len())
        })
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        match self.next_round(request) {
            Round::Chunks(chunks) => aggregate_chunks(&chunks).ok_or_else(|| {
                ProviderError::ApiError {
                    status_code: 500,
                    message: "empty completion".into(),
                }
            }),
            Round::Broken(_, error) => Err(error),
        }
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> Result<mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError> {
        let (items, error) = match self.next_round(request) {
            Round::Chunks(chunks) => (chunks, None),
            Round::Broken(chunks, error) => (chunks, Some(error)),
        };
        let (tx, rx) = mpsc::channel(items.len() + 1);
        for chunk in items {
            let _ = tx.try_send(Ok(chunk));
        }
        if let Some(error) = error {
            let _ = tx.try_send(Err(error));
        }
        Ok(rx)
    }
}

/// Echoes its `text` argument back.
pub struct EchoTool;

#[async_trait::async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the given text"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let text = arguments["text"].as_str().unwrap_or_default();
        Ok(ToolResult {
            call_id: String::new(),
            success: true,
            output: format!("echo: {text}"),
            data: None,
        })
    }
}

pub fn echo_executor() -> Arc<RegistryToolExecutor> {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(EchoTool));
    Arc::new(RegistryToolExecutor::new(Arc::new(registry)))
}
