//! Agent-level streaming events.
//!
//! `AgentStreamEvent` is what a streaming orchestration emits. The gateway
//! forwards each event over SSE, named by [`AgentStreamEvent::event_type`].
//!
//! - `chunk`: partial assistant output from the model
//! - `tool_result`: the tool-result turn produced by a tool round
//! - `done`: the final answer (absent if the model sent nothing)
//! - `iteration_capped`: the fallback answer after too many tool rounds
//! - `error`: the run failed

use agentloop_core::message::Message;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    /// Partial model output, forwarded unmodified in arrival order.
    Chunk { message: Message },

    /// Tool-result turn, with conversation routing metadata removed.
    ToolResult { message: Message },

    /// The run finished with a tool-free response.
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<Message>,
        iterations: usize,
    },

    /// The model still wanted tools when the iteration cap was reached.
    IterationCapped { message: Message, iterations: usize },

    /// An error occurred mid-stream.
    Error { message: String },
}

impl AgentStreamEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::ToolResult { .. } => "tool_result",
            Self::Done { .. } => "done",
            Self::IterationCapped { .. } => "iteration_capped",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Chunk { .. } | Self::ToolResult { .. })
    }
}
