//! Builds the turns the orchestrator writes into memory.

use agentloop_core::message::Message;
use agentloop_core::provider::ToolDefinition;
use serde::Serialize;

/// ReAct system prompt. `{tools}` is replaced with the tool definitions.
pub const SYSTEM_TEMPLATE: &str = "\
You are a helpful assistant that solves problems step by step.

Work in a loop of Thought, Action and Observation:
- Thought: reason about what you know and what is still missing.
- Action: when you need information or a computation, call one of the tools below.
- Observation: read the tool result and decide whether you can answer.

When you can answer, reply to the user directly without calling a tool.
Knowledge relevant to the question may be included before the user's message; prefer it over guessing.

Available tools:
{tools}";

const TOOLS_PLACEHOLDER: &str = "{tools}";

#[derive(Serialize)]
struct ToolSummary<'a> {
    name: &'a str,
    description: &'a str,
    schema: &'a serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct MessageFactory {
    template: String,
}

impl Default for MessageFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageFactory {
    pub fn new() -> Self {
        Self {
            template: SYSTEM_TEMPLATE.to_string(),
        }
    }

    /// Use a custom system prompt. A `{tools}` placeholder, if present,
    /// receives the tool definitions.
    pub fn with_template(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// The system turn that opens a new conversation.
    pub fn system(&self, tools: &[ToolDefinition]) -> Message {
        let summaries: Vec<ToolSummary<'_>> = tools
            .iter()
            .map(|t| ToolSummary {
                name: &t.name,
                description: &t.description,
                schema: &t.parameters,
            })
            .collect();
        let rendered = serde_json::to_string_pretty(&summaries).unwrap_or_else(|_| "[]".into());
        Message::system(self.template.replace(TOOLS_PLACEHOLDER, &rendered))
    }

    /// The user turn, already augmented with any retrieved knowledge.
    pub fn user(&self, text: impl Into<String>) -> Message {
        Message::user(text)
    }

    pub fn assistant(&self, text: impl Into<String>) -> Message {
        Message::assistant(text)
    }
}
