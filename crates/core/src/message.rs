//! Message and conversation domain types.
//!
//! These are the value objects that flow through the whole system:
//! caller sends a message → orchestrator augments it → memory records it →
//! provider answers → tools run → results re-enter memory.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata key under which the archive tier records the owning conversation.
pub const CONVERSATION_ID_KEY: &str = "conversationId";

/// Metadata key under which the archive tier records a turn's position.
pub const INDEX_KEY: &str = "index";

/// Metadata key holding the archive document id once a turn has been archived.
pub const ID_KEY: &str = "id";

/// Metadata key carrying the model's reasoning trace.
pub const REASONING_CONTENT_KEY: &str = "reasoningContent";

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions
    System,
    /// The end user
    User,
    /// The model
    Assistant,
    /// Tool execution result
    Tool,
}

impl Role {
    /// Upper-case tag stored alongside archived turns.
    pub fn message_type(&self) -> &'static str {
        match self {
            Role::System => "SYSTEM",
            Role::User => "USER",
            Role::Assistant => "ASSISTANT",
            Role::Tool => "TOOL",
        }
    }

    pub fn from_message_type(tag: &str) -> Option<Self> {
        match tag {
            "SYSTEM" => Some(Role::System),
            "USER" => Some(Role::User),
            "ASSISTANT" => Some(Role::Assistant),
            "TOOL" => Some(Role::Tool),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        f.write_str(s)
    }
}

/// A single conversation turn.
///
/// Messages compare by value: two system prompts with the same text and
/// metadata are the same system prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Who sent this message
    pub role: Role,

    /// The text content
    #[serde(default)]
    pub content: String,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// Tool outputs carried by a tool message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_responses: Vec<ToolResponse>,

    /// Free-form metadata (reasoning trace, provider info, archive id)
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_responses: Vec::new(),
            metadata: Map::new(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    /// Create an assistant turn that only requests tools.
    pub fn tool_request(tool_calls: Vec<MessageToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::with_role(Role::Assistant, "")
        }
    }

    /// Create a tool result message holding one response per executed call.
    pub fn tool_results(tool_responses: Vec<ToolResponse>) -> Self {
        Self {
            tool_responses,
            ..Self::with_role(Role::Tool, "")
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }

    /// The accumulated reasoning trace, if the provider reported one.
    pub fn reasoning(&self) -> Option<&str> {
        self.metadata
            .get(REASONING_CONTENT_KEY)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Remove the archive routing tags so they never leak to callers.
    pub fn strip_routing(&mut self) {
        self.metadata.remove(CONVERSATION_ID_KEY);
        self.metadata.remove(INDEX_KEY);
    }

    /// Shape check applied before a message is accepted into memory.
    pub fn validate(&self) -> std::result::Result<(), String> {
        match self.role {
            Role::Tool if self.tool_responses.is_empty() => {
                Err("tool message carries no tool responses".into())
            }
            Role::Tool => Ok(()),
            _ if !self.tool_responses.is_empty() => Err(format!(
                "{} message must not carry tool responses",
                self.role
            )),
            Role::System | Role::User if !self.tool_calls.is_empty() => Err(format!(
                "{} message must not carry tool calls",
                self.role
            )),
            _ => Ok(()),
        }
    }
}

/// A tool call embedded in an assistant message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageToolCall {
    /// Unique ID for this tool call
    pub id: String,

    /// Call type; providers currently only emit "function"
    #[serde(rename = "type", default = "default_call_type")]
    pub call_type: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as JSON string
    pub arguments: String,
}

fn default_call_type() -> String {
    "function".into()
}

impl MessageToolCall {
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            call_type: default_call_type(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// The output of one tool call, correlated to it by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub id: String,

    /// Name of the tool that produced this response
    #[serde(alias = "type")]
    pub name: String,

    pub response_data: String,
}

impl ToolResponse {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        response_data: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            response_data: response_data.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_message() {
        let msg = Message::user("Hello, agent!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello, agent!");
        assert!(msg.tool_calls.is_empty());
        assert!(msg.validate().is_ok());
    }

    #[test]
    fn messages_compare_by_value() {
        assert_eq!(Message::system("rules"), Message::system("rules"));
        assert_ne!(Message::system("rules"), Message::system("new rules"));
        assert_ne!(Message::system("hi"), Message::user("hi"));
    }

    #[test]
    fn strip_routing_keeps_other_metadata() {
        let mut msg = Message::tool_results(vec![ToolResponse::new("c1", "calculator", "4")]);
        msg.metadata.insert(CONVERSATION_ID_KEY.into(), "conv".into());
        msg.metadata.insert(INDEX_KEY.into(), 3.into());
        msg.metadata.insert(ID_KEY.into(), "doc-1".into());

        msg.strip_routing();

        assert!(!msg.metadata.contains_key(CONVERSATION_ID_KEY));
        assert!(!msg.metadata.contains_key(INDEX_KEY));
        assert_eq!(msg.metadata[ID_KEY], "doc-1");
    }

    #[test]
    fn validate_rejects_empty_tool_message() {
        let msg = Message::tool_results(vec![]);
        assert!(msg.validate().is_err());

        let mut user = Message::user("hi");
        user.tool_responses.push(ToolResponse::new("c1", "x", "y"));
        assert!(user.validate().is_err());
    }

    #[test]
    fn tool_response_accepts_type_alias() {
        let json = r#"{"id":"c1","type":"calculator","responseData":"4"}"#;
        let resp: ToolResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.name, "calculator");
        assert_eq!(resp.response_data, "4");
    }

    #[test]
    fn message_serializes_camel_case() {
        let msg = Message::tool_request(vec![MessageToolCall::function(
            "call_1",
            "calculator",
            r#"{"expression":"2+2"}"#,
        )]);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["toolCalls"][0]["type"], "function");
        assert!(json.get("toolResponses").is_none());
    }

    #[test]
    fn reasoning_ignores_empty_trace() {
        let mut msg = Message::assistant("answer");
        assert!(msg.reasoning().is_none());
        msg.metadata.insert(REASONING_CONTENT_KEY.into(), "".into());
        assert!(msg.reasoning().is_none());
        msg.metadata
            .insert(REASONING_CONTENT_KEY.into(), "thinking".into());
        assert_eq!(msg.reasoning(), Some("thinking"));
    }
}
