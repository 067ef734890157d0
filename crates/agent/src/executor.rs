//! Tool executor backed by a [`ToolRegistry`].

use agentloop_core::error::ToolError;
use agentloop_core::message::{Message, MessageToolCall, ToolResponse};
use agentloop_core::provider::{ProviderRequest, ProviderResponse, ToolDefinition};
use agentloop_core::tool::{ToolCall, ToolExecutionResult, ToolExecutor, ToolRegistry};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Runs each requested call against the registry, in request order.
///
/// A call that fails (bad arguments, unknown tool, tool error) still
/// produces a response so the model can see what went wrong.
#[derive(Clone)]
pub struct RegistryToolExecutor {
    registry: Arc<ToolRegistry>,
}

impl RegistryToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    async fn run(&self, call: &MessageToolCall) -> String {
        let parsed = match ToolCall::try_from(call) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Unparseable tool arguments");
                return format!("Error: {e}");
            }
        };
        match self.registry.execute(&parsed).await {
            Ok(result) => {
                debug!(tool = %call.name, success = result.success, "Tool executed");
                result.output
            }
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool execution failed");
                format!("Error: {e}")
            }
        }
    }
}

#[async_trait]
impl ToolExecutor for RegistryToolExecutor {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }

    async fn execute_tool_calls(
        &self,
        prompt: &ProviderRequest,
        response: &ProviderResponse,
    ) -> Result<ToolExecutionResult, ToolError> {
        if !response.has_tool_calls() {
            return Err(ToolError::InvalidArguments(
                "response carries no tool calls".into(),
            ));
        }

        let mut responses = Vec::with_capacity(response.message.tool_calls.len());
        for call in &response.message.tool_calls {
            let output = self.run(call).await;
            responses.push(ToolResponse::new(&call.id, &call.name, output));
        }

        let mut conversation_history = prompt.messages.clone();
        conversation_history.push(response.message.clone());
        conversation_history.push(Message::tool_results(responses));
        Ok(ToolExecutionResult {
            conversation_history,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentloop_core::message::Role;
    use agentloop_core::tool::{Tool, ToolResult};

    struct UpperTool;

    #[async_trait]
    impl Tool for UpperTool {
        fn name(&self) -> &str {
            "upper"
        }
        fn description(&self) -> &str {
            "Uppercase the input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }
        async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
            let text = arguments["text"]
                .as_str()
                .ok_or_else(|| ToolError::InvalidArguments("text".into()))?;
            Ok(ToolResult {
                call_id: String::new(),
                success: true,
                output: text.to_uppercase(),
                data: None,
            })
        }
    }

    fn executor() -> RegistryToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(UpperTool));
        RegistryToolExecutor::new(Arc::new(registry))
    }

    fn response_with(calls: Vec<MessageToolCall>) -> ProviderResponse {
        ProviderResponse {
            message: Message::tool_request(calls),
            usage: None,
            model: "m".into(),
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn history_ends_with_tool_results() {
        let prompt = ProviderRequest::new("m", vec![Message::user("shout hi")]);
        let response = response_with(vec![
            MessageToolCall::function("c1", "upper", r#"{"text":"hi"}"#),
            MessageToolCall::function("c2", "upper", r#"{"text":"yo"}"#),
        ]);

        let result = executor().execute_tool_calls(&prompt, &response).await.unwrap();
        assert_eq!(result.conversation_history.len(), 3);

        let last = result.last().unwrap();
        assert_eq!(last.role, Role::Tool);
        assert_eq!(last.tool_responses.len(), 2);
        assert_eq!(last.tool_responses[0].id, "c1");
        assert_eq!(last.tool_responses[0].response_data, "HI");
        assert_eq!(last.tool_responses[1].response_data, "YO");
    }

    #[tokio::test]
    async fn failures_become_error_responses() {
        let prompt = ProviderRequest::new("m", vec![]);
        let response = response_with(vec![
            MessageToolCall::function("c1", "missing", "{}"),
            MessageToolCall::function("c2", "upper", "not json"),
        ]);

        let result = executor().execute_tool_calls(&prompt, &response).await.unwrap();
        let last = result.last().unwrap();
        assert!(last.tool_responses[0].response_data.starts_with("Error:"));
        assert!(last.tool_responses[1].response_data.starts_with("Error:"));
    }

    #[tokio::test]
    async fn response_without_tool_calls_is_rejected() {
        let prompt = ProviderRequest::new("m", vec![]);
        let response = ProviderResponse {
            message: Message::assistant("done"),
            usage: None,
            model: "m".into(),
            metadata: Default::default(),
        };
        let err = executor().execute_tool_calls(&prompt, &response).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn definitions_come_from_the_registry() {
        let defs = executor().definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "upper");
    }
}
