//! End-to-end tests for the agentloop runtime.
//!
//! These wire a scripted provider through the real orchestrator, memory,
//! tools and HTTP router, and check what a caller and the memory see.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use agentloop_agent::{AgentStreamEvent, Orchestrator, RegistryToolExecutor};
use agentloop_config::AppConfig;
use agentloop_core::error::ProviderError;
use agentloop_core::message::{Message, MessageToolCall, Role};
use agentloop_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use agentloop_core::FALLBACK_ANSWER;
use agentloop_gateway::{build_router, GatewayState};
use agentloop_memory::{
    InMemoryVectorStore, SqliteChatRepository, TokenTextSplitter, WindowedChatMemory,
};
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use tower::ServiceExt;

// ── Scripted Provider ────────────────────────────────────────────────────

/// Returns scripted responses in sequence, then repeats `fallback` if set.
struct ScriptedProvider {
    responses: Mutex<VecDeque<ProviderResponse>>,
    fallback: Option<ProviderResponse>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn always(response: ProviderResponse) -> Self {
        Self {
            fallback: Some(response),
            ..Self::new(Vec::new())
        }
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn request(&self, n: usize) -> ProviderRequest {
        self.requests.lock().unwrap()[n].clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let next = self.responses.lock().unwrap().pop_front();
        next.or_else(|| self.fallback.clone())
            .ok_or_else(|| ProviderError::ApiError {
                status_code: 500,
                message: "script exhausted".into(),
            })
    }
}

fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "scripted".into(),
        metadata: serde_json::Map::new(),
    }
}

fn tool_response(name: &str, args: serde_json::Value) -> ProviderResponse {
    ProviderResponse {
        message: Message::tool_request(vec![MessageToolCall::function(
            format!("call_{name}"),
            name,
            args.to_string(),
        )]),
        ..text_response("")
    }
}

// ── Wiring ───────────────────────────────────────────────────────────────

struct Harness {
    orchestrator: Orchestrator,
    knowledge: Arc<InMemoryVectorStore>,
}

fn harness(provider: Arc<ScriptedProvider>, config: &AppConfig) -> Harness {
    let knowledge = Arc::new(InMemoryVectorStore::new());
    let memory = WindowedChatMemory::builder()
        .vector_store(Arc::new(InMemoryVectorStore::new()))
        .max_messages(config.memory.max_messages)
        .build()
        .unwrap();
    let registry = agentloop_tools::default_registry(knowledge.clone());
    let executor = RegistryToolExecutor::new(Arc::new(registry));
    let orchestrator = Orchestrator::new(
        provider,
        Arc::new(executor),
        Arc::new(memory),
        knowledge.clone(),
    )
    .configure(config);
    Harness {
        orchestrator,
        knowledge,
    }
}

fn app(orchestrator: Orchestrator, config: &AppConfig) -> axum::Router {
    let state = Arc::new(GatewayState {
        orchestrator,
        splitter: TokenTextSplitter::default(),
    });
    build_router(state, &config.gateway)
}

async fn collect(mut rx: tokio::sync::mpsc::Receiver<AgentStreamEvent>) -> Vec<AgentStreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn roles(messages: &[Message]) -> Vec<Role> {
    messages.iter().map(|m| m.role).collect()
}

// ── E2E: Streaming tool loop ─────────────────────────────────────────────

#[tokio::test]
async fn e2e_calculator_round_then_answer() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_response("calculator", serde_json::json!({"expression": "2 + 2"})),
        text_response("The answer is 4."),
    ]));
    let h = harness(provider.clone(), &AppConfig::default());

    let events = collect(h.orchestrator.stream("c1", "what is 2+2?").await.unwrap()).await;

    let tool_result = events
        .iter()
        .find_map(|e| match e {
            AgentStreamEvent::ToolResult { message } => Some(message.clone()),
            _ => None,
        })
        .expect("a tool result event");
    assert_eq!(tool_result.tool_responses[0].name, "calculator");
    assert_eq!(tool_result.tool_responses[0].response_data, "4");

    match events.last().unwrap() {
        AgentStreamEvent::Done {
            message: Some(message),
            iterations,
        } => {
            assert_eq!(message.content, "The answer is 4.");
            assert_eq!(*iterations, 2);
        }
        other => panic!("unexpected final event {other:?}"),
    }
    assert_eq!(provider.calls(), 2);

    let history = h.orchestrator.history("c1").await.unwrap();
    assert_eq!(
        roles(&history),
        vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant]
    );
    assert!(history[0].content.contains("calculator"));
    assert!(history[0].content.contains("knowledge_search"));
}

#[tokio::test]
async fn e2e_knowledge_search_tool_sees_uploaded_documents() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_response("knowledge_search", serde_json::json!({"query": "refund policy"})),
        text_response("Refunds take 14 days."),
    ]));
    let h = harness(provider.clone(), &AppConfig::default());
    h.orchestrator
        .store(TokenTextSplitter::default().apply(
            "policy.md",
            "Our refund policy: refunds are issued within 14 days of a return.",
        ))
        .await
        .unwrap();

    let events = collect(h.orchestrator.stream("c1", "how do refunds work?").await.unwrap()).await;
    let tool_output = events
        .iter()
        .find_map(|e| match e {
            AgentStreamEvent::ToolResult { message } => {
                Some(message.tool_responses[0].response_data.clone())
            }
            _ => None,
        })
        .unwrap();
    assert!(tool_output.contains("policy.md"));
    assert!(tool_output.contains("14 days"));
}

#[tokio::test]
async fn e2e_iteration_cap_over_sse() {
    let provider = Arc::new(ScriptedProvider::always(tool_response(
        "calculator",
        serde_json::json!({"expression": "1 + 1"}),
    )));
    let config = AppConfig::default();
    let h = harness(provider.clone(), &config);
    let app = app(h.orchestrator.clone(), &config);

    let response = app
        .oneshot(post_json(
            "/api/v1/agent/stream",
            serde_json::json!({"conversationId": "loop", "message": "keep going"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_string(response).await;
    assert!(body.contains("event: iteration_capped"));
    assert!(body.contains(FALLBACK_ANSWER));
    assert_eq!(provider.calls(), config.agent.max_iterations);

    let history = h.orchestrator.history("loop").await.unwrap();
    assert_eq!(history.last().unwrap().content, FALLBACK_ANSWER);
}

// ── E2E: HTTP surface ────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_upload_then_chat_is_augmented() {
    let provider = Arc::new(ScriptedProvider::new(vec![text_response("Nine o'clock.")]));
    let mut config = AppConfig::default();
    config.retrieval.similarity_threshold = 0.1;
    let h = harness(provider.clone(), &config);
    let app = app(h.orchestrator.clone(), &config);

    let multipart = "--X\r\n\
        Content-Disposition: form-data; name=\"files\"; filename=\"hours.txt\"\r\n\
        Content-Type: text/plain\r\n\r\n\
        The front desk opens at nine o'clock.\r\n\
        --X--\r\n";
    let upload = Request::builder()
        .method("POST")
        .uri("/api/v1/agent/upload")
        .header(header::CONTENT_TYPE, "multipart/form-data; boundary=X")
        .body(Body::from(multipart))
        .unwrap();
    let response = app.clone().oneshot(upload).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_string(response).await.contains("\"documents\":1"));
    assert_eq!(h.knowledge.len().await, 1);

    let response = app
        .oneshot(post_json(
            "/api/v1/agent/chat",
            serde_json::json!({"conversationId": "c1", "message": "when does the front desk open?"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let answer: Message = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(answer.content, "Nine o'clock.");

    let prompt = provider.request(0);
    assert_eq!(roles(&prompt.messages), vec![Role::System, Role::User]);
    assert!(prompt.messages[1]
        .content
        .starts_with("The front desk opens at nine o'clock."));
    assert!(prompt.messages[1]
        .content
        .ends_with("when does the front desk open?"));
}

#[tokio::test]
async fn e2e_missing_conversation_id_is_rejected() {
    let provider = Arc::new(ScriptedProvider::new(Vec::new()));
    let config = AppConfig::default();
    let h = harness(provider.clone(), &config);

    let response = app(h.orchestrator, &config)
        .oneshot(post_json(
            "/api/v1/agent/chat",
            serde_json::json!({"conversationId": "", "message": "hi"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(provider.calls(), 0);
}

// ── E2E: Memory window ───────────────────────────────────────────────────

#[tokio::test]
async fn e2e_window_keeps_system_prompt_and_recent_turns() {
    let provider = Arc::new(ScriptedProvider::always(text_response("ok")));
    let mut config = AppConfig::default();
    config.memory.max_messages = 5;
    let h = harness(provider, &config);

    for i in 0..6 {
        h.orchestrator.chat("c1", &format!("turn {i}")).await.unwrap();
    }

    let history = h.orchestrator.history("c1").await.unwrap();
    assert_eq!(history.len(), 5);
    assert_eq!(history[0].role, Role::System);
    assert_eq!(history.last().unwrap().content, "ok");
    assert!(history.iter().any(|m| m.content == "turn 5"));
    assert!(!history.iter().any(|m| m.content == "turn 0"));
}

#[tokio::test]
async fn e2e_sqlite_history_and_tool_turns_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("memory.db");
    let db = db.to_string_lossy().into_owned();

    let build = |repository: SqliteChatRepository, provider: ScriptedProvider| {
        let memory = WindowedChatMemory::builder()
            .vector_store(Arc::new(repository.archive()))
            .repository(Arc::new(repository))
            .build()
            .unwrap();
        let registry = agentloop_tools::default_registry(Arc::new(InMemoryVectorStore::new()));
        Orchestrator::new(
            Arc::new(provider),
            Arc::new(RegistryToolExecutor::new(Arc::new(registry))),
            Arc::new(memory),
            Arc::new(InMemoryVectorStore::new()),
        )
    };

    let first = build(
        SqliteChatRepository::new(&db).await.unwrap(),
        ScriptedProvider::new(vec![
            tool_response("calculator", serde_json::json!({"expression": "6 * 7"})),
            text_response("It is 42."),
        ]),
    );
    let answer = first.chat("c1", "what is 6 times 7?").await.unwrap();
    assert_eq!(answer.content, "It is 42.");
    drop(first);

    let second = build(
        SqliteChatRepository::new(&db).await.unwrap(),
        ScriptedProvider::new(Vec::new()),
    );
    let history = second.history("c1").await.unwrap();
    assert_eq!(
        roles(&history),
        vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant]
    );
    assert_eq!(history[1].content, "what is 6 times 7?");
    assert_eq!(history[2].tool_calls[0].name, "calculator");
    assert_eq!(history[3].tool_responses[0].response_data, "42");
    assert_eq!(history[4].content, "It is 42.");
}
