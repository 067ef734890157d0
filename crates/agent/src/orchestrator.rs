//! The orchestrator: retrieval-augmented chat over windowed memory, with a
//! bounded tool-calling loop in streaming mode.
//!
//! # Loop
//!
//! ```text
//! Augmenting → Calling → (ExecutingTools → Calling)* → Done | IterationCapped
//! ```
//!
//! Every memory append finishes before the loop moves on, and each run
//! holds its conversation's lock from the user turn to the final answer.

use crate::aggregator::fan_out;
use crate::locks::ConversationLocks;
use crate::message_factory::MessageFactory;
use crate::stream_event::AgentStreamEvent;
use agentloop_config::AppConfig;
use agentloop_core::agent::{LoopState, DEFAULT_MAX_ITERATIONS, FALLBACK_ANSWER};
use agentloop_core::error::{Error, ProviderError, Result};
use agentloop_core::event::{DomainEvent, EventBus};
use agentloop_core::memory::{Document, VectorStore};
use agentloop_core::message::Message;
use agentloop_core::provider::{Provider, ProviderRequest, ProviderResponse};
use agentloop_core::tool::ToolExecutor;
use agentloop_memory::{KnowledgeRetriever, WindowedChatMemory};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Why a streaming run stopped early.
enum Abort {
    /// The caller dropped the event receiver.
    Disconnected,
    Failed(Error),
}

impl From<Error> for Abort {
    fn from(e: Error) -> Self {
        Abort::Failed(e)
    }
}

impl From<ProviderError> for Abort {
    fn from(e: ProviderError) -> Self {
        Abort::Failed(e.into())
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    executor: Arc<dyn ToolExecutor>,
    memory: Arc<WindowedChatMemory>,
    knowledge: Arc<dyn VectorStore>,
    retriever: KnowledgeRetriever,
    factory: MessageFactory,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    max_iterations: usize,
    locks: ConversationLocks,
    events: Arc<EventBus>,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        executor: Arc<dyn ToolExecutor>,
        memory: Arc<WindowedChatMemory>,
        knowledge: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            provider,
            executor,
            memory,
            retriever: KnowledgeRetriever::new(knowledge.clone()),
            knowledge,
            factory: MessageFactory::new(),
            model: "llama3.1".into(),
            temperature: 0.7,
            max_tokens: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            locks: ConversationLocks::new(),
            events: Arc::new(EventBus::default()),
        }
    }

    /// Apply the model, agent and retrieval settings from `config`.
    pub fn configure(mut self, config: &AppConfig) -> Self {
        self.model = config.provider.model.clone();
        self.temperature = config.provider.temperature;
        self.max_tokens = config.provider.max_tokens;
        self.max_iterations = config.agent.max_iterations;
        if let Some(template) = &config.agent.system_prompt {
            self.factory = MessageFactory::with_template(template.clone());
        }
        self.retriever = self
            .retriever
            .with_similarity_threshold(config.retrieval.similarity_threshold)
            .with_top_k(config.retrieval.top_k);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_retriever(mut self, retriever: KnowledgeRetriever) -> Self {
        self.retriever = retriever;
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// The reconstructed conversation, oldest turn first.
    pub async fn history(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.memory.get(conversation_id).await
    }

    /// Answer without streaming. Tools the model asks for run in place, and
    /// the model is called again until it answers or the cap is reached.
    pub async fn chat(&self, conversation_id: &str, message: &str) -> Result<Message> {
        validate_input(conversation_id, message)?;
        let _guard = self.locks.acquire(conversation_id).await;
        info!(conversation_id, "Chat request");

        self.append_user_message(conversation_id, message).await?;

        let mut state = LoopState::Calling { iteration: 0 };
        while let LoopState::Calling { iteration } = state {
            let prompt = self.prompt(conversation_id, false).await?;
            let response = self.provider.complete(prompt.clone()).await?;
            debug!(
                conversation_id,
                iteration,
                model = %response.model,
                tool_calls = response.message.tool_calls.len(),
                "Model responded"
            );

            self.append(conversation_id, response.message.clone()).await?;
            state = LoopState::after_response(iteration, response.has_tool_calls());
            if let LoopState::Done { iterations } = state {
                self.events.publish(DomainEvent::AnswerProduced {
                    conversation_id: conversation_id.to_string(),
                    iterations,
                    timestamp: Utc::now(),
                });
                return Ok(response.message);
            }

            self.execute_tools(conversation_id, iteration, &prompt, &response)
                .await?;
            state = LoopState::after_tools(iteration, self.max_iterations);
        }

        match state {
            LoopState::IterationCapped { iterations } => {
                self.answer_capped(conversation_id, iterations).await
            }
            other => Err(Error::Internal(format!("loop stopped in state {other:?}"))),
        }
    }

    /// Run the streaming tool loop. Events arrive on the returned receiver;
    /// dropping it abandons the run.
    ///
    /// Input validation and the user-turn append happen before this returns,
    /// so their failures surface as `Err` rather than as an error event.
    pub async fn stream(
        &self,
        conversation_id: &str,
        message: &str,
    ) -> Result<mpsc::Receiver<AgentStreamEvent>> {
        validate_input(conversation_id, message)?;
        let guard = self.locks.acquire(conversation_id).await;
        info!(conversation_id, "Stream request");

        self.append_user_message(conversation_id, message).await?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let this = self.clone();
        let conversation_id = conversation_id.to_string();
        tokio::spawn(async move {
            let _guard = guard;
            match this.run_loop(&conversation_id, &tx).await {
                Ok(()) => {}
                Err(Abort::Disconnected) => {
                    debug!(conversation_id = %conversation_id, "Caller disconnected, run abandoned");
                }
                Err(Abort::Failed(e)) => {
                    warn!(conversation_id = %conversation_id, error = %e, "Stream run failed");
                    let _ = tx
                        .send(AgentStreamEvent::Error {
                            message: e.to_string(),
                        })
                        .await;
                }
            }
        });
        Ok(rx)
    }

    /// Add documents to the knowledge store. Returns how many were stored.
    pub async fn store(&self, documents: Vec<Document>) -> Result<usize> {
        if documents.is_empty() {
            return Ok(0);
        }
        let count = documents.len();
        self.knowledge.add(documents).await?;
        info!(count, "Documents stored");
        self.events.publish(DomainEvent::DocumentsIngested {
            count,
            timestamp: Utc::now(),
        });
        Ok(count)
    }

    async fn run_loop(
        &self,
        conversation_id: &str,
        tx: &mpsc::Sender<AgentStreamEvent>,
    ) -> std::result::Result<(), Abort> {
        let mut state = LoopState::Calling { iteration: 0 };

        while let LoopState::Calling { iteration } = state {
            info!(conversation_id, iteration, "Streaming iteration");
            let prompt = self.prompt(conversation_id, true).await?;
            let source = self.provider.stream(prompt.clone()).await?;
            let (mut raw, pending) = fan_out(source);

            while let Some(item) = raw.recv().await {
                match item {
                    Ok(chunk) => {
                        send(tx, AgentStreamEvent::Chunk {
                            message: chunk.to_message(),
                        })
                        .await?
                    }
                    // The aggregate reports the failure.
                    Err(_) => break,
                }
            }

            let Some(response) = pending.wait().await? else {
                debug!(conversation_id, iteration, "Model sent no chunks");
                send(tx, AgentStreamEvent::Done {
                    message: None,
                    iterations: iteration + 1,
                })
                .await?;
                return Ok(());
            };

            if tx.is_closed() {
                return Err(Abort::Disconnected);
            }
            self.append(conversation_id, response.message.clone()).await?;

            state = LoopState::after_response(iteration, response.has_tool_calls());
            if let LoopState::Done { iterations } = state {
                self.events.publish(DomainEvent::AnswerProduced {
                    conversation_id: conversation_id.to_string(),
                    iterations,
                    timestamp: Utc::now(),
                });
                send(tx, AgentStreamEvent::Done {
                    message: Some(response.message),
                    iterations,
                })
                .await?;
                return Ok(());
            }

            let tool_message = self
                .execute_tools(conversation_id, iteration, &prompt, &response)
                .await?;
            send(tx, AgentStreamEvent::ToolResult {
                message: tool_message,
            })
            .await?;

            state = LoopState::after_tools(iteration, self.max_iterations);
        }

        let LoopState::IterationCapped { iterations } = state else {
            return Err(Abort::Failed(Error::Internal(format!(
                "loop stopped in state {state:?}"
            ))));
        };
        let fallback = self.answer_capped(conversation_id, iterations).await?;
        send(tx, AgentStreamEvent::IterationCapped {
            message: fallback,
            iterations,
        })
        .await?;
        Ok(())
    }

    /// Record the fallback answer once the model has used up its tool rounds.
    async fn answer_capped(&self, conversation_id: &str, iterations: usize) -> Result<Message> {
        warn!(conversation_id, iterations, "Iteration cap reached, answering with fallback");
        let fallback = self.factory.assistant(FALLBACK_ANSWER);
        self.append(conversation_id, fallback.clone()).await?;
        self.events.publish(DomainEvent::IterationCapped {
            conversation_id: conversation_id.to_string(),
            iterations,
            timestamp: Utc::now(),
        });
        Ok(fallback)
    }

    /// Run the requested tools and record the tool-result turn.
    ///
    /// Returns the turn as it should be shown to the caller.
    async fn execute_tools(
        &self,
        conversation_id: &str,
        iteration: usize,
        prompt: &ProviderRequest,
        response: &ProviderResponse,
    ) -> Result<Message> {
        let tool_names: Vec<String> = response
            .message
            .tool_calls
            .iter()
            .map(|c| c.name.clone())
            .collect();
        info!(conversation_id, iteration, tools = ?tool_names, "Executing tools");

        let result = self.executor.execute_tool_calls(prompt, response).await?;
        let mut tool_message = result
            .last()
            .cloned()
            .ok_or_else(|| Error::Internal("tool executor returned an empty history".into()))?;

        self.append(conversation_id, tool_message.clone()).await?;
        tool_message.strip_routing();

        self.events.publish(DomainEvent::ToolsExecuted {
            conversation_id: conversation_id.to_string(),
            tool_names,
            iteration,
            timestamp: Utc::now(),
        });
        Ok(tool_message)
    }

    /// Record the user turn, opening the conversation with a system turn
    /// if it has none yet.
    async fn append_user_message(&self, conversation_id: &str, message: &str) -> Result<()> {
        if self.memory.get(conversation_id).await?.is_empty() {
            let system = self.factory.system(&self.executor.definitions());
            self.append(conversation_id, system).await?;
        }
        let augmented = self.retriever.augment(message).await;
        self.append(conversation_id, self.factory.user(augmented)).await
    }

    async fn append(&self, conversation_id: &str, message: Message) -> Result<()> {
        let role = message.role;
        self.memory.add(conversation_id, vec![message]).await?;
        self.events.publish(DomainEvent::TurnAppended {
            conversation_id: conversation_id.to_string(),
            role,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn prompt(&self, conversation_id: &str, stream: bool) -> Result<ProviderRequest> {
        let messages = self.memory.get(conversation_id).await?;
        let mut request = ProviderRequest::new(self.model.clone(), messages);
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;
        request.tools = self.executor.definitions();
        request.stream = stream;
        Ok(request)
    }
}

fn validate_input(conversation_id: &str, message: &str) -> Result<()> {
    if conversation_id.trim().is_empty() {
        return Err(Error::invalid("conversationId cannot be null or empty"));
    }
    if message.trim().is_empty() {
        return Err(Error::invalid("message cannot be null or empty"));
    }
    Ok(())
}

async fn send(
    tx: &mpsc::Sender<AgentStreamEvent>,
    event: AgentStreamEvent,
) -> std::result::Result<(), Abort> {
    tx.send(event).await.map_err(|_| Abort::Disconnected)
}
