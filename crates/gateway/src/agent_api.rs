//! `/api/v1/agent`: chat, streaming chat and knowledge upload.
//!
//! - `POST /api/v1/agent/chat`: runs the turn without streaming, returns the assistant message
//! - `POST /api/v1/agent/stream`: SSE stream of [`AgentStreamEvent`]s
//! - `POST /api/v1/agent/upload`: multipart `files`, split and stored as knowledge

use crate::error::ApiError;
use crate::SharedState;
use agentloop_agent::AgentStreamEvent;
use agentloop_core::message::Message;
use axum::{
    Router,
    extract::{Multipart, State},
    response::{
        Json,
        sse::{Event as SseEvent, Sse},
    },
    routing::post,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

const FILES_FIELD: &str = "files";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub documents: usize,
}

pub fn agent_router(state: SharedState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/stream", post(stream_handler))
        .route("/upload", post(upload_handler))
        .with_state(state)
}

async fn chat_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<Message>, ApiError> {
    info!(conversation_id = %payload.conversation_id, "agent/chat request");
    let message = state
        .orchestrator
        .chat(&payload.conversation_id, &payload.message)
        .await?;
    Ok(Json(message))
}

async fn stream_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    info!(conversation_id = %payload.conversation_id, "agent/stream SSE request");
    let rx = state
        .orchestrator
        .stream(&payload.conversation_id, &payload.message)
        .await?;

    let stream = ReceiverStream::new(rx).map(|event: AgentStreamEvent| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(SseEvent::default().event(event.event_type()).data(data))
    });
    Ok(Sse::new(stream))
}

async fn upload_handler(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut documents = Vec::new();
    let mut files = 0usize;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        warn!(error = %e, "Malformed multipart upload");
        ApiError::unprocessable_files()
    })? {
        if field.name() != Some(FILES_FIELD) {
            continue;
        }
        let source = field.file_name().unwrap_or("upload").to_string();
        let bytes = field.bytes().await.map_err(|e| {
            warn!(file = %source, error = %e, "File read failed");
            ApiError::unprocessable_files()
        })?;
        let text = String::from_utf8(bytes.to_vec()).map_err(|_| {
            warn!(file = %source, "File is not UTF-8 text");
            ApiError::unprocessable_files()
        })?;
        documents.extend(state.splitter.apply(&source, &text));
        files += 1;
    }

    let stored = state.orchestrator.store(documents).await?;
    info!(files, documents = stored, "Upload ingested");
    Ok(Json(UploadResponse { documents: stored }))
}
