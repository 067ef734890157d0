//! Streaming chunk fan-out and aggregation.
//!
//! One upstream chunk stream feeds two consumers: the caller, who sees every
//! raw chunk as it arrives, and an aggregation task that folds the chunks
//! into a single [`ProviderResponse`] once the stream completes.

use agentloop_core::error::ProviderError;
use agentloop_core::message::{Message, REASONING_CONTENT_KEY};
use agentloop_core::provider::{ProviderResponse, StreamChunk};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One item of a provider stream.
pub type ChunkItem = Result<StreamChunk, ProviderError>;

const FAN_OUT_CAPACITY: usize = 64;

/// Fold a completed chunk sequence into one response.
///
/// Returns `None` for an empty sequence.
pub fn aggregate_chunks(chunks: &[StreamChunk]) -> Option<ProviderResponse> {
    let last = chunks.last()?;

    let mut content = String::new();
    let mut reasoning = String::new();
    let mut tool_calls = Vec::new();
    let mut usage = None;
    for chunk in chunks {
        if let Some(delta) = &chunk.content {
            content.push_str(delta);
        }
        if let Some(delta) = &chunk.reasoning {
            reasoning.push_str(delta);
        }
        tool_calls.extend(chunk.tool_calls.iter().cloned());
        if chunk.usage.is_some() {
            usage = chunk.usage;
        }
    }

    // Tool-calling turns keep their preamble as reasoning, not as an answer.
    if !tool_calls.is_empty() && reasoning.is_empty() {
        reasoning = std::mem::take(&mut content);
    }

    let mut message = Message::assistant(content);
    message.tool_calls = tool_calls;
    message.metadata = last.metadata.clone();
    message
        .metadata
        .insert(REASONING_CONTENT_KEY.into(), Value::String(reasoning));

    let model = last
        .metadata
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Some(ProviderResponse {
        message,
        usage,
        model,
        metadata: last.metadata.clone(),
    })
}

/// Feed every item of `source` to `N` receivers, each seeing the whole
/// sequence once.
///
/// A dropped receiver stops being fed; the rest keep going. An error item
/// is delivered to everyone and ends the stream.
pub fn multicast<const N: usize>(
    mut source: mpsc::Receiver<ChunkItem>,
    capacity: usize,
) -> [mpsc::Receiver<ChunkItem>; N] {
    let mut senders = Vec::with_capacity(N);
    let receivers = std::array::from_fn(|_| {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        senders.push(tx);
        rx
    });

    tokio::spawn(async move {
        while let Some(item) = source.recv().await {
            let failed = item.is_err();
            let mut live = Vec::with_capacity(senders.len());
            for tx in senders {
                if tx.send(item.clone()).await.is_ok() {
                    live.push(tx);
                }
            }
            senders = live;
            if senders.is_empty() || failed {
                break;
            }
        }
    });
    receivers
}

/// The aggregation half of [`fan_out`]. Dropping it cancels the aggregation.
pub struct PendingAggregate {
    handle: Option<JoinHandle<Result<Option<ProviderResponse>, ProviderError>>>,
}

impl PendingAggregate {
    /// The aggregated response, available once the upstream stream ends.
    pub async fn wait(mut self) -> Result<Option<ProviderResponse>, ProviderError> {
        match self.handle.take() {
            Some(handle) => handle
                .await
                .map_err(|e| ProviderError::StreamInterrupted(e.to_string()))?,
            None => Ok(None),
        }
    }
}

impl Drop for PendingAggregate {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Split a provider stream into the raw chunk stream and its pending aggregate.
///
/// Drain the raw receiver before awaiting the aggregate.
pub fn fan_out(source: mpsc::Receiver<ChunkItem>) -> (mpsc::Receiver<ChunkItem>, PendingAggregate) {
    let [raw_rx, mut agg_rx] = multicast::<2>(source, FAN_OUT_CAPACITY);

    let handle = tokio::spawn(async move {
        let mut chunks = Vec::new();
        while let Some(item) = agg_rx.recv().await {
            chunks.push(item?);
        }
        Ok(aggregate_chunks(&chunks))
    });

    (
        raw_rx,
        PendingAggregate {
            handle: Some(handle),
        },
    )
}
