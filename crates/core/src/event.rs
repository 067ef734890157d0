//! Domain event system: decoupled observation of orchestration progress.
//!
//! The orchestrator publishes events as turns are committed; anything that
//! wants to watch (logs, dashboards, tests) subscribes without coupling to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use crate::message::Role;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A turn was durably appended to conversation memory
    TurnAppended {
        conversation_id: String,
        role: Role,
        timestamp: DateTime<Utc>,
    },

    /// The tool executor finished one round of tool calls
    ToolsExecuted {
        conversation_id: String,
        tool_names: Vec<String>,
        iteration: usize,
        timestamp: DateTime<Utc>,
    },

    /// The loop hit its iteration cap and answered with the fallback
    IterationCapped {
        conversation_id: String,
        iterations: usize,
        timestamp: DateTime<Utc>,
    },

    /// A final answer was produced
    AnswerProduced {
        conversation_id: String,
        iterations: usize,
        timestamp: DateTime<Utc>,
    },

    /// Documents were added to the knowledge store
    DocumentsIngested {
        count: usize,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Slow
/// subscribers may observe `Lagged`; events are advisory, not a log.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::ToolsExecuted {
            conversation_id: "c1".into(),
            tool_names: vec!["calculator".into()],
            iteration: 0,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::ToolsExecuted { tool_names, .. } => {
                assert_eq!(tool_names, &vec!["calculator".to_string()]);
            }
            _ => panic!("Expected ToolsExecuted event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::DocumentsIngested {
            count: 0,
            timestamp: Utc::now(),
        });
    }
}
