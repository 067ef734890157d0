//! The orchestration loop of agentloop.
//!
//! A user message goes through this cycle:
//!
//! 1. **Augment** it with knowledge retrieved from the vector store
//! 2. **Record** it in windowed memory (opening new conversations with a system turn)
//! 3. **Call** the model with the memory window and the tool definitions
//! 4. **If tool calls**: execute them, record the results, loop back to step 3
//! 5. **If text**: record it and hand it to the caller
//!
//! Streaming runs fan each model stream out to the caller and to an
//! aggregator, and stop after a fixed number of tool rounds.

pub mod aggregator;
pub mod executor;
pub mod locks;
pub mod message_factory;
pub mod orchestrator;
pub mod stream_event;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use aggregator::{aggregate_chunks, fan_out, multicast, PendingAggregate};
pub use executor::RegistryToolExecutor;
pub use locks::ConversationLocks;
pub use message_factory::MessageFactory;
pub use orchestrator::Orchestrator;
pub use stream_event::AgentStreamEvent;
