//! # agentloop core
//!
//! Domain types, traits, and error definitions for the agentloop
//! orchestration runtime. This crate has **zero framework dependencies**;
//! it defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (model, tool executor, vector store,
//! repository) is a trait here. Implementations live in their respective
//! crates, so tests can swap in scripted stand-ins.

pub mod error;
pub mod message;
pub mod provider;
pub mod tool;
pub mod memory;
pub mod agent;
pub mod event;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ErrorKind, Result};
pub use message::{Message, MessageToolCall, Role, ToolResponse};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolDefinition};
pub use tool::{Tool, ToolCall, ToolExecutionResult, ToolExecutor, ToolRegistry, ToolResult};
pub use memory::{ChatMemoryRepository, Document, MetadataFilter, SearchRequest, VectorStore};
pub use agent::{LoopState, DEFAULT_MAX_ITERATIONS, FALLBACK_ANSWER};
pub use event::{DomainEvent, EventBus};
