//! Language-model provider implementations for agentloop.
//!
//! All providers implement the `agentloop_core::Provider` trait.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;
