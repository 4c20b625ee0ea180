//! LLM module: model endpoint client, prompt construction and decision parsing
//!
//! This module provides:
//! - `ModelClientConfig`, `ModelClient` for the OpenAI-compatible chat endpoint
//! - `decision_messages`, `narration_messages`, `tool_specs` for request payloads
//! - `parse_decision` turning the decision response into a `ModelDecision`

mod client;
mod decision;
mod prompt;

pub use client::{ModelClient, ModelClientConfig};
pub use decision::{parse_decision, ModelDecision, ToolInvocation};
pub use prompt::{decision_messages, narration_messages, tool_specs, ChatMessage};
