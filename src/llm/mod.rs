//! LLM agent harness: client trait, token budget, and the two agent shapes.

pub mod agent;
pub mod budget;
pub mod client;
#[cfg(test)]
pub mod testing;
pub mod types;

pub use agent::{StructuredAgent, ToolAgent, ToolDispatcher};
pub use budget::{global_budget, TokenBudget};
pub use client::{AnthropicClient, ClientConfig, LlmClient};
pub use types::{
    ChatMessage, ChatRole, CompletionRequest, CompletionResponse, ContentBlock, EmbeddingRequest,
    EmbeddingResponse, StopReason, TokenUsage, ToolDefinition,
};
