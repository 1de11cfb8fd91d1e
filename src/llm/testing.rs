//! Scripted LLM client for tests.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{Error, Result};

use super::client::LlmClient;
use super::types::{
    CompletionRequest, CompletionResponse, ContentBlock, EmbeddingRequest, EmbeddingResponse,
    StopReason, TokenUsage,
};

/// Client returning a pre-scripted sequence of responses.
pub struct ScriptedClient {
    responses: Mutex<Vec<CompletionResponse>>,
    calls: Mutex<u32>,
}

impl ScriptedClient {
    pub fn new(responses: Vec<CompletionResponse>) -> Self {
        let mut reversed = responses;
        reversed.reverse();
        Self {
            responses: Mutex::new(reversed),
            calls: Mutex::new(0),
        }
    }

    /// Number of completion calls made so far.
    pub fn call_count(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse> {
        *self.calls.lock().unwrap() += 1;
        self.responses
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| Error::Llm("script exhausted".into()))
    }

    async fn embed(&self, _request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        Err(Error::Llm("no embeddings in scripted client".into()))
    }

    fn provider(&self) -> &'static str {
        "scripted"
    }
}

/// Build a response from blocks, stop reason, and total token cost.
pub fn response(content: Vec<ContentBlock>, stop: StopReason, tokens: u64) -> CompletionResponse {
    CompletionResponse {
        id: "msg_test".into(),
        model: "scripted".into(),
        content,
        stop_reason: Some(stop),
        usage: TokenUsage {
            input_tokens: tokens,
            output_tokens: 0,
        },
        timestamp: Utc::now(),
    }
}

/// A plain-text end-turn response.
pub fn text_response(text: impl Into<String>, tokens: u64) -> CompletionResponse {
    response(vec![ContentBlock::text(text)], StopReason::EndTurn, tokens)
}
