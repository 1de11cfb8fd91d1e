//! LLM client trait and the Anthropic Messages API implementation.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::{Error, Result};

use super::types::{
    ChatMessage, CompletionRequest, CompletionResponse, ContentBlock, EmbeddingRequest,
    EmbeddingResponse, StopReason, TokenUsage, ToolDefinition,
};

/// LLM client trait for completions and embeddings.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete a conversation.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Create embeddings for texts.
    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse>;

    /// Provider name, for error messages and logs.
    fn provider(&self) -> &'static str;
}

/// Configuration for LLM clients.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API key
    pub api_key: String,
    /// Base URL override
    pub base_url: Option<String>,
    /// Default model
    pub default_model: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            default_model: None,
            timeout_secs: 120,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }
}

/// Anthropic Claude client.
pub struct AnthropicClient {
    config: ClientConfig,
    http: Client,
}

impl AnthropicClient {
    const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com";
    const API_VERSION: &'static str = "2023-06-01";
    const DEFAULT_MODEL: &'static str = "claude-sonnet-4-5";

    pub fn new(config: ClientConfig) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self { config, http }
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(Self::DEFAULT_BASE_URL)
    }
}

// Anthropic API types
#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: String,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    tools: &'a [ToolDefinition],
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: String,
    model: String,
    content: Vec<AnthropicContent>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    input: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let model = request
            .model
            .or_else(|| self.config.default_model.clone())
            .unwrap_or_else(|| Self::DEFAULT_MODEL.to_string());

        let api_request = AnthropicRequest {
            model: model.clone(),
            messages: &request.messages,
            max_tokens: request.max_tokens.unwrap_or(4096),
            system: request.system.as_deref(),
            temperature: request.temperature,
            tools: &request.tools,
        };

        let url = format!("{}/v1/messages", self.base_url());

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", Self::API_VERSION)
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::Llm(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Llm(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<AnthropicError>(&body) {
                return Err(Error::llm_api(
                    self.provider(),
                    format!("{}: {}", error.error.error_type, error.error.message),
                ));
            }
            return Err(Error::llm_api(self.provider(), format!("{}: {}", status, body)));
        }

        let api_response: AnthropicResponse = serde_json::from_str(&body)
            .map_err(|e| Error::Llm(format!("Failed to parse response: {}", e)))?;

        let content = api_response
            .content
            .into_iter()
            .filter_map(|c| match c.content_type.as_str() {
                "text" => Some(ContentBlock::Text {
                    text: c.text.unwrap_or_default(),
                }),
                "tool_use" => Some(ContentBlock::ToolUse {
                    id: c.id.unwrap_or_default(),
                    name: c.name.unwrap_or_default(),
                    input: c.input.unwrap_or(Value::Null),
                }),
                _ => None,
            })
            .collect();

        let stop_reason = api_response.stop_reason.as_deref().map(|r| match r {
            "end_turn" => StopReason::EndTurn,
            "max_tokens" => StopReason::MaxTokens,
            "stop_sequence" => StopReason::StopSequence,
            "tool_use" => StopReason::ToolUse,
            _ => StopReason::EndTurn,
        });

        Ok(CompletionResponse {
            id: api_response.id,
            model: api_response.model,
            content,
            stop_reason,
            usage: TokenUsage {
                input_tokens: api_response.usage.input_tokens,
                output_tokens: api_response.usage.output_tokens,
            },
            timestamp: Utc::now(),
        })
    }

    async fn embed(&self, _request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        // Anthropic has no native embedding API; a partner service fills
        // this seam in deployments that use similarity search.
        Err(Error::Llm(
            "Anthropic does not provide a direct embedding API".to_string(),
        ))
    }

    fn provider(&self) -> &'static str {
        "anthropic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization_includes_tools_when_present() {
        let request = AnthropicRequest {
            model: "claude-sonnet-4-5".into(),
            messages: &[ChatMessage::user("hi")],
            max_tokens: 256,
            system: Some("system prompt"),
            temperature: None,
            tools: &[ToolDefinition {
                name: "header_audit".into(),
                description: "audit".into(),
                input_schema: json!({"type": "object", "properties": {}}),
            }],
        };
        let v = serde_json::to_value(&request).unwrap();
        assert_eq!(v["tools"][0]["name"], "header_audit");
        assert_eq!(v["messages"][0]["content"][0]["type"], "text");
        assert!(v.get("temperature").is_none());
    }

    #[test]
    fn test_request_serialization_omits_empty_tools() {
        let request = AnthropicRequest {
            model: "claude-sonnet-4-5".into(),
            messages: &[ChatMessage::user("hi")],
            max_tokens: 256,
            system: None,
            temperature: Some(0.0),
            tools: &[],
        };
        let v = serde_json::to_value(&request).unwrap();
        assert!(v.get("tools").is_none());
        assert!(v.get("system").is_none());
    }

    #[test]
    fn test_response_parsing_maps_blocks() {
        let body = json!({
            "id": "msg_1",
            "model": "claude-sonnet-4-5",
            "content": [
                {"type": "text", "text": "checking"},
                {"type": "tool_use", "id": "tu_1", "name": "jwt_decode", "input": {}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 10, "output_tokens": 5}
        })
        .to_string();
        let parsed: AnthropicResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed.content.len(), 2);
        assert_eq!(parsed.content[1].content_type, "tool_use");
        assert_eq!(parsed.usage.input_tokens, 10);
    }
}
