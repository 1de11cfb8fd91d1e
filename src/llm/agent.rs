//! The two agent shapes: structured single-call and iterative tool-use.
//!
//! A [`StructuredAgent`] makes one schema-constrained call and parses the
//! reply into a typed output. A [`ToolAgent`] alternates model calls with
//! synchronous tool execution on the host until the model produces a final
//! structured output or the iteration cap is reached. Both charge the
//! shared token budget on every call.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::budget::TokenBudget;
use super::client::LlmClient;
use super::types::{
    ChatMessage, ChatRole, CompletionRequest, CompletionResponse, ContentBlock, StopReason,
    ToolDefinition,
};

/// Cap per content block echoed back to the model, to prevent context
/// explosion from large tool results.
const MAX_BLOCK_CHARS: usize = 8_192;

/// Executes tool calls issued by the model.
///
/// Execution errors are returned as textual results rather than raised, so
/// the model can adapt.
pub trait ToolDispatcher: Send + Sync {
    fn dispatch(&self, name: &str, input: &Value) -> String;
}

/// No-tool agent: one model call with a schema-constrained output.
pub struct StructuredAgent {
    client: Arc<dyn LlmClient>,
    budget: Arc<TokenBudget>,
    system_prompt: String,
    model: Option<String>,
    max_tokens: u32,
}

impl StructuredAgent {
    pub fn new(
        client: Arc<dyn LlmClient>,
        budget: Arc<TokenBudget>,
        system_prompt: impl Into<String>,
        model: Option<String>,
        max_tokens: u32,
    ) -> Self {
        Self {
            client,
            budget,
            system_prompt: system_prompt.into(),
            model,
            max_tokens,
        }
    }

    /// Run one call and parse the reply as `T`.
    pub async fn run<T: DeserializeOwned>(&self, prompt: &str) -> Result<T> {
        self.budget.check()?;

        let response = self
            .client
            .complete(CompletionRequest {
                model: self.model.clone(),
                system: Some(self.system_prompt.clone()),
                messages: vec![ChatMessage::user(prompt)],
                max_tokens: Some(self.max_tokens),
                temperature: None,
                tools: Vec::new(),
            })
            .await?;
        charge_and_log(&self.budget, &response);

        if response.stop_reason == Some(StopReason::MaxTokens) {
            return Err(Error::Llm("Response truncated (max_tokens reached)".into()));
        }
        parse_structured(&response.text())
    }
}

/// Tool-using agent: iterative call loop over host-executed tools.
pub struct ToolAgent {
    client: Arc<dyn LlmClient>,
    budget: Arc<TokenBudget>,
    system_prompt: String,
    model: Option<String>,
    max_tokens: u32,
    tools: Vec<ToolDefinition>,
    max_iterations: u32,
}

impl ToolAgent {
    pub fn new(
        client: Arc<dyn LlmClient>,
        budget: Arc<TokenBudget>,
        system_prompt: impl Into<String>,
        model: Option<String>,
        max_tokens: u32,
        tools: Vec<ToolDefinition>,
        max_iterations: u32,
    ) -> Self {
        Self {
            client,
            budget,
            system_prompt: system_prompt.into(),
            model,
            max_tokens,
            tools,
            max_iterations,
        }
    }

    /// Run the loop until the model produces a final structured output.
    pub async fn run<T: DeserializeOwned>(
        &self,
        prompt: &str,
        dispatcher: &dyn ToolDispatcher,
    ) -> Result<T> {
        let mut messages = vec![ChatMessage::user(prompt)];

        for iteration in 0..self.max_iterations {
            self.budget.check()?;

            let response = self
                .client
                .complete(CompletionRequest {
                    model: self.model.clone(),
                    system: Some(self.system_prompt.clone()),
                    messages: messages.clone(),
                    max_tokens: Some(self.max_tokens),
                    temperature: None,
                    tools: self.tools.clone(),
                })
                .await?;
            charge_and_log(&self.budget, &response);

            match response.stop_reason {
                Some(StopReason::ToolUse) => {
                    let tool_uses: Vec<(String, String, Value)> = response
                        .tool_uses()
                        .into_iter()
                        .map(|(id, name, input)| (id.to_string(), name.to_string(), input.clone()))
                        .collect();

                    messages.push(ChatMessage::assistant(sanitize_content(response.content)));

                    let mut results = Vec::new();
                    for (id, name, input) in tool_uses {
                        debug!(tool = %name, iteration, "dispatching tool call");
                        let output = dispatcher.dispatch(&name, &input);
                        results.push(ContentBlock::ToolResult {
                            tool_use_id: id,
                            content: truncate_block(output),
                        });
                    }
                    if results.is_empty() {
                        warn!(iteration, "tool_use stop with no tool_use blocks");
                        return Err(Error::Llm("tool_use stop without tool calls".into()));
                    }
                    messages.push(ChatMessage {
                        role: ChatRole::User,
                        content: results,
                    });
                }
                Some(StopReason::MaxTokens) => {
                    return Err(Error::Llm("Response truncated (max_tokens reached)".into()));
                }
                _ => return parse_structured(&response.text()),
            }
        }

        Err(Error::Llm(format!(
            "Tool agent exceeded {} iterations",
            self.max_iterations
        )))
    }
}

fn charge_and_log(budget: &TokenBudget, response: &CompletionResponse) {
    budget.charge(response.usage.total());
    debug!(
        model = %response.model,
        input = response.usage.input_tokens,
        output = response.usage.output_tokens,
        cumulative = budget.used(),
        budget = budget.max(),
        "API call"
    );
}

/// Reshape assistant content for re-sending, only where the raw form would
/// be malformed or oversized.
fn sanitize_content(content: Vec<ContentBlock>) -> Vec<ContentBlock> {
    content
        .into_iter()
        .map(|block| match block {
            // A tool_use input that arrived as a bare string must go back
            // as an object.
            ContentBlock::ToolUse {
                id,
                name,
                input: Value::String(s),
            } => ContentBlock::ToolUse {
                id,
                name,
                input: if s.is_empty() {
                    json!({})
                } else {
                    json!({ "command": s })
                },
            },
            ContentBlock::Text { text } => ContentBlock::Text {
                text: truncate_block(text),
            },
            ContentBlock::ToolResult {
                tool_use_id,
                content,
            } => ContentBlock::ToolResult {
                tool_use_id,
                content: truncate_block(content),
            },
            other => other,
        })
        .collect()
}

fn truncate_block(text: String) -> String {
    if text.len() <= MAX_BLOCK_CHARS {
        return text;
    }
    let mut cut = MAX_BLOCK_CHARS;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n...[TRUNCATED]...", &text[..cut])
}

/// Parse a model reply into `T`, tolerating code fences and prose around
/// the JSON payload.
fn parse_structured<T: DeserializeOwned>(text: &str) -> Result<T> {
    let candidate = extract_json(text)
        .ok_or_else(|| Error::Llm(format!("No parsed output in reply: {:.120}", text)))?;
    serde_json::from_str(candidate)
        .map_err(|e| Error::Llm(format!("Structured output violated schema: {}", e)))
}

fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(stripped) = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
    {
        if let Some(inner) = stripped.split("```").next() {
            return Some(inner.trim());
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end >= start).then(|| &trimmed[start..=end])
}
