//! Regex match handler for analyzing previous step outputs.

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::models::{ExecutionContext, Step, StepResult};

use super::StepHandler;

/// Executes `regex_match` steps against previous outputs.
///
/// `source` selects the input: `"last"` (default) or a non-negative index
/// into `previous_outputs`. The captured group is returned as stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexMatchHandler;

impl RegexMatchHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StepHandler for RegexMatchHandler {
    async fn execute(&self, step: &Step, ctx: &mut ExecutionContext) -> StepResult {
        let params = &step.parameters;
        let pattern = params
            .get("pattern")
            .and_then(Value::as_str)
            .unwrap_or(&step.command);
        let capture_group = params
            .get("capture_group")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;

        if ctx.previous_outputs.is_empty() {
            return StepResult::error("No previous outputs available");
        }

        let source = match params.get("source") {
            None => ctx.previous_outputs.last(),
            Some(Value::String(s)) if s == "last" => ctx.previous_outputs.last(),
            Some(value) => match value.as_u64() {
                Some(index) => ctx.previous_outputs.get(index as usize),
                None => None,
            },
        };
        let Some(source) = source else {
            return StepResult::error(format!(
                "source index out of range (outputs: {})",
                ctx.previous_outputs.len()
            ));
        };

        let regex = match Regex::new(pattern) {
            Ok(re) => re,
            Err(e) => return StepResult::error(format!("invalid pattern: {}", e)),
        };

        match regex.captures(source) {
            Some(caps) => {
                let captured = caps
                    .get(capture_group)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default();
                StepResult {
                    stdout: captured,
                    success_criteria_matched: true,
                    ..StepResult::default()
                }
            }
            None => StepResult {
                success_criteria_matched: false,
                ..StepResult::default()
            },
        }
    }
}
