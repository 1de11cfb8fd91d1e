//! Step handlers: tiny deterministic executors, one per step kind.
//!
//! Handlers never raise across the execution boundary; failures come back
//! as `StepResult` with a populated `stderr`. The only exceptional path is
//! asking the registry for a kind it does not know.

pub mod http;
pub mod interpolate;
pub mod regex_match;
pub mod shell;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{ExecutionContext, Step, StepResult, StepType};

pub use http::HttpRequestHandler;
pub use interpolate::interpolate_step;
pub use regex_match::RegexMatchHandler;
pub use shell::ShellCommandHandler;

/// A deterministic executor for one step kind.
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Execute a step against the running context.
    async fn execute(&self, step: &Step, ctx: &mut ExecutionContext) -> StepResult;
}

/// Dispatch table from step kind to handler.
pub struct HandlerRegistry {
    handlers: HashMap<StepType, Arc<dyn StepHandler>>,
}

impl HandlerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// The standard registry with all three built-in handlers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(StepType::HttpRequest, Arc::new(HttpRequestHandler::new()));
        registry.register(StepType::ShellCommand, Arc::new(ShellCommandHandler::new()));
        registry.register(StepType::RegexMatch, Arc::new(RegexMatchHandler::new()));
        registry
    }

    /// Register (or replace) the handler for a step kind.
    pub fn register(&mut self, step_type: StepType, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(step_type, handler);
    }

    /// Look up the handler for a step kind.
    pub fn get(&self, step_type: StepType) -> Result<Arc<dyn StepHandler>> {
        self.handlers
            .get(&step_type)
            .cloned()
            .ok_or_else(|| Error::UnknownHandler(step_type.to_string()))
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
