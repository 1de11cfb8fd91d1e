//! Runtime context and result types threaded through a run.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::finding::Finding;
use crate::models::fingerprint::Fingerprint;

/// Runtime context during ActionGraph execution.
///
/// Created fresh on each execute (and again after a repair); never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Base URL of the target application
    pub target_url: String,
    /// Authentication tokens accumulated during execution
    #[serde(default)]
    pub session_tokens: HashMap<String, String>,
    /// Cookies accumulated from Set-Cookie responses
    #[serde(default)]
    pub cookies: HashMap<String, String>,
    /// Stdout of previous successful steps, in completion order
    #[serde(default)]
    pub previous_outputs: Vec<String>,
    /// Target fingerprint for this run
    pub fingerprint: Fingerprint,
}

impl ExecutionContext {
    /// Create a fresh context for a run against the given target.
    pub fn new(target_url: impl Into<String>, fingerprint: Fingerprint) -> Self {
        Self {
            target_url: target_url.into(),
            session_tokens: HashMap::new(),
            cookies: HashMap::new(),
            previous_outputs: Vec::new(),
            fingerprint,
        }
    }
}

/// Result of a single step execution, uniform across all handlers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Standard output from step execution
    #[serde(default)]
    pub stdout: String,
    /// Standard error from step execution
    #[serde(default)]
    pub stderr: String,
    /// HTTP status code or process exit code, if applicable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<i32>,
    /// Whether output matched the step's success_criteria regex
    #[serde(default)]
    pub success_criteria_matched: bool,
}

impl StepResult {
    /// A result carrying only an error message.
    pub fn error(stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            ..Self::default()
        }
    }
}

/// Dispatch branch a run took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPath {
    ColdStart,
    WarmStart,
    Repair,
    Error,
}

impl std::fmt::Display for RunPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ColdStart => "cold_start",
            Self::WarmStart => "warm_start",
            Self::Repair => "repair",
            Self::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of walking an ActionGraph's steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// True when the step loop exhausted without an abort
    pub success: bool,
    /// Findings persisted during this execution
    #[serde(default)]
    pub findings: Vec<Finding>,
    /// Number of step executions performed, retries included
    pub steps_executed: u32,
    /// Error output of the step that ended the run, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_log: Option<String>,
    /// Whether a repair happened during this execution
    #[serde(default)]
    pub repaired: bool,
}

/// Final result returned by the orchestrator for every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorResult {
    /// Which dispatch branch the run took
    pub path: RunPath,
    /// ID of the ActionGraph that was executed, when one exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_graph_id: Option<String>,
    /// Execution outcome, absent when compilation failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionReport>,
    /// Whether this run compiled a new graph
    pub compiled: bool,
    /// Whether this run performed a repair
    pub repaired: bool,
}
