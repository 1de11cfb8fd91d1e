//! Step model: a single execution primitive within an ActionGraph.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// CAMRO phases: Capture, Analyze, Mutate, Replay, Observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StepPhase {
    Capture,
    Analyze,
    Mutate,
    Replay,
    Observe,
}

impl std::fmt::Display for StepPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Capture => "CAPTURE",
            Self::Analyze => "ANALYZE",
            Self::Mutate => "MUTATE",
            Self::Replay => "REPLAY",
            Self::Observe => "OBSERVE",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for StepPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CAPTURE" => Ok(Self::Capture),
            "ANALYZE" => Ok(Self::Analyze),
            "MUTATE" => Ok(Self::Mutate),
            "REPLAY" => Ok(Self::Replay),
            "OBSERVE" => Ok(Self::Observe),
            other => Err(format!("unknown step phase: {}", other)),
        }
    }
}

/// Handler dispatch keys for step execution.
///
/// A closed, enumerated sum: only these kinds can appear in an ActionGraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    HttpRequest,
    ShellCommand,
    RegexMatch,
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::HttpRequest => "http_request",
            Self::ShellCommand => "shell_command",
            Self::RegexMatch => "regex_match",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for StepType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http_request" => Ok(Self::HttpRequest),
            "shell_command" => Ok(Self::ShellCommand),
            "regex_match" => Ok(Self::RegexMatch),
            other => Err(format!("unknown step type: {}", other)),
        }
    }
}

/// Individual execution step within an ActionGraph (CAMRO phase).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Execution order within the ActionGraph, dense starting at 1
    pub order: u32,
    /// CAMRO phase
    pub phase: StepPhase,
    /// Handler dispatch key
    #[serde(rename = "type")]
    pub step_type: StepType,
    /// Exact command to execute
    pub command: String,
    /// Step-specific parameters (stored as an opaque JSON blob)
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Where to store output (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
    /// Regex pattern for validation (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_criteria: Option<String>,
    /// True if no LLM reasoning is required for execution
    #[serde(default = "default_deterministic")]
    pub deterministic: bool,
}

fn default_deterministic() -> bool {
    true
}

impl Step {
    /// Create a step with empty parameters.
    pub fn new(order: u32, phase: StepPhase, step_type: StepType, command: impl Into<String>) -> Self {
        Self {
            order,
            phase,
            step_type,
            command: command.into(),
            parameters: Map::new(),
            output_file: None,
            success_criteria: None,
            deterministic: true,
        }
    }

    /// Set a parameter value.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Set the success criteria regex.
    pub fn with_success_criteria(mut self, pattern: impl Into<String>) -> Self {
        self.success_criteria = Some(pattern.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_type_round_trips_through_snake_case() {
        let json = serde_json::to_string(&StepType::HttpRequest).unwrap();
        assert_eq!(json, "\"http_request\"");
        let back: StepType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, StepType::HttpRequest);
    }

    #[test]
    fn test_phase_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&StepPhase::Observe).unwrap(),
            "\"OBSERVE\""
        );
    }

    #[test]
    fn test_deterministic_defaults_to_true() {
        let step: Step = serde_json::from_value(json!({
            "order": 1,
            "phase": "CAPTURE",
            "type": "http_request",
            "command": "GET /"
        }))
        .unwrap();
        assert!(step.deterministic);
        assert!(step.parameters.is_empty());
    }

    #[test]
    fn test_builder_sets_params_and_criteria() {
        let step = Step::new(2, StepPhase::Observe, StepType::RegexMatch, "match")
            .with_param("pattern", "token")
            .with_success_criteria("token");
        assert_eq!(step.parameters["pattern"], json!("token"));
        assert_eq!(step.success_criteria.as_deref(), Some("token"));
    }
}
