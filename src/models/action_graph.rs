//! ActionGraph model: the compiled, reusable test program.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::step::Step;

/// Compiled workflow logic, the reusable asset that executes deterministically.
///
/// An ActionGraph exclusively owns its steps: deleting a graph deletes its
/// steps, and repair replaces steps wholesale in the stored chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionGraph {
    /// UUID. Computed, not LLM-generated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Type of vulnerability tested (e.g. "IDOR", "auth_bypass")
    pub vulnerability_type: String,
    /// Human-readable explanation of what this graph tests
    pub description: String,
    /// Ordered CAMRO steps to execute
    pub steps: Vec<Step>,
    /// Quality score from Recon/Critic validation (0.0-1.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Total execution count
    #[serde(default)]
    pub times_executed: u64,
    /// Successful execution count
    #[serde(default)]
    pub times_succeeded: u64,
    /// ISO8601 timestamp of compilation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// ISO8601 timestamp of last modification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl ActionGraph {
    /// Create a graph with the given vulnerability type, description and steps.
    pub fn new(
        vulnerability_type: impl Into<String>,
        description: impl Into<String>,
        steps: Vec<Step>,
    ) -> Self {
        Self {
            id: None,
            vulnerability_type: vulnerability_type.into(),
            description: description.into(),
            steps,
            confidence: None,
            times_executed: 0,
            times_succeeded: 0,
            created_at: None,
            updated_at: None,
        }
    }

    /// Ensure the ID is generated.
    pub fn ensure_id(&mut self) -> &str {
        if self.id.is_none() {
            self.id = Some(Uuid::new_v4().to_string());
        }
        self.id.as_deref().unwrap_or_default()
    }

    /// Compute the success rate as a decimal (0.0-1.0).
    pub fn success_rate(&self) -> f64 {
        if self.times_executed == 0 {
            return 0.0;
        }
        self.times_succeeded as f64 / self.times_executed as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_id_generates_once() {
        let mut ag = ActionGraph::new("IDOR", "walk user ids", vec![]);
        let first = ag.ensure_id().to_string();
        let second = ag.ensure_id().to_string();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn test_success_rate() {
        let mut ag = ActionGraph::new("IDOR", "walk user ids", vec![]);
        assert_eq!(ag.success_rate(), 0.0);
        ag.times_executed = 4;
        ag.times_succeeded = 3;
        assert_eq!(ag.success_rate(), 0.75);
    }
}
