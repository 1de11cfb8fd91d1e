//! Finding model: evidence of a confirmed observation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// Discovered vulnerability or observation from an ActionGraph execution.
///
/// Findings are append-only and owned by the ActionGraph that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// UUID. Computed, not LLM-generated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Vulnerability description
    pub observation: String,
    /// Severity level
    pub severity: Severity,
    /// Proof of exploitation
    pub evidence_summary: String,
    /// URL where the vulnerability was found
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
    /// 384-dimensional vector for similarity search
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation_embedding: Option<Vec<f32>>,
    /// ISO8601 timestamp of discovery
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovered_at: Option<String>,
}

impl Finding {
    /// Create a finding with the given observation, severity and evidence.
    pub fn new(
        observation: impl Into<String>,
        severity: Severity,
        evidence_summary: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            observation: observation.into(),
            severity,
            evidence_summary: evidence_summary.into(),
            target_url: None,
            observation_embedding: None,
            discovered_at: None,
        }
    }

    /// Ensure the ID is generated.
    pub fn ensure_id(&mut self) -> &str {
        if self.id.is_none() {
            self.id = Some(Uuid::new_v4().to_string());
        }
        self.id.as_deref().unwrap_or_default()
    }

    /// The medium-severity finding recorded when an OBSERVE step's success
    /// criterion matches. Evidence keeps the first 500 bytes of stdout.
    pub fn from_matched_criteria(step_order: u32, stdout: &str, target_url: &str) -> Self {
        let mut evidence = stdout.to_string();
        if evidence.len() > 500 {
            let mut cut = 500;
            while !evidence.is_char_boundary(cut) {
                cut -= 1;
            }
            evidence.truncate(cut);
        }
        let mut finding = Self::new(
            format!("Success criteria matched at step {}", step_order),
            Severity::Medium,
            evidence,
        );
        finding.target_url = Some(target_url.to_string());
        finding
    }
}
