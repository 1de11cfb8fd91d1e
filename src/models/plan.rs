//! AttackPlan model: the structured output of the Recon and Critic agents.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Recon tools the agents may cite as evidence sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconToolKind {
    ResponseInspect,
    JwtDecode,
    HeaderAudit,
    ResponseDiff,
}

impl std::fmt::Display for ReconToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ResponseInspect => "response_inspect",
            Self::JwtDecode => "jwt_decode",
            Self::HeaderAudit => "header_audit",
            Self::ResponseDiff => "response_diff",
        };
        write!(f, "{}", s)
    }
}

/// The fixed exploit vocabulary the plan may prescribe from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExploitKind {
    IdorWalk,
    AuthStrip,
    TokenSwap,
    NamespaceProbe,
    RoleTamper,
}

impl ExploitKind {
    /// All exploit kinds, in prescription-table order.
    pub const ALL: [ExploitKind; 5] = [
        Self::IdorWalk,
        Self::AuthStrip,
        Self::TokenSwap,
        Self::NamespaceProbe,
        Self::RoleTamper,
    ];
}

impl std::fmt::Display for ExploitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::IdorWalk => "idor_walk",
            Self::AuthStrip => "auth_strip",
            Self::TokenSwap => "token_swap",
            Self::NamespaceProbe => "namespace_probe",
            Self::RoleTamper => "role_tamper",
        };
        write!(f, "{}", s)
    }
}

/// Suspected vulnerability identified from recon observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackOpportunity {
    /// Short name of the opportunity (e.g. "IDOR on user records")
    pub opportunity: String,
    /// Which recon tool surfaced the evidence
    pub recon_tool_used: ReconToolKind,
    /// Specific observation from the tool output
    pub observation: String,
    /// The suspected developer-assumption gap
    pub suspected_gap: String,
    /// Which exploit to run
    pub recommended_exploit: ExploitKind,
    /// Concrete URL path with real IDs from the traffic, not a template
    pub exploit_target: String,
    /// Why this exploit confirms or refutes the gap
    pub exploit_reasoning: String,
}

/// Priority-ordered list of attack opportunities.
///
/// Transient between Recon and Compiler; never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttackPlan {
    #[serde(default)]
    pub opportunities: Vec<AttackOpportunity>,
}

static TEMPLATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[^{}]*\}").expect("template regex"));

/// Rewrite curly-brace path templates to a literal numeric ID.
///
/// `/api/Users/{id}` becomes `/api/Users/1`. Concrete paths pass through
/// unchanged.
pub fn normalize_target(path: &str) -> String {
    TEMPLATE_RE.replace_all(path, "1").into_owned()
}

impl AttackPlan {
    /// Validate and normalize the plan in place.
    ///
    /// Every `exploit_target` must end up a concrete path; templated
    /// segments are rewritten to literal IDs.
    pub fn normalize(&mut self) {
        for opp in &mut self.opportunities {
            opp.exploit_target = normalize_target(&opp.exploit_target);
        }
    }

    /// The top-priority opportunity, if any.
    pub fn top(&self) -> Option<&AttackOpportunity> {
        self.opportunities.first()
    }
}
