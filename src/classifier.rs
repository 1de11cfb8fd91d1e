//! Deterministic failure classification for self-repair tier selection.
//!
//! Obvious failures are classified without any LLM involvement; only
//! ambiguous cases fall through to the systemic tier, which is the one
//! that triggers recompilation.

use serde::{Deserialize, Serialize};

/// Self-repair failure classification tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Retry the step immediately (network/load issues)
    TransientRecoverable,
    /// Abort the run (session/endpoint lost)
    TransientUnrecoverable,
    /// Recompile with repair context (unknown/ambiguous)
    Systemic,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::TransientRecoverable => "transient_recoverable",
            Self::TransientUnrecoverable => "transient_unrecoverable",
            Self::Systemic => "systemic",
        };
        write!(f, "{}", s)
    }
}

const RECOVERABLE_MARKERS: [&str; 3] = ["timeout", "timed out", "connection reset"];
const UNRECOVERABLE_MARKERS: [&str; 3] = ["session expired", "unauthorized", "forbidden"];

/// Classify a step execution failure into a repair tier.
///
/// Total function: every `(error_log, status_code)` pair maps to exactly
/// one tier. Rules are evaluated top to bottom over the lower-cased text.
pub fn classify_failure(error_log: &str, status_code: i32) -> FailureKind {
    let error_lower = error_log.to_lowercase();

    if matches!(status_code, 429 | 503) {
        return FailureKind::TransientRecoverable;
    }
    if RECOVERABLE_MARKERS.iter().any(|m| error_lower.contains(m)) {
        return FailureKind::TransientRecoverable;
    }

    if matches!(status_code, 401 | 403 | 404) {
        return FailureKind::TransientUnrecoverable;
    }
    if UNRECOVERABLE_MARKERS.iter().any(|m| error_lower.contains(m)) {
        return FailureKind::TransientUnrecoverable;
    }

    FailureKind::Systemic
}
