//! Fingerprint model: content-hashable target identity.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Target identity and characteristics, used for matching similar targets.
///
/// Equal-hash fingerprints are equal: the hash over
/// `tech_stack|auth_model|endpoint_pattern` is the identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// SHA256 of `tech_stack|auth_model|endpoint_pattern`. Computed, not LLM-generated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Technology stack description (e.g. "Express")
    pub tech_stack: String,
    /// Authentication model (e.g. "JWT Bearer")
    pub auth_model: String,
    /// API endpoint pattern (e.g. "/api/*")
    pub endpoint_pattern: String,
    /// Security indicators (e.g. ["CORS permissive", "no CSP"])
    #[serde(default)]
    pub security_signals: Vec<String>,
    /// Original text used for embedding generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation_text: Option<String>,
    /// 384-dimensional vector for similarity search
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation_embedding: Option<Vec<f32>>,
}

impl Fingerprint {
    /// Create a fingerprint from its identity fields.
    pub fn new(
        tech_stack: impl Into<String>,
        auth_model: impl Into<String>,
        endpoint_pattern: impl Into<String>,
        security_signals: Vec<String>,
    ) -> Self {
        Self {
            hash: None,
            tech_stack: tech_stack.into(),
            auth_model: auth_model.into(),
            endpoint_pattern: endpoint_pattern.into(),
            security_signals,
            observation_text: None,
            observation_embedding: None,
        }
    }

    /// Compute the SHA256 hash of the normalized fingerprint identity.
    pub fn compute_hash(&self) -> String {
        let normalized = format!(
            "{}|{}|{}",
            self.tech_stack, self.auth_model, self.endpoint_pattern
        );
        let digest = Sha256::digest(normalized.as_bytes());
        format!("{:x}", digest)
    }

    /// Ensure the hash is computed and stored.
    pub fn ensure_hash(&mut self) -> &str {
        if self.hash.is_none() {
            self.hash = Some(self.compute_hash());
        }
        self.hash.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_hash_is_64_hex_chars() {
        let mut fp = Fingerprint::new("Express", "JWT Bearer", "/api/*", vec![]);
        let hash = fp.ensure_hash().to_string();
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hash_depends_only_on_identity_fields() {
        let mut a = Fingerprint::new("Express", "JWT Bearer", "/api/*", vec!["no CSP".into()]);
        let mut b = Fingerprint::new("Express", "JWT Bearer", "/api/*", vec![]);
        b.observation_text = Some("different".into());
        assert_eq!(a.ensure_hash(), b.ensure_hash());
    }

    #[test]
    fn test_ensure_hash_is_idempotent() {
        let mut fp = Fingerprint::new("nginx", "Cookie-based", "/rest/*", vec![]);
        let first = fp.ensure_hash().to_string();
        let second = fp.ensure_hash().to_string();
        assert_eq!(first, second);
    }
}
