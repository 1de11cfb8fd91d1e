//! Application configuration via environment variables.
//!
//! A `.env` file is honored when present. Only the LLM API key is
//! mandatory; everything else has a default matching a local lab setup.

use crate::error::{Error, Result};

/// Where the run's traffic comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// Pre-recorded capture file
    File,
    /// Live target behind a reverse proxy
    Live,
}

impl std::str::FromStr for CaptureMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "file" => Ok(Self::File),
            "live" => Ok(Self::Live),
            other => Err(format!("unknown capture mode: {:?}", other)),
        }
    }
}

/// Application settings loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Path of the SQLite knowledge graph store
    pub store_path: String,
    /// Anthropic API key
    pub anthropic_api_key: String,
    /// Model identifier
    pub model_id: String,
    /// Base URL of the target application
    pub target_url: String,
    /// Max Recon/Critic iterations per compile
    pub max_critic_iterations: u32,
    /// Cosine threshold for similarity matches
    pub similarity_threshold: f64,
    /// Process-wide token budget
    pub max_token_budget: u64,
    /// Embedding model identifier
    pub embedding_model: String,
    /// Embedding vector dimensions
    pub embedding_dimensions: usize,
    /// Traffic source mode
    pub capture_mode: CaptureMode,
    /// Path of the capture file (file mode)
    pub traffic_file: String,
    /// Active target profile name
    pub target_profile: String,
    /// Log filter (tracing EnvFilter syntax)
    pub log_level: String,
}

impl Settings {
    /// Load settings from the process environment (and `.env`, if any).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let anthropic_api_key = lookup("ANTHROPIC_API_KEY")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::config("ANTHROPIC_API_KEY is not set"))?;

        let store_path = expand(&string_or(&lookup, "GRAPH_STORE_PATH", "apa-core.db"));
        let traffic_file = expand(&string_or(
            &lookup,
            "TRAFFIC_FILE",
            "demo/juice_shop.flows",
        ));

        Ok(Self {
            store_path,
            anthropic_api_key,
            model_id: string_or(&lookup, "MODEL_ID", "claude-sonnet-4-5"),
            target_url: string_or(&lookup, "TARGET_URL", "http://localhost:3000"),
            max_critic_iterations: parse_or(&lookup, "MAX_CRITIC_ITERATIONS", 3)?,
            similarity_threshold: parse_or(&lookup, "SIMILARITY_THRESHOLD", 0.85)?,
            max_token_budget: parse_or(&lookup, "MAX_TOKEN_BUDGET", 50_000)?,
            embedding_model: string_or(&lookup, "EMBEDDING_MODEL", "all-MiniLM-L6-v2"),
            embedding_dimensions: parse_or(&lookup, "EMBEDDING_DIMENSIONS", 384)?,
            capture_mode: parse_or(&lookup, "CAPTURE_MODE", CaptureMode::File)?,
            traffic_file,
            target_profile: string_or(&lookup, "TARGET_PROFILE", "juice_shop"),
            log_level: string_or(&lookup, "LOG_LEVEL", "info"),
        })
    }
}

fn string_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    lookup(key)
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse()
            .map_err(|e| Error::config(format!("invalid {}: {}", key, e))),
        None => Ok(default),
    }
}

fn expand(path: &str) -> String {
    shellexpand::tilde(path).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        move |key| map.get(key).map(|v| v.to_string())
    }

    #[test]
    fn test_defaults_apply() {
        let settings =
            Settings::from_lookup(lookup_from(&[("ANTHROPIC_API_KEY", "sk-test")])).unwrap();
        assert_eq!(settings.model_id, "claude-sonnet-4-5");
        assert_eq!(settings.max_critic_iterations, 3);
        assert_eq!(settings.max_token_budget, 50_000);
        assert_eq!(settings.embedding_dimensions, 384);
        assert_eq!(settings.capture_mode, CaptureMode::File);
        assert_eq!(settings.target_profile, "juice_shop");
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        let err = Settings::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn test_overrides_parse() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("MAX_CRITIC_ITERATIONS", "5"),
            ("CAPTURE_MODE", "live"),
            ("MAX_TOKEN_BUDGET", "100000"),
        ]))
        .unwrap();
        assert_eq!(settings.max_critic_iterations, 5);
        assert_eq!(settings.capture_mode, CaptureMode::Live);
        assert_eq!(settings.max_token_budget, 100_000);
    }

    #[test]
    fn test_bad_number_is_config_error() {
        let err = Settings::from_lookup(lookup_from(&[
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("MAX_CRITIC_ITERATIONS", "many"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("MAX_CRITIC_ITERATIONS"));
    }

    #[test]
    fn test_tilde_paths_expand() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("TRAFFIC_FILE", "~/captures/app.flows"),
        ]))
        .unwrap();
        assert!(!settings.traffic_file.starts_with('~'));
    }
}
