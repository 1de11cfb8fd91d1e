//! Error types for apa-core.

use thiserror::Error;

/// Result type alias using apa-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during orchestration.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input (capture file, transcript, plan schema)
    #[error("Input error: {0}")]
    Input(String),

    /// LLM API error
    #[error("LLM API error: {provider} - {message}")]
    LlmApi { provider: String, message: String },

    /// LLM error (simple variant)
    #[error("LLM error: {0}")]
    Llm(String),

    /// Compilation exhausted all critic iterations
    #[error("Compilation failed after {iterations} iterations")]
    CompilationExhausted { iterations: u32 },

    /// Token budget exhausted
    #[error("Token budget exhausted: {used}/{budget}")]
    BudgetExhausted { used: u64, budget: u64 },

    /// No handler registered for a step type
    #[error("No handler registered for step type: {0}")]
    UnknownHandler(String),

    /// Unknown exploit name in a refined plan
    #[error("Unknown exploit: {0}")]
    UnknownExploit(String),

    /// Exploit generator rejected the target profile
    #[error("Exploit {exploit} requires {required} auth, profile uses {actual}")]
    ProfileMismatch {
        exploit: String,
        required: String,
        actual: String,
    },

    /// Unknown target profile name
    #[error("Unknown target profile: {0}")]
    UnknownProfile(String),

    /// Knowledge graph store error
    #[error("Repository error: {0}")]
    Repository(String),

    /// Another run is already active in this process
    #[error("A run is already active")]
    RunActive,

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an input-shape error.
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input(message.into())
    }

    /// Create an LLM API error.
    pub fn llm_api(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LlmApi {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a budget exhausted error.
    pub fn budget_exhausted(used: u64, budget: u64) -> Self {
        Self::BudgetExhausted { used, budget }
    }

    /// Create a repository error.
    pub fn repository(message: impl Into<String>) -> Self {
        Self::Repository(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Repository(err.to_string())
    }
}
