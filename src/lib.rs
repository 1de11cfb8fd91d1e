//! # apa-core
//!
//! An autonomous web-application penetration agent core. Given a target
//! (a pre-recorded HTTP capture, or a live endpoint behind a reverse
//! proxy), the orchestration cycle fingerprints it, reuses or compiles a
//! deterministic test program (an ActionGraph) through an LLM Recon/Critic
//! pair, executes it step by step, classifies failures for a bounded
//! self-repair loop, and records evidence in a knowledge graph keyed by
//! fingerprint hash.
//!
//! ## Core Components
//!
//! - **Fingerprinter**: rule-based target identity from HTTP traffic
//! - **Recon tools**: read-only analyzers over the captured traffic
//! - **Compiler**: Recon ⇒ Critic ⇒ ActionGraph via exploit generators
//! - **Orchestrator**: warm/cold dispatch, step loop, classify, repair
//! - **Repository**: SQLite-backed knowledge graph with repair edges
//!
//! ## Example
//!
//! ```rust,ignore
//! use apa_core::{Fingerprinter, GraphRepository, Orchestrator};
//!
//! let fingerprint = Fingerprinter::new().fingerprint(&transcript);
//! let result = orchestrator.run(fingerprint, &toolbox, "capture.flows").await?;
//! println!("path={} success={:?}", result.path, result.execution);
//! ```

pub mod capture;
pub mod classifier;
pub mod compiler;
pub mod config;
pub mod error;
pub mod events;
pub mod exploits;
pub mod fingerprinter;
pub mod handlers;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod recon;
pub mod repository;

// Re-exports for convenience
pub use capture::{read_flows, render_transcript, Flow, FlowRequest, FlowResponse};
pub use classifier::{classify_failure, FailureKind};
pub use compiler::{plan_to_graph, CompileRequest, Compiler};
pub use config::{CaptureMode, Settings};
pub use error::{Error, Result};
pub use events::{EventBus, RunEvent, StepInfo};
pub use exploits::{generate, get_profile, AuthMechanism, Credentials, TargetProfile};
pub use fingerprinter::Fingerprinter;
pub use handlers::{
    interpolate_step, HandlerRegistry, HttpRequestHandler, RegexMatchHandler,
    ShellCommandHandler, StepHandler,
};
pub use llm::{
    global_budget, AnthropicClient, ChatMessage, ChatRole, ClientConfig, CompletionRequest,
    CompletionResponse, ContentBlock, EmbeddingRequest, EmbeddingResponse, LlmClient, StopReason,
    StructuredAgent, TokenBudget, TokenUsage, ToolAgent, ToolDefinition, ToolDispatcher,
};
pub use models::{
    normalize_target, ActionGraph, AttackOpportunity, AttackPlan, ExecutionContext,
    ExecutionReport, ExploitKind, Finding, Fingerprint, OrchestratorResult, ReconToolKind,
    RunPath, Severity, Step, StepPhase, StepResult, StepType,
};
pub use orchestrator::{Orchestrator, RunGuard};
pub use recon::{recon_tool_definitions, ReconToolbox};
pub use repository::{GraphRepository, RepairRecord, SimilarFingerprint};
