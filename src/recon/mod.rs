//! Read-only recon analyzers over a captured traffic file.

pub mod tools;

pub use tools::{recon_tool_definitions, ReconToolbox};
