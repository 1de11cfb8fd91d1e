//! Typed run milestones for observers.
//!
//! The core publishes milestones on an [`EventBus`]; an out-of-process
//! monitor (SSE or otherwise) subscribes and renders them. Publishing
//! never blocks and never fails when nobody is listening.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::classifier::FailureKind;
use crate::models::{RunPath, Step, StepPhase, StepType};

/// Step summary carried in the run-start milestone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepInfo {
    pub order: u32,
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub phase: StepPhase,
    pub command: String,
}

impl From<&Step> for StepInfo {
    fn from(step: &Step) -> Self {
        Self {
            order: step.order,
            step_type: step.step_type,
            phase: step.phase,
            command: step.command.clone(),
        }
    }
}

/// One milestone in a run's lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStart {
        fingerprint_hash: String,
        path: RunPath,
        action_graph_id: String,
        steps: Vec<StepInfo>,
    },
    StepStart {
        order: u32,
    },
    StepResult {
        order: u32,
        #[serde(rename = "step_type")]
        step_type: StepType,
        matched: bool,
    },
    CompileIter {
        iteration: u32,
    },
    ReconResult {
        iteration: u32,
        opportunities: usize,
    },
    CriticResult {
        iteration: u32,
        opportunities: usize,
        exploits: Vec<String>,
    },
    Failure {
        step: u32,
        kind: FailureKind,
    },
    RepairStart,
    RunEnd {
        success: bool,
        findings_count: usize,
        path: RunPath,
        repaired: bool,
        steps_executed: u32,
    },
}

/// Broadcast channel for run milestones.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RunEvent>,
}

impl EventBus {
    /// Create a bus with the given subscriber backlog.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to future milestones.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }

    /// Publish a milestone. Dropped silently when nobody subscribes.
    pub fn publish(&self, event: RunEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
