//! Main orchestration loop: cold start, warm start, and self-repair.
//!
//! State machine per run: fingerprint → warm-start lookup → compile if
//! needed → step loop → classify failures → at most one repair →
//! record metrics. `times_executed` is bumped exactly once per run at
//! termination; `times_succeeded` only when the step loop exhausts
//! without an abort.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::classifier::{classify_failure, FailureKind};
use crate::compiler::prompts::assemble_repair_context;
use crate::compiler::{CompileRequest, Compiler};
use crate::error::{Error, Result};
use crate::events::{EventBus, RunEvent, StepInfo};
use crate::exploits::TargetProfile;
use crate::handlers::{interpolate_step, HandlerRegistry};
use crate::models::{
    ActionGraph, ExecutionContext, ExecutionReport, Finding, Fingerprint, OrchestratorResult,
    RunPath, Step, StepPhase, StepResult,
};
use crate::recon::ReconToolbox;
use crate::repository::GraphRepository;

static RUN_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Process-wide single-active-run guard.
///
/// Held by the operator surface around [`Orchestrator::run`]: a second
/// start while a run is live fails with [`Error::RunActive`]. Dropping
/// releases the slot.
pub struct RunGuard(());

impl RunGuard {
    pub fn acquire() -> Result<Self> {
        if RUN_ACTIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::RunActive);
        }
        Ok(Self(()))
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        RUN_ACTIVE.store(false, Ordering::SeqCst);
    }
}

enum FailureAction {
    Retry,
    Abort,
    Repair,
}

/// Decides cold/warm start, executes the graph, handles repair.
pub struct Orchestrator {
    repo: Arc<GraphRepository>,
    compiler: Compiler,
    registry: HandlerRegistry,
    bus: EventBus,
    target_url: String,
    profile: &'static TargetProfile,
}

impl Orchestrator {
    pub fn new(
        repo: Arc<GraphRepository>,
        compiler: Compiler,
        registry: HandlerRegistry,
        bus: EventBus,
        target_url: impl Into<String>,
        profile: &'static TargetProfile,
    ) -> Self {
        Self {
            repo,
            compiler,
            registry,
            bus,
            target_url: target_url.into(),
            profile,
        }
    }

    /// The bus this orchestrator publishes milestones on.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Main entry point for one run.
    ///
    /// A raised error still emits a terminal `run_end` milestone with
    /// `path = "error"` before propagating.
    pub async fn run(
        &self,
        fingerprint: Fingerprint,
        toolbox: &ReconToolbox,
        capture_label: &str,
    ) -> Result<OrchestratorResult> {
        match self.run_inner(fingerprint, toolbox, capture_label).await {
            Ok(result) => Ok(result),
            Err(err) => {
                error!(%err, "run failed");
                self.bus.publish(RunEvent::RunEnd {
                    success: false,
                    findings_count: 0,
                    path: RunPath::Error,
                    repaired: false,
                    steps_executed: 0,
                });
                Err(err)
            }
        }
    }

    async fn run_inner(
        &self,
        mut fingerprint: Fingerprint,
        toolbox: &ReconToolbox,
        capture_label: &str,
    ) -> Result<OrchestratorResult> {
        fingerprint.ensure_hash();
        self.repo.save_fingerprint(&mut fingerprint)?;
        let hash = fingerprint.hash.clone().unwrap_or_default();

        let mut compiled = false;
        let mut graph = match self.repo.get_action_graph_with_steps(&hash)? {
            Some(graph) => {
                info!(hash = %short(&hash), "warm start");
                graph
            }
            None => {
                info!(hash = %short(&hash), "cold start: compiling");
                let request = CompileRequest {
                    toolbox,
                    capture_label,
                    profile: self.profile,
                    repair_context: None,
                };
                let mut graph = self.compiler.compile(&request, &self.bus).await?;
                self.repo.save_action_graph(&hash, &mut graph)?;
                compiled = true;
                graph
            }
        };

        self.bus.publish(RunEvent::RunStart {
            fingerprint_hash: hash.clone(),
            path: if compiled {
                RunPath::ColdStart
            } else {
                RunPath::WarmStart
            },
            action_graph_id: graph.id.clone().unwrap_or_default(),
            steps: graph.steps.iter().map(StepInfo::from).collect(),
        });

        let report = self
            .execute(&mut graph, &fingerprint, &hash, toolbox, capture_label)
            .await?;

        let graph_id = graph.id.clone().unwrap_or_default();
        self.repo
            .increment_execution_count(&graph_id, report.success)?;

        let repaired = report.repaired;
        let path = if repaired {
            RunPath::Repair
        } else if compiled {
            RunPath::ColdStart
        } else {
            RunPath::WarmStart
        };

        self.bus.publish(RunEvent::RunEnd {
            success: report.success,
            findings_count: report.findings.len(),
            path,
            repaired,
            steps_executed: report.steps_executed,
        });

        Ok(OrchestratorResult {
            path,
            action_graph_id: Some(graph_id),
            execution: Some(report),
            compiled,
            repaired,
        })
    }

    /// Walk steps in order, dispatch to handlers, thread context, collect
    /// findings, classify failures.
    async fn execute(
        &self,
        graph: &mut ActionGraph,
        fingerprint: &Fingerprint,
        fingerprint_hash: &str,
        toolbox: &ReconToolbox,
        capture_label: &str,
    ) -> Result<ExecutionReport> {
        let mut ctx = ExecutionContext::new(self.target_url.clone(), fingerprint.clone());
        let mut findings: Vec<Finding> = Vec::new();
        let mut steps_executed: u32 = 0;
        let mut repaired = false;

        let mut steps = graph.steps.clone();
        steps.sort_by_key(|s| s.order);

        let mut index = 0;
        let mut retried_current = false;
        while index < steps.len() {
            let step = steps[index].clone();
            self.bus.publish(RunEvent::StepStart { order: step.order });

            let interpolated = interpolate_step(&step, &ctx);
            let handler = self.registry.get(step.step_type)?;
            let result = handler.execute(&interpolated, &mut ctx).await;
            steps_executed += 1;

            self.bus.publish(RunEvent::StepResult {
                order: step.order,
                step_type: step.step_type,
                matched: result.success_criteria_matched,
            });

            // Findings are persisted before the step is considered complete.
            if step.success_criteria.is_some()
                && result.success_criteria_matched
                && step.phase == StepPhase::Observe
            {
                let mut finding = Finding::from_matched_criteria(
                    step.order,
                    &result.stdout,
                    &self.target_url,
                );
                self.repo
                    .save_finding(graph.id.as_deref().unwrap_or_default(), &mut finding)?;
                findings.push(finding);
            }

            if !step_failed(&step, &result) {
                ctx.previous_outputs.push(result.stdout);
                index += 1;
                retried_current = false;
                continue;
            }

            let error_log = if result.stderr.is_empty() {
                result.stdout.clone()
            } else {
                result.stderr.clone()
            };
            let mut kind = classify_failure(&error_log, result.status_code.unwrap_or(0));
            // A failed retry escalates: the transient tier is spent.
            if kind == FailureKind::TransientRecoverable && retried_current {
                kind = FailureKind::Systemic;
            }
            self.bus.publish(RunEvent::Failure {
                step: step.order,
                kind,
            });

            match self.failure_action(kind, repaired) {
                FailureAction::Retry => {
                    info!(order = step.order, "transient failure, retrying once");
                    retried_current = true;
                }
                FailureAction::Abort => {
                    warn!(order = step.order, kind = %kind, "aborting run");
                    return Ok(ExecutionReport {
                        success: false,
                        findings,
                        steps_executed,
                        error_log: Some(error_log),
                        repaired,
                    });
                }
                FailureAction::Repair => {
                    self.bus.publish(RunEvent::RepairStart);
                    info!(order = step.order, "systemic failure, repairing");
                    match self
                        .repair(graph, &step, &error_log, &ctx, fingerprint_hash, toolbox, capture_label)
                        .await
                    {
                        Ok(new_graph) => {
                            *graph = new_graph;
                            steps = graph.steps.clone();
                            steps.sort_by_key(|s| s.order);
                            // Fresh context; iteration restarts at order 1.
                            ctx = ExecutionContext::new(
                                self.target_url.clone(),
                                fingerprint.clone(),
                            );
                            index = 0;
                            retried_current = false;
                            repaired = true;
                        }
                        Err(err) => {
                            warn!(%err, "repair failed");
                            return Ok(ExecutionReport {
                                success: false,
                                findings,
                                steps_executed,
                                error_log: Some(format!("Repair failed: {}", err)),
                                repaired,
                            });
                        }
                    }
                }
            }
        }

        Ok(ExecutionReport {
            success: true,
            findings,
            steps_executed,
            error_log: None,
            repaired,
        })
    }

    fn failure_action(&self, kind: FailureKind, already_repaired: bool) -> FailureAction {
        match kind {
            FailureKind::TransientRecoverable => FailureAction::Retry,
            FailureKind::TransientUnrecoverable => FailureAction::Abort,
            // At most one repair per run; a second systemic failure aborts.
            FailureKind::Systemic if !already_repaired => FailureAction::Repair,
            FailureKind::Systemic => FailureAction::Abort,
        }
    }

    /// Recompile with repair context, persist the replacement graph, and
    /// record the repair splice on the superseded graph.
    async fn repair(
        &self,
        old_graph: &ActionGraph,
        failed_step: &Step,
        error_log: &str,
        ctx: &ExecutionContext,
        fingerprint_hash: &str,
        toolbox: &ReconToolbox,
        capture_label: &str,
    ) -> Result<ActionGraph> {
        let request = CompileRequest {
            toolbox,
            capture_label,
            profile: self.profile,
            repair_context: Some(assemble_repair_context(
                failed_step,
                error_log,
                &ctx.previous_outputs,
            )),
        };
        let mut new_graph = self.compiler.compile(&request, &self.bus).await?;

        // REPAIRED_TO edge on the superseded graph: the failed step is
        // replaced by the new graph's step at the same order (or its
        // entry step when the new graph is shorter).
        if let Some(old_id) = old_graph.id.as_deref() {
            let replacement = new_graph
                .steps
                .iter()
                .find(|s| s.order == failed_step.order)
                .or_else(|| new_graph.steps.first())
                .cloned();
            if let Some(mut replacement) = replacement {
                replacement.order = failed_step.order;
                if let Err(err) =
                    self.repo
                        .repair_step_chain(old_id, failed_step.order, &[replacement])
                {
                    warn!(%err, "failed to record repair splice");
                }
            }
        }

        self.repo.save_action_graph(fingerprint_hash, &mut new_graph)?;
        Ok(new_graph)
    }
}

fn short(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}

/// Step-failed predicate: non-empty stderr, or a success criterion that
/// was set and did not match.
pub fn step_failed(step: &Step, result: &StepResult) -> bool {
    !result.stderr.is_empty()
        || (step.success_criteria.is_some() && !result.success_criteria_matched)
}

#[cfg(test)]
mod tests;
