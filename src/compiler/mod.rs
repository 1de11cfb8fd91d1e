//! Compiler: Recon ⇒ Critic ⇒ ActionGraph.
//!
//! Compilation is a bounded loop: the tool-using Recon Agent emits an
//! AttackPlan, the Critic refines it, and the refined plan is mapped
//! deterministically onto an ActionGraph through the exploit generator
//! registry. Per-iteration failures are logged and the loop continues;
//! exhausting every iteration raises.

pub mod prompts;

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::events::{EventBus, RunEvent};
use crate::exploits::{generate, TargetProfile};
use crate::llm::{LlmClient, StructuredAgent, TokenBudget, ToolAgent};
use crate::models::{ActionGraph, AttackPlan, ExploitKind};
use crate::recon::{recon_tool_definitions, ReconToolbox};

use prompts::{assemble_recon_context, CRITIC_SYSTEM_PROMPT, RECON_SYSTEM_PROMPT};

const RECON_MAX_TOKENS: u32 = 8_192;
const CRITIC_MAX_TOKENS: u32 = 4_096;
const RECON_MAX_ITERATIONS: u32 = 8;

/// Inputs for one compilation.
pub struct CompileRequest<'a> {
    /// Recon tools bound to the run's capture
    pub toolbox: &'a ReconToolbox,
    /// Human-readable name of the traffic source, for the prompt
    pub capture_label: &'a str,
    /// Active target profile for exploit generation
    pub profile: &'static TargetProfile,
    /// Repair enrichment prepended to the recon prompt, if repairing
    pub repair_context: Option<String>,
}

/// Runs the Recon/Critic loop and maps plans onto ActionGraphs.
pub struct Compiler {
    client: Arc<dyn LlmClient>,
    budget: Arc<TokenBudget>,
    model: Option<String>,
    max_critic_iterations: u32,
}

impl Compiler {
    pub fn new(
        client: Arc<dyn LlmClient>,
        budget: Arc<TokenBudget>,
        model: Option<String>,
        max_critic_iterations: u32,
    ) -> Self {
        Self {
            client,
            budget,
            model,
            max_critic_iterations,
        }
    }

    /// Compile an ActionGraph for the target, or error after exhausting
    /// every critic iteration.
    pub async fn compile(
        &self,
        request: &CompileRequest<'_>,
        bus: &EventBus,
    ) -> Result<ActionGraph> {
        let mut prompt = assemble_recon_context(request.capture_label);
        if let Some(repair) = &request.repair_context {
            prompt = format!("{}{}", repair, prompt);
        }

        for iteration in 0..self.max_critic_iterations {
            bus.publish(RunEvent::CompileIter { iteration });

            match self.compile_once(&prompt, request, iteration, bus).await {
                Ok(graph) => return Ok(graph),
                Err(err @ Error::BudgetExhausted { .. }) => return Err(err),
                Err(err) => {
                    warn!(iteration, %err, "compile iteration failed");
                }
            }
        }

        Err(Error::CompilationExhausted {
            iterations: self.max_critic_iterations,
        })
    }

    async fn compile_once(
        &self,
        prompt: &str,
        request: &CompileRequest<'_>,
        iteration: u32,
        bus: &EventBus,
    ) -> Result<ActionGraph> {
        let recon = ToolAgent::new(
            Arc::clone(&self.client),
            Arc::clone(&self.budget),
            RECON_SYSTEM_PROMPT,
            self.model.clone(),
            RECON_MAX_TOKENS,
            recon_tool_definitions(),
            RECON_MAX_ITERATIONS,
        );
        let mut plan: AttackPlan = recon.run(prompt, request.toolbox).await?;
        plan.normalize();
        bus.publish(RunEvent::ReconResult {
            iteration,
            opportunities: plan.opportunities.len(),
        });

        let critic = StructuredAgent::new(
            Arc::clone(&self.client),
            Arc::clone(&self.budget),
            CRITIC_SYSTEM_PROMPT,
            self.model.clone(),
            CRITIC_MAX_TOKENS,
        );
        let mut refined: AttackPlan = critic.run(&serde_json::to_string(&plan)?).await?;
        refined.normalize();
        bus.publish(RunEvent::CriticResult {
            iteration,
            opportunities: refined.opportunities.len(),
            exploits: refined
                .opportunities
                .iter()
                .map(|o| o.recommended_exploit.to_string())
                .collect(),
        });

        let graph = plan_to_graph(&refined, request.profile)?;
        info!(
            vulnerability = %graph.vulnerability_type,
            steps = graph.steps.len(),
            "compiled action graph"
        );
        Ok(graph)
    }
}

/// Map a refined plan onto an ActionGraph: take the top opportunity, run
/// its exploit generator, renumber the steps densely from 1.
pub fn plan_to_graph(plan: &AttackPlan, profile: &TargetProfile) -> Result<ActionGraph> {
    let top = plan
        .top()
        .ok_or_else(|| Error::Llm("refined plan has no opportunities".into()))?;

    let mut steps = generate(
        top.recommended_exploit,
        &top.exploit_target,
        &top.observation,
        profile,
    )?;
    for (index, step) in steps.iter_mut().enumerate() {
        step.order = index as u32 + 1;
    }

    Ok(ActionGraph::new(
        vulnerability_label(top.recommended_exploit),
        format!("{}: {}", top.opportunity, top.exploit_reasoning),
        steps,
    ))
}

fn vulnerability_label(kind: ExploitKind) -> &'static str {
    match kind {
        ExploitKind::IdorWalk => "IDOR",
        ExploitKind::AuthStrip => "auth_bypass",
        ExploitKind::TokenSwap => "broken_authorization",
        ExploitKind::NamespaceProbe => "exposed_namespace",
        ExploitKind::RoleTamper => "privilege_escalation",
    }
}
