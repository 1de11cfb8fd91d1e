use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::compiler::Compiler;
use crate::error::Error;
use crate::events::{EventBus, RunEvent};
use crate::exploits::get_profile;
use crate::handlers::{HandlerRegistry, RegexMatchHandler, StepHandler};
use crate::llm::testing::{text_response, ScriptedClient};
use crate::llm::{LlmClient, TokenBudget};
use crate::models::{
    ExecutionContext, Fingerprint, RunPath, Step, StepResult, StepType,
};
use crate::recon::ReconToolbox;
use crate::repository::GraphRepository;

use super::{Orchestrator, RunGuard};

/// Fake HTTP handler driven by a per-request closure, with a request log.
struct FakeHttp {
    respond: Box<dyn Fn(&Step) -> StepResult + Send + Sync>,
    log: Mutex<Vec<Step>>,
}

impl FakeHttp {
    fn new(respond: impl Fn(&Step) -> StepResult + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            log: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<Step> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl StepHandler for FakeHttp {
    async fn execute(&self, step: &Step, _ctx: &mut ExecutionContext) -> StepResult {
        self.log.lock().unwrap().push(step.clone());
        (self.respond)(step)
    }
}

fn url_of(step: &Step) -> String {
    step.parameters["url"].as_str().unwrap_or_default().to_string()
}

/// Responses for the happy-path idor_walk graph against the bearer profile.
fn happy_response(step: &Step) -> StepResult {
    match url_of(step).as_str() {
        "/rest/user/login" => StepResult {
            stdout: "{\"token\":\"tokA\"}".into(),
            status_code: Some(200),
            ..StepResult::default()
        },
        "/api/Users/2" => StepResult {
            stdout: "{\"id\":2,\"email\":\"jim@juice-sh.op\"}".into(),
            status_code: Some(200),
            ..StepResult::default()
        },
        "/api/Users/1" => StepResult {
            stdout: "{\"id\":1,\"email\":\"admin@juice-sh.op\"}".into(),
            status_code: Some(200),
            success_criteria_matched: true,
            ..StepResult::default()
        },
        other => StepResult::error(format!("unexpected url: {}", other)),
    }
}

fn idor_plan_json() -> String {
    json!({
        "opportunities": [{
            "opportunity": "IDOR on user records",
            "recon_tool_used": "response_inspect",
            "observation": "GET /api/Users/1 returns a full user object",
            "suspected_gap": "no ownership check on user id",
            "recommended_exploit": "idor_walk",
            "exploit_target": "/api/Users/1",
            "exploit_reasoning": "walking ids should expose other users",
        }]
    })
    .to_string()
}

/// A scripted client with `compiles` recon+critic exchanges queued.
fn scripted_compiles(compiles: usize) -> Arc<ScriptedClient> {
    let mut responses = Vec::new();
    for _ in 0..compiles {
        responses.push(text_response(idor_plan_json(), 100));
        responses.push(text_response(idor_plan_json(), 50));
    }
    Arc::new(ScriptedClient::new(responses))
}

fn build_orchestrator(
    repo: Arc<GraphRepository>,
    client: Arc<ScriptedClient>,
    fake_http: Arc<FakeHttp>,
) -> Orchestrator {
    let compiler = Compiler::new(
        client as Arc<dyn LlmClient>,
        Arc::new(TokenBudget::new(1_000_000)),
        None,
        3,
    );
    let mut registry = HandlerRegistry::new();
    registry.register(StepType::HttpRequest, fake_http);
    registry.register(StepType::RegexMatch, Arc::new(RegexMatchHandler::new()));
    Orchestrator::new(
        repo,
        compiler,
        registry,
        EventBus::default(),
        "http://target.example",
        get_profile(Some("juice_shop")).unwrap(),
    )
}

fn fingerprint() -> Fingerprint {
    Fingerprint::new("Express", "JWT Bearer", "/api/*", vec!["no CSP".into()])
}

fn toolbox() -> ReconToolbox {
    ReconToolbox::from_flows(vec![])
}

#[tokio::test]
async fn test_cold_start_compiles_executes_and_finds() {
    let repo = Arc::new(GraphRepository::in_memory().unwrap());
    let client = scripted_compiles(1);
    let fake_http = FakeHttp::new(|step| happy_response(step));
    let orchestrator = build_orchestrator(Arc::clone(&repo), Arc::clone(&client), Arc::clone(&fake_http));

    let result = orchestrator
        .run(fingerprint(), &toolbox(), "captures/test.flows")
        .await
        .unwrap();

    assert_eq!(result.path, RunPath::ColdStart);
    assert!(result.compiled);
    assert!(!result.repaired);
    let execution = result.execution.unwrap();
    assert!(execution.success);
    assert_eq!(execution.steps_executed, 5);
    assert_eq!(execution.findings.len(), 1);
    assert!(execution.findings[0]
        .observation
        .contains("Success criteria matched at step 5"));

    // The extracted token was interpolated into the walk request headers.
    let walk = fake_http
        .requests()
        .into_iter()
        .find(|s| url_of(s) == "/api/Users/2")
        .unwrap();
    assert_eq!(walk.parameters["headers"]["Authorization"], "Bearer tokA");
}

#[tokio::test]
async fn test_warm_start_performs_zero_llm_calls() {
    let repo = Arc::new(GraphRepository::in_memory().unwrap());
    let client = scripted_compiles(1);
    let fake_http = FakeHttp::new(|step| happy_response(step));
    let orchestrator = build_orchestrator(Arc::clone(&repo), Arc::clone(&client), fake_http);

    let first = orchestrator
        .run(fingerprint(), &toolbox(), "captures/test.flows")
        .await
        .unwrap();
    assert_eq!(first.path, RunPath::ColdStart);
    assert_eq!(client.call_count(), 2);

    let second = orchestrator
        .run(fingerprint(), &toolbox(), "captures/test.flows")
        .await
        .unwrap();
    assert_eq!(second.path, RunPath::WarmStart);
    assert!(!second.compiled);
    // Zero additional LLM calls on a successful warm start.
    assert_eq!(client.call_count(), 2);

    // Metrics bumped exactly once per run.
    let mut fp = fingerprint();
    let hash = fp.ensure_hash().to_string();
    let graph = repo.get_action_graph_with_steps(&hash).unwrap().unwrap();
    assert_eq!(graph.times_executed, 2);
    assert_eq!(graph.times_succeeded, 2);
}

#[tokio::test]
async fn test_503_retries_once_then_succeeds() {
    let repo = Arc::new(GraphRepository::in_memory().unwrap());
    let client = scripted_compiles(1);
    let failed_once = Mutex::new(false);
    let fake_http = FakeHttp::new(move |step| {
        if url_of(step) == "/api/Users/2" {
            let mut failed = failed_once.lock().unwrap();
            if !*failed {
                *failed = true;
                return StepResult {
                    stderr: "HTTP 503 for /api/Users/2".into(),
                    status_code: Some(503),
                    ..StepResult::default()
                };
            }
        }
        happy_response(step)
    });
    let orchestrator = build_orchestrator(repo, client, fake_http);

    let result = orchestrator
        .run(fingerprint(), &toolbox(), "captures/test.flows")
        .await
        .unwrap();

    let execution = result.execution.unwrap();
    assert!(execution.success);
    // One retry on top of the five-step graph.
    assert_eq!(execution.steps_executed, 6);
    assert!(!execution.repaired);
}

#[tokio::test]
async fn test_401_aborts_without_repair() {
    let repo = Arc::new(GraphRepository::in_memory().unwrap());
    let client = scripted_compiles(1);
    let fake_http = FakeHttp::new(|step| {
        if url_of(step) == "/api/Users/2" {
            StepResult {
                stderr: "HTTP 401 for /api/Users/2".into(),
                status_code: Some(401),
                ..StepResult::default()
            }
        } else {
            happy_response(step)
        }
    });
    let orchestrator = build_orchestrator(repo, Arc::clone(&client), fake_http);

    let result = orchestrator
        .run(fingerprint(), &toolbox(), "captures/test.flows")
        .await
        .unwrap();

    let execution = result.execution.unwrap();
    assert!(!execution.success);
    assert!(!execution.repaired);
    assert!(execution.error_log.unwrap().contains("401"));
    // No repair compile happened.
    assert_eq!(client.call_count(), 2);
}

#[tokio::test]
async fn test_systemic_failure_repairs_with_fresh_context() {
    let repo = Arc::new(GraphRepository::in_memory().unwrap());
    // Two compiles: cold start + repair.
    let client = scripted_compiles(2);
    let failed_once = Mutex::new(false);
    let fake_http = FakeHttp::new(move |step| {
        if url_of(step) == "/api/Users/2" {
            let mut failed = failed_once.lock().unwrap();
            if !*failed {
                *failed = true;
                return StepResult::error("unexpected parser state: missing field");
            }
        }
        happy_response(step)
    });
    let orchestrator =
        build_orchestrator(Arc::clone(&repo), Arc::clone(&client), Arc::clone(&fake_http));

    let result = orchestrator
        .run(fingerprint(), &toolbox(), "captures/test.flows")
        .await
        .unwrap();

    assert_eq!(result.path, RunPath::Repair);
    assert!(result.repaired);
    let execution = result.execution.unwrap();
    assert!(execution.success);
    // Three steps before the failure, then the full five-step rerun.
    assert_eq!(execution.steps_executed, 8);

    // Repair compile happened (2 more calls) and the splice was recorded.
    assert_eq!(client.call_count(), 4);
    let mut fp = fingerprint();
    let hash = fp.ensure_hash().to_string();
    let history = repo.get_repair_history(&hash, 10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].failed_order, 3);

    // Fresh context: the rerun logged a second login request.
    let logins = fake_http
        .requests()
        .iter()
        .filter(|s| url_of(s) == "/rest/user/login")
        .count();
    assert_eq!(logins, 2);
}

#[tokio::test]
async fn test_second_systemic_failure_aborts() {
    let repo = Arc::new(GraphRepository::in_memory().unwrap());
    let client = scripted_compiles(2);
    let fake_http = FakeHttp::new(|step| {
        if url_of(step) == "/api/Users/2" {
            StepResult::error("unexpected parser state: missing field")
        } else {
            happy_response(step)
        }
    });
    let orchestrator = build_orchestrator(repo, Arc::clone(&client), fake_http);

    let result = orchestrator
        .run(fingerprint(), &toolbox(), "captures/test.flows")
        .await
        .unwrap();

    let execution = result.execution.unwrap();
    assert!(!execution.success);
    assert!(execution.repaired);
    // Exactly one repair: two compiles total, then abort.
    assert_eq!(client.call_count(), 4);
    assert_eq!(execution.steps_executed, 6);
}

#[tokio::test]
async fn test_steps_executed_bounded_by_twice_graph_len() {
    let repo = Arc::new(GraphRepository::in_memory().unwrap());
    let client = scripted_compiles(1);
    let flaky: Mutex<VecDeque<bool>> = Mutex::new(VecDeque::from(vec![true, false]));
    let fake_http = FakeHttp::new(move |step| {
        if url_of(step) == "/api/Users/2" && flaky.lock().unwrap().pop_front() == Some(true) {
            return StepResult {
                stderr: "connection reset by peer".into(),
                status_code: Some(0),
                ..StepResult::default()
            };
        }
        happy_response(step)
    });
    let orchestrator = build_orchestrator(repo, client, fake_http);

    let result = orchestrator
        .run(fingerprint(), &toolbox(), "captures/test.flows")
        .await
        .unwrap();
    let execution = result.execution.unwrap();
    assert!(execution.steps_executed <= 5 * 2);
}

#[tokio::test]
async fn test_compile_exhaustion_emits_error_run_end() {
    let repo = Arc::new(GraphRepository::in_memory().unwrap());
    // Every recon reply is unparseable.
    let client = Arc::new(ScriptedClient::new(vec![
        text_response("no plan", 10),
        text_response("no plan", 10),
        text_response("no plan", 10),
    ]));
    let fake_http = FakeHttp::new(|step| happy_response(step));
    let orchestrator = build_orchestrator(repo, client, fake_http);
    let mut events = orchestrator.bus().subscribe();

    let err = orchestrator
        .run(fingerprint(), &toolbox(), "captures/test.flows")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CompilationExhausted { .. }));

    let mut last = None;
    while let Ok(event) = events.try_recv() {
        last = Some(event);
    }
    match last {
        Some(RunEvent::RunEnd { success, path, .. }) => {
            assert!(!success);
            assert_eq!(path, RunPath::Error);
        }
        other => panic!("expected run_end, got {:?}", other),
    }
}

#[test]
fn test_run_guard_is_exclusive() {
    let guard = RunGuard::acquire().unwrap();
    assert!(matches!(RunGuard::acquire(), Err(Error::RunActive)));
    drop(guard);
    assert!(RunGuard::acquire().is_ok());
}
