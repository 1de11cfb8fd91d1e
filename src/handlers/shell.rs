//! Shell command handler.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use crate::models::{ExecutionContext, Step, StepResult};

use super::StepHandler;

const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Executes `shell_command` steps via a subprocess.
///
/// The command comes from `step.command`; `timeout`, `env` and `cwd` from
/// the parameters. The child is killed when the timeout expires.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellCommandHandler;

impl ShellCommandHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StepHandler for ShellCommandHandler {
    async fn execute(&self, step: &Step, _ctx: &mut ExecutionContext) -> StepResult {
        let params = &step.parameters;
        let timeout = params
            .get("timeout")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let mut command = Command::new("sh");
        command.arg("-c").arg(&step.command);
        if let Some(env) = params.get("env").and_then(Value::as_object) {
            for (key, value) in env {
                if let Some(value) = value.as_str() {
                    command.env(key, value);
                }
            }
        }
        if let Some(cwd) = params.get("cwd").and_then(Value::as_str) {
            command.current_dir(cwd);
        }
        // Enforced kill on timeout: the dropped child is reaped.
        command.kill_on_drop(true);

        debug!(order = step.order, command = %step.command, "shell_command");
        let child = match command
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => return StepResult::error(format!("failed to spawn command: {}", e)),
        };

        let output = match tokio::time::timeout(
            Duration::from_secs(timeout),
            child.wait_with_output(),
        )
        .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return StepResult::error(format!("subprocess wait failed: {}", e)),
            Err(_) => {
                return StepResult {
                    stderr: format!("Timeout after {}s: {}", timeout, step.command),
                    status_code: Some(-1),
                    ..StepResult::default()
                }
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let matched = step
            .success_criteria
            .as_deref()
            .and_then(|pattern| Regex::new(pattern).ok())
            .map(|re| re.is_match(&stdout))
            .unwrap_or(false);

        StepResult {
            stdout,
            stderr,
            status_code: output.status.code(),
            success_criteria_matched: matched,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Fingerprint, StepPhase, StepType};
    use pretty_assertions::assert_eq;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(
            "http://localhost:3000",
            Fingerprint::new("Express", "JWT Bearer", "/api/*", vec![]),
        )
    }

    fn shell_step(command: &str) -> Step {
        Step::new(1, StepPhase::Analyze, StepType::ShellCommand, command)
    }

    #[tokio::test]
    async fn test_captures_stdout_and_exit_code() {
        let result = ShellCommandHandler::new()
            .execute(&shell_step("printf hello"), &mut ctx())
            .await;
        assert_eq!(result.stdout, "hello");
        assert_eq!(result.status_code, Some(0));
        assert!(result.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_stderr_and_nonzero_exit() {
        let result = ShellCommandHandler::new()
            .execute(&shell_step("printf oops >&2; exit 3"), &mut ctx())
            .await;
        assert_eq!(result.stderr, "oops");
        assert_eq!(result.status_code, Some(3));
    }

    #[tokio::test]
    async fn test_success_criteria_matches_stdout() {
        let step = shell_step("printf 'token=abc123'").with_success_criteria("token=\\w+");
        let result = ShellCommandHandler::new().execute(&step, &mut ctx()).await;
        assert!(result.success_criteria_matched);
    }

    #[tokio::test]
    async fn test_timeout_kills_and_reports() {
        let step = shell_step("sleep 5").with_param("timeout", 1);
        let result = ShellCommandHandler::new().execute(&step, &mut ctx()).await;
        assert!(result.stderr.starts_with("Timeout after 1s"));
        assert_eq!(result.status_code, Some(-1));
    }

    #[tokio::test]
    async fn test_env_is_passed_through() {
        let step = shell_step("printf \"$PROBE_VAR\"")
            .with_param("env", serde_json::json!({"PROBE_VAR": "42"}));
        let result = ShellCommandHandler::new().execute(&step, &mut ctx()).await;
        assert_eq!(result.stdout, "42");
    }
}
