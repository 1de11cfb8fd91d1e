//! HTTP request handler.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE, SET_COOKIE};
use reqwest::{Client, Method};
use serde_json::Value;
use tracing::debug;

use crate::models::{ExecutionContext, Step, StepResult};

use super::StepHandler;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Executes `http_request` steps via a shared reqwest client.
pub struct HttpRequestHandler {
    client: Client,
    client_no_redirect: Client,
}

impl HttpRequestHandler {
    pub fn new() -> Self {
        Self {
            client: Client::builder().build().unwrap_or_default(),
            client_no_redirect: Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for HttpRequestHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepHandler for HttpRequestHandler {
    async fn execute(&self, step: &Step, ctx: &mut ExecutionContext) -> StepResult {
        let params = &step.parameters;

        let raw_url = params
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or(&step.command);
        let url = if raw_url.starts_with("http") {
            raw_url.to_string()
        } else {
            format!(
                "{}/{}",
                ctx.target_url.trim_end_matches('/'),
                raw_url.trim_start_matches('/')
            )
        };

        let method_str = params
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_uppercase();
        let Ok(method) = Method::from_bytes(method_str.as_bytes()) else {
            return StepResult::error(format!("invalid HTTP method: {}", method_str));
        };

        let timeout = params
            .get("timeout")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let skip_cookies = params
            .get("skip_cookies")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let follow_redirects = params
            .get("follow_redirects")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let mut headers = HeaderMap::new();
        if let Some(map) = params.get("headers").and_then(Value::as_object) {
            for (name, value) in map {
                if let (Ok(name), Some(Ok(value))) = (
                    HeaderName::try_from(name.as_str()),
                    value.as_str().map(HeaderValue::try_from),
                ) {
                    headers.insert(name, value);
                }
            }
        }
        // Session tokens accumulated in the context override step headers.
        for (name, value) in &ctx.session_tokens {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.insert(name, value);
            }
        }
        if !skip_cookies && !ctx.cookies.is_empty() {
            let cookie_line = ctx
                .cookies
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; ");
            if let Ok(value) = HeaderValue::try_from(cookie_line) {
                headers.insert(COOKIE, value);
            }
        }

        let client = if follow_redirects {
            &self.client
        } else {
            &self.client_no_redirect
        };
        let mut request = client
            .request(method, &url)
            .headers(headers)
            .timeout(Duration::from_secs(timeout));

        if let Some(body) = params.get("body").filter(|b| !b.is_null()) {
            request = request.json(body);
        } else if let Some(data) = params.get("data").and_then(Value::as_str) {
            request = request.body(data.to_string());
        }

        debug!(order = step.order, %url, "http_request");
        let response = match request.send().await {
            Ok(resp) => resp,
            Err(e) => {
                return StepResult {
                    stderr: e.to_string(),
                    status_code: Some(0),
                    ..StepResult::default()
                }
            }
        };

        let status = response.status().as_u16() as i32;

        // Thread Set-Cookie values back into the context.
        for value in response.headers().get_all(SET_COOKIE) {
            if let Ok(text) = value.to_str() {
                if let Some((name, rest)) = text.split_once('=') {
                    let cookie_value = rest.split(';').next().unwrap_or("").trim();
                    ctx.cookies
                        .insert(name.trim().to_string(), cookie_value.to_string());
                }
            }
        }

        let body = match response.text().await {
            Ok(text) => text,
            Err(e) => return StepResult::error(format!("failed to read response body: {}", e)),
        };

        if let Some(token_path) = params.get("extract_token_path").and_then(Value::as_str) {
            if let Some(token) = extract_json_path(&body, token_path) {
                ctx.session_tokens
                    .insert("Authorization".to_string(), format!("Bearer {}", token));
            }
        }

        let matched = step
            .success_criteria
            .as_deref()
            .and_then(|pattern| Regex::new(pattern).ok())
            .map(|re| re.is_match(&body))
            .unwrap_or(false);

        let stderr = if status >= 400 {
            format!("HTTP {} for {}", status, url)
        } else {
            String::new()
        };

        StepResult {
            stdout: body,
            stderr,
            status_code: Some(status),
            success_criteria_matched: matched,
        }
    }
}

/// Resolve a dotted path (e.g. `authentication.token`) inside a JSON body.
fn extract_json_path(body: &str, path: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    let mut current = &parsed;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    match current {
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Fingerprint, StepPhase, StepType};
    use httpmock::prelude::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ctx_for(server: &MockServer) -> ExecutionContext {
        ExecutionContext::new(
            server.base_url(),
            Fingerprint::new("Express", "JWT Bearer", "/api/*", vec![]),
        )
    }

    fn http_step(url: &str) -> Step {
        Step::new(1, StepPhase::Capture, StepType::HttpRequest, format!("GET {}", url))
            .with_param("method", "GET")
            .with_param("url", url)
    }

    #[tokio::test]
    async fn test_relative_url_joins_target_and_matches_criteria() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/Users/1");
                then.status(200).body("{\"id\":1}");
            })
            .await;

        let mut ctx = ctx_for(&server);
        let step = http_step("/api/Users/1").with_success_criteria(r#""id"\s*:\s*1"#);
        let result = HttpRequestHandler::new().execute(&step, &mut ctx).await;

        mock.assert_async().await;
        assert_eq!(result.status_code, Some(200));
        assert!(result.success_criteria_matched);
        assert!(result.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_error_status_copies_summary_to_stderr() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/secret");
                then.status(403).body("{\"error\":\"forbidden\"}");
            })
            .await;

        let mut ctx = ctx_for(&server);
        let result = HttpRequestHandler::new()
            .execute(&http_step("/api/secret"), &mut ctx)
            .await;

        assert_eq!(result.status_code, Some(403));
        assert!(result.stderr.starts_with("HTTP 403"));
        assert!(result.stdout.contains("forbidden"));
    }

    #[tokio::test]
    async fn test_set_cookie_merges_into_context() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/login");
                then.status(200)
                    .header("Set-Cookie", "connect.sid=s%3Aabc; Path=/; HttpOnly")
                    .body("ok");
            })
            .await;

        let mut ctx = ctx_for(&server);
        let step = Step::new(1, StepPhase::Capture, StepType::HttpRequest, "POST /login")
            .with_param("method", "POST")
            .with_param("url", "/login")
            .with_param("body", json!({"userName": "user1", "password": "User1_123"}));
        HttpRequestHandler::new().execute(&step, &mut ctx).await;

        assert_eq!(ctx.cookies.get("connect.sid").map(String::as_str), Some("s%3Aabc"));
    }

    #[tokio::test]
    async fn test_cookies_sent_unless_skipped() {
        let server = MockServer::start_async().await;
        let with_cookie = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/a").header("Cookie", "sid=42");
                then.status(200).body("a");
            })
            .await;
        let without_cookie = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/b").matches(|req| {
                    !req.headers
                        .as_ref()
                        .is_some_and(|h| h.iter().any(|(k, _)| k.eq_ignore_ascii_case("cookie")))
                });
                then.status(200).body("b");
            })
            .await;

        let mut ctx = ctx_for(&server);
        ctx.cookies.insert("sid".into(), "42".into());

        let handler = HttpRequestHandler::new();
        handler.execute(&http_step("/api/a"), &mut ctx).await;
        let stripped = http_step("/api/b").with_param("skip_cookies", true);
        handler.execute(&stripped, &mut ctx).await;

        with_cookie.assert_async().await;
        without_cookie.assert_async().await;
    }

    #[tokio::test]
    async fn test_extract_token_path_sets_session_token() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/rest/user/login");
                then.status(200)
                    .body("{\"authentication\":{\"token\":\"tok123\"}}");
            })
            .await;

        let mut ctx = ctx_for(&server);
        let step = Step::new(1, StepPhase::Capture, StepType::HttpRequest, "POST login")
            .with_param("method", "POST")
            .with_param("url", "/rest/user/login")
            .with_param("extract_token_path", "authentication.token");
        HttpRequestHandler::new().execute(&step, &mut ctx).await;

        assert_eq!(
            ctx.session_tokens.get("Authorization").map(String::as_str),
            Some("Bearer tok123")
        );
    }

    #[tokio::test]
    async fn test_connection_error_returns_stderr_not_panic() {
        let mut ctx = ExecutionContext::new(
            "http://127.0.0.1:1",
            Fingerprint::new("Express", "JWT Bearer", "/api/*", vec![]),
        );
        let result = HttpRequestHandler::new()
            .execute(&http_step("/api/x"), &mut ctx)
            .await;
        assert!(!result.stderr.is_empty());
        assert_eq!(result.status_code, Some(0));
    }

    #[test]
    fn test_extract_json_path() {
        let body = "{\"a\":{\"b\":{\"c\":\"deep\"}},\"n\":7}";
        assert_eq!(extract_json_path(body, "a.b.c").as_deref(), Some("deep"));
        assert_eq!(extract_json_path(body, "n").as_deref(), Some("7"));
        assert_eq!(extract_json_path(body, "a.missing"), None);
        assert_eq!(extract_json_path("not json", "a"), None);
    }
}
