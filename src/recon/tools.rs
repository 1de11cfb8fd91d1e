//! The four recon tools the Recon Agent may call.
//!
//! Each tool is a read-only analyzer over the run's capture file and
//! returns serialized JSON text sized for model consumption. Arguments out
//! of range produce an explicit `{"error": …}` object instead of raising,
//! so the model can adapt.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::capture::flows::{read_flows, Flow};
use crate::error::Result;
use crate::llm::agent::ToolDispatcher;
use crate::llm::types::ToolDefinition;

/// Body previews are truncated to keep each tool reply near 4 KiB.
const BODY_PREVIEW_CHARS: usize = 4_096;
const DIFF_PREVIEW_CHARS: usize = 2_000;

/// The fixed set of canonical security headers checked by `header_audit`.
const SECURITY_HEADERS: [&str; 7] = [
    "Content-Security-Policy",
    "Strict-Transport-Security",
    "X-Content-Type-Options",
    "X-Frame-Options",
    "X-XSS-Protection",
    "Referrer-Policy",
    "Permissions-Policy",
];

/// Recon tools bound to one capture file for the duration of a run.
pub struct ReconToolbox {
    flows: Vec<Flow>,
}

impl ReconToolbox {
    /// Load the capture file the tools will analyze.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            flows: read_flows(path)?,
        })
    }

    /// Build a toolbox over already-parsed flows.
    pub fn from_flows(flows: Vec<Flow>) -> Self {
        Self { flows }
    }

    /// The flows backing this toolbox.
    pub fn flows(&self) -> &[Flow] {
        &self.flows
    }

    /// Without a filter, one-line summaries of all flows; with a filter
    /// (regex on URL), full request/response detail for matching flows.
    pub fn response_inspect(&self, endpoint_filter: Option<&str>) -> String {
        let Some(filter) = endpoint_filter.filter(|f| !f.is_empty()) else {
            let summaries: Vec<Value> = self
                .flows
                .iter()
                .enumerate()
                .map(|(i, f)| flow_summary(i, f))
                .collect();
            return pretty(&Value::Array(summaries));
        };

        let pattern = match Regex::new(filter) {
            Ok(p) => p,
            Err(e) => return pretty(&json!({"error": format!("invalid endpoint_filter: {}", e)})),
        };

        let details: Vec<Value> = self
            .flows
            .iter()
            .enumerate()
            .filter(|(_, f)| pattern.is_match(&f.request.url))
            .map(|(i, f)| {
                let mut detail = flow_detail(f);
                detail.insert("index".to_string(), json!(i));
                Value::Object(detail)
            })
            .collect();
        pretty(&Value::Array(details))
    }

    /// Find every unique bearer token and decode its JWT claims.
    pub fn jwt_decode(&self, token_header: Option<&str>) -> String {
        let header = token_header.filter(|h| !h.is_empty()).unwrap_or("Authorization");
        let mut seen_tokens = HashSet::new();
        let mut results = Vec::new();

        for (i, flow) in self.flows.iter().enumerate() {
            let Some(header_val) = flow.request.header(header) else {
                continue;
            };
            let token = header_val.trim_start_matches("Bearer ").trim();
            if token.is_empty() || !seen_tokens.insert(token.to_string()) {
                continue;
            }

            let preview = if token.len() > 40 {
                format!("{}...", &token[..40])
            } else {
                token.to_string()
            };

            let mut entry = json!({
                "flow_index": i,
                "url": flow.request.url,
                "token_preview": preview,
            });
            if let Some(payload) = token.split('.').nth(1) {
                entry["claims"] = decode_jwt_payload(payload)
                    .unwrap_or_else(|| Value::String("(decode failed)".into()));
            }
            results.push(entry);
        }

        if results.is_empty() {
            return pretty(&json!({
                "message": format!("No flows found with {} header", header)
            }));
        }
        pretty(&Value::Array(results))
    }

    /// Sweep all responses for missing security headers, CORS posture,
    /// and server info leaks.
    pub fn header_audit(&self) -> String {
        let mut missing_by_url: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut cors_issues = Vec::new();
        let mut server_leaks = Vec::new();

        for (i, flow) in self.flows.iter().enumerate() {
            let Some(resp) = &flow.response else {
                continue;
            };
            let url = &flow.request.url;

            let missing: Vec<String> = SECURITY_HEADERS
                .iter()
                .filter(|&&h| resp.header(h).is_none())
                .map(|&h| h.to_string())
                .collect();
            if !missing.is_empty() {
                missing_by_url.insert(url.clone(), missing);
            }

            let acao = resp.header("Access-Control-Allow-Origin").unwrap_or("");
            if acao == "*" {
                cors_issues.push(json!({
                    "flow_index": i,
                    "url": url,
                    "issue": "CORS allows all origins (*).",
                }));
                let acac = resp.header("Access-Control-Allow-Credentials").unwrap_or("");
                if acac.eq_ignore_ascii_case("true") {
                    cors_issues.push(json!({
                        "flow_index": i,
                        "url": url,
                        "issue": "CORS allows credentials with wildcard origin.",
                    }));
                }
            }

            for header in ["Server", "X-Powered-By", "X-AspNet-Version"] {
                if let Some(val) = resp.header(header) {
                    if !val.is_empty() {
                        server_leaks.push(json!({
                            "flow_index": i,
                            "url": url,
                            "header": header.to_lowercase(),
                            "value": val,
                        }));
                    }
                }
            }
        }

        pretty(&json!({
            "total_flows": self.flows.len(),
            "missing_security_headers": missing_by_url,
            "cors_issues": cors_issues,
            "server_info_leaks": server_leaks,
        }))
    }

    /// Structural diff of two flows' responses by index.
    pub fn response_diff(&self, index_a: usize, index_b: usize) -> String {
        if index_a >= self.flows.len() || index_b >= self.flows.len() {
            return pretty(&json!({
                "error": format!("Flow index out of range (total: {})", self.flows.len())
            }));
        }

        let a = flow_detail(&self.flows[index_a]);
        let b = flow_detail(&self.flows[index_b]);
        let resp_a = &a["response"];
        let resp_b = &b["response"];

        let headers_a: BTreeSet<String> = object_keys(&resp_a["headers"]);
        let headers_b: BTreeSet<String> = object_keys(&resp_b["headers"]);

        let mut value_diffs = Map::new();
        for h in headers_a.intersection(&headers_b) {
            let va = &resp_a["headers"][h];
            let vb = &resp_b["headers"][h];
            if va != vb {
                value_diffs.insert(h.clone(), json!({"a": va, "b": vb}));
            }
        }

        let body_a = canonical_body(&resp_a["body"]);
        let body_b = canonical_body(&resp_b["body"]);
        let identical = body_a == body_b;

        let mut diff = json!({
            "flow_a": {"index": index_a, "url": a["request"]["url"]},
            "flow_b": {"index": index_b, "url": b["request"]["url"]},
            "status_diff": {"a": resp_a["status"], "b": resp_b["status"]},
            "headers_only_in_a": headers_a.difference(&headers_b).collect::<Vec<_>>(),
            "headers_only_in_b": headers_b.difference(&headers_a).collect::<Vec<_>>(),
            "header_value_diffs": value_diffs,
            "body_identical": identical,
        });
        if !identical {
            diff["body_a_preview"] = json!(truncate(&body_a, DIFF_PREVIEW_CHARS));
            diff["body_b_preview"] = json!(truncate(&body_b, DIFF_PREVIEW_CHARS));
        }
        pretty(&diff)
    }
}

impl ToolDispatcher for ReconToolbox {
    fn dispatch(&self, name: &str, input: &Value) -> String {
        match name {
            "response_inspect" => {
                self.response_inspect(input.get("endpoint_filter").and_then(Value::as_str))
            }
            "jwt_decode" => self.jwt_decode(input.get("token_header").and_then(Value::as_str)),
            "header_audit" => self.header_audit(),
            "response_diff" => {
                let a = input.get("flow_index_a").and_then(Value::as_u64);
                let b = input.get("flow_index_b").and_then(Value::as_u64);
                match (a, b) {
                    (Some(a), Some(b)) => self.response_diff(a as usize, b as usize),
                    _ => pretty(&json!({
                        "error": "response_diff requires flow_index_a and flow_index_b"
                    })),
                }
            }
            other => format!("Unknown tool: {}", other),
        }
    }
}

/// Schemas for the four recon tools, offered to the Recon Agent.
///
/// The capture file is bound on the host side; the model only supplies
/// filters and indices.
pub fn recon_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "response_inspect".into(),
            description: "Inspect HTTP responses from the traffic capture. Without endpoint_filter, \
                          returns a summary of ALL flows. With endpoint_filter (regex on URL), \
                          returns full request/response detail for matching flows."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "endpoint_filter": {
                        "type": "string",
                        "description": "Regex to filter by URL (optional)."
                    }
                },
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "jwt_decode".into(),
            description: "Find all flows with Bearer tokens in the capture and decode the JWT \
                          claims. Answers: who is the authenticated user, what is in the token \
                          payload?"
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "token_header": {
                        "type": "string",
                        "description": "Header name containing the token (default: Authorization)"
                    }
                },
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "header_audit".into(),
            description: "Audit security headers across all flows in the capture. Checks for \
                          missing security headers, permissive CORS, server info leaks."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "response_diff".into(),
            description: "Diff responses between two flows by index. Useful for comparing auth'd \
                          vs unauth'd, or the same endpoint under different user contexts."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "flow_index_a": {"type": "integer", "description": "Index of first flow"},
                    "flow_index_b": {"type": "integer", "description": "Index of second flow"}
                },
                "required": ["flow_index_a", "flow_index_b"],
                "additionalProperties": false
            }),
        },
    ]
}

fn flow_summary(index: usize, flow: &Flow) -> Value {
    let req = &flow.request;
    let has_auth = req.header("Authorization").is_some() || req.header("Cookie").is_some();
    let content_type = flow
        .response
        .as_ref()
        .and_then(|r| r.header("Content-Type"))
        .unwrap_or("")
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_string();
    json!({
        "index": index,
        "method": req.method,
        "url": req.url,
        "status": flow.response.as_ref().map(|r| r.status_code),
        "has_auth": has_auth,
        "content_type": content_type,
    })
}

fn flow_detail(flow: &Flow) -> Map<String, Value> {
    let req = &flow.request;
    let mut detail = Map::new();
    detail.insert(
        "request".into(),
        json!({
            "method": req.method,
            "url": req.url,
            "headers": req.headers,
            "body": safe_json(req.content.as_deref()),
        }),
    );
    detail.insert(
        "response".into(),
        match &flow.response {
            Some(resp) => json!({
                "status": resp.status_code,
                "headers": resp.headers,
                "body": safe_json(resp.content.as_deref()),
            }),
            None => json!({"status": null, "headers": {}, "body": null}),
        },
    );
    detail
}

/// Parse a body as JSON where possible, else a truncated text preview.
fn safe_json(body: Option<&str>) -> Value {
    let Some(body) = body.filter(|b| !b.is_empty()) else {
        return Value::Null;
    };
    serde_json::from_str(body).unwrap_or_else(|_| Value::String(truncate(body, BODY_PREVIEW_CHARS)))
}

fn decode_jwt_payload(segment: &str) -> Option<Value> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn object_keys(value: &Value) -> BTreeSet<String> {
    value
        .as_object()
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default()
}

fn canonical_body(body: &Value) -> String {
    if body.is_null() {
        return String::new();
    }
    serde_json::to_string(body).unwrap_or_default()
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text[..cut].to_string()
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
