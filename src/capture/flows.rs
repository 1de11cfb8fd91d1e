//! Serialized HTTP flows, the capture-file format read by the recon tools.
//!
//! A capture file holds ordered flows, one JSON object per line (a single
//! JSON array of flows is also accepted). The orchestrator only ever reads
//! these files; the recorder that writes them lives outside the core.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One recorded HTTP request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowRequest {
    pub method: String,
    /// Full URL as seen on the wire
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Body text, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// One recorded HTTP response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowResponse {
    pub status_code: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// A request and its (optional) response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub request: FlowRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<FlowResponse>,
}

impl FlowRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        header_get(&self.headers, name)
    }

    /// Path component of the URL (scheme and host stripped).
    pub fn path(&self) -> &str {
        let rest = self
            .url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.url);
        match rest.find('/') {
            Some(idx) => &rest[idx..],
            None => "/",
        }
    }
}

impl FlowResponse {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        header_get(&self.headers, name)
    }
}

fn header_get<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Read all flows from a capture file.
pub fn read_flows(path: impl AsRef<Path>) -> Result<Vec<Flow>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::input(format!("cannot read capture file {}: {}", path.display(), e)))?;
    parse_flows(&text)
        .map_err(|e| Error::input(format!("malformed capture file {}: {}", path.display(), e)))
}

/// Parse capture text: a JSON array, or one JSON flow per line.
pub fn parse_flows(text: &str) -> serde_json::Result<Vec<Flow>> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed);
    }
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(serde_json::from_str)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_flow_json() -> String {
        serde_json::json!({
            "request": {
                "method": "GET",
                "url": "http://localhost:3000/api/Users/1",
                "headers": {"Authorization": "Bearer tok"},
            },
            "response": {
                "status_code": 200,
                "headers": {"Content-Type": "application/json"},
                "content": "{\"id\":1}",
            }
        })
        .to_string()
    }

    #[test]
    fn test_parse_json_lines() {
        let text = format!("{}\n{}\n", sample_flow_json(), sample_flow_json());
        let flows = parse_flows(&text).unwrap();
        assert_eq!(flows.len(), 2);
        assert_eq!(flows[0].request.method, "GET");
    }

    #[test]
    fn test_parse_json_array() {
        let text = format!("[{}]", sample_flow_json());
        let flows = parse_flows(&text).unwrap();
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].response.as_ref().unwrap().status_code, 200);
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let flows = parse_flows(&sample_flow_json()).unwrap();
        assert_eq!(flows[0].request.header("authorization"), Some("Bearer tok"));
        assert_eq!(
            flows[0].response.as_ref().unwrap().header("content-type"),
            Some("application/json")
        );
    }

    #[test]
    fn test_request_path_strips_origin() {
        let flows = parse_flows(&sample_flow_json()).unwrap();
        assert_eq!(flows[0].request.path(), "/api/Users/1");
    }

    #[test]
    fn test_read_flows_missing_file_is_input_error() {
        let err = read_flows("/nonexistent/capture.flows").unwrap_err();
        assert!(matches!(err, Error::Input(_)));
    }
}
