//! Template interpolation for step parameters.
//!
//! Occurrences of `{{previous_outputs[N]}}` in string leaves are replaced
//! by the stdout of the N-th successful step: positive indices are 1-based,
//! negative indices count from the end. Out-of-range indices leave the
//! token literal. Interpolation recurses through nested maps and lists and
//! passes non-string leaves through unchanged.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::models::{ExecutionContext, Step};

static INTERPOLATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{previous_outputs\[(-?\d+)\]\}\}").expect("interpolation regex"));

/// Return a copy of the step with its parameters interpolated against the
/// context's previous outputs.
pub fn interpolate_step(step: &Step, ctx: &ExecutionContext) -> Step {
    let mut interpolated = step.clone();
    for value in interpolated.parameters.values_mut() {
        *value = interpolate_value(value, &ctx.previous_outputs);
    }
    interpolated
}

fn interpolate_value(value: &Value, outputs: &[String]) -> Value {
    match value {
        Value::String(s) => Value::String(interpolate_text(s, outputs)),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate_value(v, outputs)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| interpolate_value(v, outputs)).collect())
        }
        other => other.clone(),
    }
}

fn interpolate_text(text: &str, outputs: &[String]) -> String {
    INTERPOLATION_RE
        .replace_all(text, |caps: &Captures| {
            let index: i64 = caps[1].parse().unwrap_or(0);
            match resolve_index(index, outputs.len()) {
                Some(i) => outputs[i].clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Map a 1-based (or negative, from the end) index onto the outputs slice.
fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let resolved = if index > 0 {
        index - 1
    } else if index < 0 {
        len + index
    } else {
        return None;
    };
    (0..len).contains(&resolved).then_some(resolved as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Fingerprint, StepPhase, StepType};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ctx_with(outputs: &[&str]) -> ExecutionContext {
        let mut ctx = ExecutionContext::new(
            "http://localhost:3000",
            Fingerprint::new("Express", "JWT Bearer", "/api/*", vec![]),
        );
        ctx.previous_outputs = outputs.iter().map(|s| s.to_string()).collect();
        ctx
    }

    fn step_with_params(params: serde_json::Map<String, Value>) -> Step {
        let mut step = Step::new(3, StepPhase::Mutate, StepType::HttpRequest, "GET /x");
        step.parameters = params;
        step
    }

    #[test]
    fn test_positive_index_is_one_based() {
        let ctx = ctx_with(&["login body", "tok123"]);
        let step = step_with_params(
            json!({"headers": {"Authorization": "Bearer {{previous_outputs[2]}}"}})
                .as_object()
                .unwrap()
                .clone(),
        );
        let out = interpolate_step(&step, &ctx);
        assert_eq!(out.parameters["headers"]["Authorization"], "Bearer tok123");
    }

    #[test]
    fn test_negative_index_resolves_from_end() {
        let ctx = ctx_with(&["first", "second"]);
        let step = step_with_params(
            json!({"data": "{{previous_outputs[-1]}}"}).as_object().unwrap().clone(),
        );
        assert_eq!(interpolate_step(&step, &ctx).parameters["data"], "second");
    }

    #[test]
    fn test_out_of_range_leaves_token_literal() {
        let ctx = ctx_with(&["only"]);
        let step = step_with_params(
            json!({"data": "{{previous_outputs[99]}}", "zero": "{{previous_outputs[0]}}"})
                .as_object()
                .unwrap()
                .clone(),
        );
        let out = interpolate_step(&step, &ctx);
        assert_eq!(out.parameters["data"], "{{previous_outputs[99]}}");
        assert_eq!(out.parameters["zero"], "{{previous_outputs[0]}}");
    }

    #[test]
    fn test_recurses_through_lists_and_preserves_non_strings() {
        let ctx = ctx_with(&["tok"]);
        let step = step_with_params(
            json!({
                "timeout": 30,
                "flags": [true, "{{previous_outputs[1]}}", null],
                "nested": {"deep": ["{{previous_outputs[-1]}}"]}
            })
            .as_object()
            .unwrap()
            .clone(),
        );
        let out = interpolate_step(&step, &ctx);
        assert_eq!(out.parameters["timeout"], 30);
        assert_eq!(out.parameters["flags"], json!([true, "tok", null]));
        assert_eq!(out.parameters["nested"]["deep"][0], "tok");
    }

    #[test]
    fn test_idempotent_when_no_tokens_remain() {
        let ctx = ctx_with(&["a", "b"]);
        let step = step_with_params(
            json!({"url": "/api/Users/{{previous_outputs[1]}}", "method": "GET"})
                .as_object()
                .unwrap()
                .clone(),
        );
        let once = interpolate_step(&step, &ctx);
        let twice = interpolate_step(&once, &ctx);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_resolve_index_bounds() {
        assert_eq!(resolve_index(1, 3), Some(0));
        assert_eq!(resolve_index(3, 3), Some(2));
        assert_eq!(resolve_index(4, 3), None);
        assert_eq!(resolve_index(-1, 3), Some(2));
        assert_eq!(resolve_index(-3, 3), Some(0));
        assert_eq!(resolve_index(-4, 3), None);
        assert_eq!(resolve_index(0, 3), None);
    }
}
