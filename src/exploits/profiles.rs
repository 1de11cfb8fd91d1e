//! Target profile registry for multi-target support.
//!
//! Each profile defines credentials, login paths, and auth mechanisms for a
//! target application. Exploit step generators use the active profile to
//! produce target-appropriate CAMRO steps. The registry is compile-time and
//! read-only.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How a target authenticates its users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMechanism {
    BearerToken,
    SessionCookie,
}

impl std::fmt::Display for AuthMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::BearerToken => "bearer_token",
            Self::SessionCookie => "session_cookie",
        };
        write!(f, "{}", s)
    }
}

/// One credential pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

/// Static bundle of credentials and protocol details for one named target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetProfile {
    pub name: String,
    pub default_url: String,
    pub login_path: String,
    pub auth_mechanism: AuthMechanism,
    pub user_a: Credentials,
    pub user_b: Credentials,
    /// Field names for the login body, e.g. ("email", "password")
    pub login_body_fields: (String, String),
    /// Regex extracting the bearer token from the login response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_extraction_pattern: Option<String>,
    /// Session cookie name, for cookie-based targets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_cookie_name: Option<String>,
    /// Regex extracting a CSRF token from the login page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csrf_token_pattern: Option<String>,
}

static PROFILES: LazyLock<BTreeMap<&'static str, TargetProfile>> = LazyLock::new(|| {
    BTreeMap::from([
        (
            "juice_shop",
            TargetProfile {
                name: "juice_shop".into(),
                default_url: "http://localhost:3000".into(),
                login_path: "/rest/user/login".into(),
                auth_mechanism: AuthMechanism::BearerToken,
                user_a: Credentials::new("admin@juice-sh.op", "admin123"),
                user_b: Credentials::new("jim@juice-sh.op", "ncc-1701"),
                login_body_fields: ("email".into(), "password".into()),
                token_extraction_pattern: Some(r#""token"\s*:\s*"([^"]+)""#.into()),
                session_cookie_name: None,
                csrf_token_pattern: None,
            },
        ),
        (
            "nodegoat",
            TargetProfile {
                name: "nodegoat".into(),
                default_url: "http://localhost:4000".into(),
                login_path: "/login".into(),
                auth_mechanism: AuthMechanism::SessionCookie,
                user_a: Credentials::new("user1", "User1_123"),
                user_b: Credentials::new("user2", "User2_123"),
                login_body_fields: ("userName".into(), "password".into()),
                token_extraction_pattern: None,
                session_cookie_name: Some("connect.sid".into()),
                csrf_token_pattern: None,
            },
        ),
        (
            "dvwa",
            TargetProfile {
                name: "dvwa".into(),
                default_url: "http://localhost:8081".into(),
                login_path: "/login.php".into(),
                auth_mechanism: AuthMechanism::SessionCookie,
                user_a: Credentials::new("admin", "password"),
                user_b: Credentials::new("gordonb", "abc123"),
                login_body_fields: ("username".into(), "password".into()),
                token_extraction_pattern: None,
                session_cookie_name: Some("PHPSESSID".into()),
                csrf_token_pattern: Some(r#"user_token.*?value=["']([^"']+)["']"#.into()),
            },
        ),
    ])
});

/// Look up a profile by name, defaulting to `juice_shop`.
pub fn get_profile(name: Option<&str>) -> Result<&'static TargetProfile> {
    let key = name.unwrap_or("juice_shop");
    PROFILES
        .get(key)
        .ok_or_else(|| Error::UnknownProfile(key.to_string()))
}

/// All registered profile names.
pub fn profile_names() -> Vec<&'static str> {
    PROFILES.keys().copied().collect()
}
