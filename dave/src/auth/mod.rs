//! Authentication for the Dave API.
//!
//! Callers identify themselves in one of two ways:
//!
//! - `X-API-Key: <key>`: the service key (`auth.dave_api_key`, tier `basic`) used by
//!   automation and other services, or the admin key (`auth.admin_api_key`, tier `admin`).
//! - `Authorization: Bearer <token>`: a user JWT signed with `auth.jwt_secret`. Admin
//!   endpoints also accept the admin key as a bearer token.
//!
//! Four policies are exposed as axum extractors in [`extractors`]:
//!
//! | Extractor          | Accepts                                      |
//! |--------------------|----------------------------------------------|
//! | `ApiKeyAuth`       | a valid `X-API-Key`                          |
//! | `AdminAuth`        | the admin key, as `X-API-Key` or bearer      |
//! | `OptionalAuth`     | anything valid, or nothing (anonymous)       |
//! | `UserOrAdminAuth`  | a user JWT or the admin key                  |
//!
//! A credential that is present but invalid is always rejected, never downgraded to anonymous.

pub mod extractors;
pub mod jwt;

use crate::{
    config::AuthConfig,
    errors::{Error, Result},
    guardrails::Tier,
};

/// Who is calling and with what privileges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub api_key: Option<String>,
    pub is_admin: bool,
    pub user_id: Option<String>,
    /// `anonymous`, `authenticated`, or a key-based caller (`service`, `admin`)
    pub user_type: String,
    pub tier: Tier,
}

impl AuthContext {
    pub fn anonymous() -> Self {
        Self {
            api_key: None,
            is_admin: false,
            user_id: None,
            user_type: "anonymous".to_string(),
            tier: Tier::Free,
        }
    }

    fn service(api_key: &str) -> Self {
        Self {
            api_key: Some(api_key.to_string()),
            is_admin: false,
            user_id: None,
            user_type: "service".to_string(),
            tier: Tier::Basic,
        }
    }

    fn admin(api_key: &str) -> Self {
        Self {
            api_key: Some(api_key.to_string()),
            is_admin: true,
            user_id: None,
            user_type: "admin".to_string(),
            tier: Tier::Admin,
        }
    }

    fn user(user_id: String) -> Self {
        Self {
            api_key: None,
            is_admin: false,
            user_id: Some(user_id),
            user_type: "authenticated".to_string(),
            tier: Tier::Free,
        }
    }
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

fn matches_key(candidate: &str, configured: Option<&String>) -> bool {
    configured.is_some_and(|key| !key.is_empty() && constant_time_eq(candidate.as_bytes(), key.as_bytes()))
}

fn unauthenticated(message: &str) -> Error {
    Error::Unauthenticated {
        message: Some(message.to_string()),
    }
}

fn user_from_token(config: &AuthConfig, token: &str) -> Result<AuthContext> {
    jwt::user_id_from_token(token, config.jwt_secret.as_deref())
        .map(AuthContext::user)
        .ok_or_else(|| unauthenticated("Invalid authentication token."))
}

/// Require a valid `X-API-Key`.
pub fn verify_api_key(config: &AuthConfig, api_key: Option<&str>) -> Result<AuthContext> {
    let Some(api_key) = api_key.filter(|k| !k.is_empty()) else {
        return Err(unauthenticated("API key required. Include X-API-Key header."));
    };

    if matches_key(api_key, config.dave_api_key.as_ref()) {
        return Ok(AuthContext::service(api_key));
    }
    if matches_key(api_key, config.admin_api_key.as_ref()) {
        return Ok(AuthContext::admin(api_key));
    }

    Err(unauthenticated("Invalid API key."))
}

/// Require the admin key, from `X-API-Key` or else the bearer token.
pub fn verify_admin_key(config: &AuthConfig, api_key: Option<&str>, bearer: Option<&str>) -> Result<AuthContext> {
    let Some(key) = api_key.filter(|k| !k.is_empty()).or(bearer) else {
        return Err(unauthenticated("Admin authentication required."));
    };

    if matches_key(key, config.admin_api_key.as_ref()) {
        return Ok(AuthContext::admin(key));
    }

    Err(Error::Forbidden {
        message: "Admin access required.".to_string(),
    })
}

/// Accept anonymous callers, but reject credentials that are present and invalid.
pub fn optional_auth(config: &AuthConfig, api_key: Option<&str>, bearer: Option<&str>) -> Result<AuthContext> {
    if let Some(api_key) = api_key.filter(|k| !k.is_empty()) {
        return verify_api_key(config, Some(api_key));
    }

    if let Some(token) = bearer {
        return user_from_token(config, token);
    }

    Ok(AuthContext::anonymous())
}

/// Require a user JWT or the admin key. Non-admin API keys are refused so user-scoped
/// endpoints cannot be read with a shared service key.
pub fn verify_user_or_admin(config: &AuthConfig, api_key: Option<&str>, bearer: Option<&str>) -> Result<AuthContext> {
    if let Some(api_key) = api_key.filter(|k| !k.is_empty()) {
        let context = verify_api_key(config, Some(api_key))?;
        if context.is_admin {
            return Ok(context);
        }
        return Err(Error::Forbidden {
            message: "User authentication required.".to_string(),
        });
    }

    if let Some(token) = bearer {
        if matches_key(token, config.admin_api_key.as_ref()) {
            return Ok(AuthContext::admin(token));
        }
        return user_from_token(config, token);
    }

    Err(unauthenticated("Authentication required."))
}
