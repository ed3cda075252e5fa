//! User JWT verification.
//!
//! Tokens are HS256-signed by the identity service with the shared `auth.jwt_secret`. Only the
//! subject and expiry are used.

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize, Deserialize)]
pub struct UserClaims {
    pub sub: String, // User ID
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
}

/// Extract the user id from a valid, unexpired token. `None` for anything else, including an
/// unconfigured secret.
pub fn user_id_from_token(token: &str, secret: Option<&str>) -> Option<String> {
    let secret = secret.filter(|s| !s.is_empty())?;
    let key = DecodingKey::from_secret(secret.as_bytes());
    let validation = Validation::new(Algorithm::HS256);

    match decode::<UserClaims>(token, &key, &validation) {
        Ok(data) if !data.claims.sub.is_empty() => Some(data.claims.sub),
        Ok(_) => None,
        Err(e) => {
            debug!("JWT rejected: {}", e);
            None
        }
    }
}

/// Sign a token for `user_id`. The identity service normally does this; it is exposed for
/// local tooling and tests.
pub fn issue_token(user_id: &str, secret: &str, ttl: Duration) -> jsonwebtoken::errors::Result<String> {
    let now = Utc::now().timestamp();
    let claims = UserClaims {
        sub: user_id.to_string(),
        exp: now + ttl.as_secs() as i64,
        iat: Some(now),
    };
    encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret.as_bytes()))
}
