//! Axum extractors applying the policies in [`crate::auth`].

use std::{
    convert::Infallible,
    net::{IpAddr, SocketAddr},
};

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, header, request::Parts},
};
use tracing::{instrument, trace};

use super::AuthContext;
use crate::{AppState, errors::Error};

pub const API_KEY_HEADER: &str = "x-api-key";

fn api_key(parts: &Parts) -> Option<&str> {
    parts.headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok())
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Caller holding a valid `X-API-Key`.
#[derive(Debug, Clone)]
pub struct ApiKeyAuth(pub AuthContext);

impl FromRequestParts<AppState> for ApiKeyAuth {
    type Rejection = Error;

    #[instrument(skip_all)]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        super::verify_api_key(&state.config.auth, api_key(parts)).map(ApiKeyAuth)
    }
}

/// Caller holding the admin key.
#[derive(Debug, Clone)]
pub struct AdminAuth(pub AuthContext);

impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = Error;

    #[instrument(skip_all)]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        super::verify_admin_key(&state.config.auth, api_key(parts), bearer_token(parts)).map(AdminAuth)
    }
}

/// Any caller; anonymous when no credentials are sent.
#[derive(Debug, Clone)]
pub struct OptionalAuth(pub AuthContext);

impl FromRequestParts<AppState> for OptionalAuth {
    type Rejection = Error;

    #[instrument(skip_all)]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let context = super::optional_auth(&state.config.auth, api_key(parts), bearer_token(parts))?;
        trace!(user_type = %context.user_type, tier = context.tier.as_str(), "Resolved optional auth");
        Ok(OptionalAuth(context))
    }
}

/// A signed-in user or an admin.
#[derive(Debug, Clone)]
pub struct UserOrAdminAuth(pub AuthContext);

impl FromRequestParts<AppState> for UserOrAdminAuth {
    type Rejection = Error;

    #[instrument(skip_all)]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        super::verify_user_or_admin(&state.config.auth, api_key(parts), bearer_token(parts)).map(UserOrAdminAuth)
    }
}

/// Address of the caller for rate limiting.
///
/// `X-Forwarded-For` entries are written by whoever sends them, so only the ones appended by
/// our own proxies count: with `trusted_proxies = n` the n-th entry from the right is the
/// address the outermost proxy saw. Without trusted proxies the peer address is used.
fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>, trusted_proxies: usize) -> Option<IpAddr> {
    if trusted_proxies == 0 {
        return peer;
    }

    let hops: Vec<&str> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .collect();

    hops.len()
        .checked_sub(trusted_proxies)
        .and_then(|index| hops[index].parse().ok())
        .or(peer)
}

/// Client address for rate limiting, honouring `rate_limit.trusted_proxies`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub Option<String>);

impl FromRequestParts<AppState> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let peer = ConnectInfo::<SocketAddr>::from_request_parts(parts, state)
            .await
            .ok()
            .map(|ConnectInfo(addr)| addr.ip());
        let ip = client_ip(&parts.headers, peer, state.config.rate_limit.trusted_proxies);
        Ok(ClientIp(ip.map(|ip| ip.to_string())))
    }
}
