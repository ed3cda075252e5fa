//! Nudge generation for automation workflows. Callers authenticate with the service API key
//! and are rate limited per key.

use axum::{Json, extract::State};
use tracing::instrument;

use crate::{
    AppState,
    api::models::nudges::{
        NudgeBatchRequest, NudgeBatchResponse, NudgeGenerateRequest, NudgeGenerateResponse, NudgeTypeList,
    },
    auth::{
        AuthContext,
        extractors::{ApiKeyAuth, ClientIp},
    },
    errors::{Error, Result},
    services::nudges::nudge_types,
};

/// Tokens charged against the caller's budget for each generate call.
const NUDGE_TOKEN_COST: u64 = 150;

/// Refuse the call when the key is over its limits, otherwise count it.
fn check_rate_limit(state: &AppState, auth: &AuthContext, ip_address: Option<&str>) -> Result<()> {
    let key = auth.api_key.as_deref();
    let verdict = state.nudge_limiter.check(key, ip_address, auth.tier);
    if verdict.blocked {
        return Err(Error::TooManyRequests {
            message: verdict.message.unwrap_or_default(),
            reason: verdict.reason.unwrap_or_default(),
        });
    }
    state.nudge_limiter.record_request(key, ip_address, NUDGE_TOKEN_COST);
    Ok(())
}

/// Generate one nudge. Generation never fails; without the model a template message is used.
#[utoipa::path(
    post,
    path = "/nudges/generate",
    tag = "nudges",
    summary = "Generate a nudge",
    request_body = NudgeGenerateRequest,
    responses(
        (status = 200, body = NudgeGenerateResponse),
        (status = 400, description = "Invalid request"),
        (status = 401, description = "API key required"),
        (status = 429, description = "Rate limit exceeded")
    ),
    security(("ApiKeyAuth" = []))
)]
#[instrument(skip_all, fields(user_id = %request.user_id, nudge_type = request.nudge_type.as_str()))]
pub async fn generate_nudge(
    State(state): State<AppState>,
    ApiKeyAuth(auth): ApiKeyAuth,
    ClientIp(ip_address): ClientIp,
    Json(request): Json<NudgeGenerateRequest>,
) -> Result<Json<NudgeGenerateResponse>> {
    request.validate()?;
    check_rate_limit(&state, &auth, ip_address.as_deref())?;

    Ok(Json(state.nudges.generate(&request).await))
}

/// Generate nudges for up to 50 users. The batch counts as one call against the rate limit.
#[utoipa::path(
    post,
    path = "/nudges/generate/batch",
    tag = "nudges",
    summary = "Generate nudges in a batch",
    request_body = NudgeBatchRequest,
    responses(
        (status = 200, body = NudgeBatchResponse),
        (status = 400, description = "Batch must contain between 1 and 50 requests"),
        (status = 401, description = "API key required"),
        (status = 429, description = "Rate limit exceeded")
    ),
    security(("ApiKeyAuth" = []))
)]
#[instrument(skip_all, fields(batch_size = request.nudges.len()))]
pub async fn generate_batch(
    State(state): State<AppState>,
    ApiKeyAuth(auth): ApiKeyAuth,
    ClientIp(ip_address): ClientIp,
    Json(request): Json<NudgeBatchRequest>,
) -> Result<Json<NudgeBatchResponse>> {
    request.validate()?;
    check_rate_limit(&state, &auth, ip_address.as_deref())?;

    let mut results = Vec::with_capacity(request.nudges.len());
    for nudge in &request.nudges {
        results.push(state.nudges.generate(nudge).await);
    }

    Ok(Json(NudgeBatchResponse {
        total_requested: request.nudges.len(),
        total_generated: results.len(),
        failed: request.nudges.len() - results.len(),
        results,
    }))
}

#[utoipa::path(
    get,
    path = "/nudges/types",
    tag = "nudges",
    summary = "Available nudge types",
    responses(
        (status = 200, body = NudgeTypeList),
        (status = 401, description = "API key required")
    ),
    security(("ApiKeyAuth" = []))
)]
pub async fn list_nudge_types(_: ApiKeyAuth) -> Json<NudgeTypeList> {
    Json(NudgeTypeList {
        nudge_types: nudge_types(),
    })
}
