//! Probes, service metadata and the prompt loading report.

use std::collections::BTreeMap;

use axum::{Json, extract::State};
use serde_json::json;
use tracing::{instrument, warn};

use crate::{
    AppState,
    api::models::health::{
        LivenessResponse, MetadataResponse, PromptCheck, PromptReport, Readiness, ReadinessChecks, ReadinessResponse,
        StatusResponse,
    },
    auth::extractors::AdminAuth,
    errors::{Error, Result},
    services::{
        excerpt,
        prompt_manager::{DAVE_SYSTEM_CATEGORY, RECOVERY_LANGUAGE_CATEGORY},
    },
};

/// Prompts the chat service loads, in the order they are reported.
const REQUIRED_PROMPTS: [(&str, &str); 7] = [
    (DAVE_SYSTEM_CATEGORY, "base_personality"),
    (DAVE_SYSTEM_CATEGORY, "job_seeker_mode"),
    (DAVE_SYSTEM_CATEGORY, "employer_mode"),
    (DAVE_SYSTEM_CATEGORY, "treatment_center_mode"),
    (DAVE_SYSTEM_CATEGORY, "off_topic_redirect"),
    (DAVE_SYSTEM_CATEGORY, "welcome_message"),
    (RECOVERY_LANGUAGE_CATEGORY, "guidelines"),
];

#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    summary = "Health check",
    responses((status = 200, description = "Service is up", body = StatusResponse))
)]
pub async fn health(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse::new("ok", json!({ "service": state.config.service_name })))
}

#[utoipa::path(
    get,
    path = "/ready",
    tag = "health",
    summary = "Readiness probe",
    responses(
        (status = 200, description = "Service accepts traffic", body = StatusResponse),
        (status = 503, description = "Service under maintenance")
    )
)]
pub async fn ready(State(state): State<AppState>) -> Result<Json<StatusResponse>> {
    if state.config.maintenance_mode {
        return Err(Error::ServiceUnavailable {
            message: "Service under maintenance".to_string(),
        });
    }
    Ok(Json(StatusResponse::new(
        "ready",
        json!({ "environment": state.config.environment }),
    )))
}

#[utoipa::path(
    get,
    path = "/api/v1/ping",
    tag = "health",
    summary = "Sample status endpoint",
    responses((status = 200, body = StatusResponse))
)]
pub async fn ping() -> Json<StatusResponse> {
    Json(StatusResponse::new("pong", json!({ "timestamp": "now" })))
}

#[utoipa::path(
    get,
    path = "/metadata",
    tag = "health",
    summary = "Service metadata",
    responses((status = 200, body = MetadataResponse))
)]
pub async fn metadata(State(state): State<AppState>) -> Json<MetadataResponse> {
    Json(MetadataResponse {
        service: state.config.service_name.clone(),
        environment: state.config.environment.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[utoipa::path(
    get,
    path = "/health/live",
    tag = "health",
    summary = "Liveness probe",
    responses((status = 200, body = LivenessResponse))
)]
pub async fn liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "alive".to_string(),
    })
}

/// Readiness of the storage and model dependencies. Always answers 200; the body says whether
/// the service is ready.
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "health",
    summary = "Dependency readiness",
    responses((status = 200, body = ReadinessResponse))
)]
#[instrument(skip_all)]
pub async fn readiness(State(state): State<AppState>) -> Json<ReadinessResponse> {
    let mut status = Readiness::Ready;

    let database = match state.storage.prompts.health_check().await {
        Ok(()) => "ok".to_string(),
        Err(e) => {
            warn!("Database readiness check failed: {}", e);
            status = Readiness::NotReady;
            format!("error: {e}")
        }
    };

    let gemini = if state.llm.is_configured() {
        "ok".to_string()
    } else {
        status = Readiness::NotReady;
        "not configured".to_string()
    };

    Json(ReadinessResponse {
        status,
        checks: ReadinessChecks { database, gemini },
    })
}

/// Which prompts load from storage and which fall back to built-in text.
#[utoipa::path(
    get,
    path = "/health/debug/prompts",
    tag = "health",
    summary = "Prompt loading report",
    responses(
        (status = 200, body = BTreeMap<String, PromptCheck>),
        (status = 401, description = "Admin authentication required"),
        (status = 403, description = "Admin access required")
    ),
    security(("ApiKeyAuth" = []), ("BearerAuth" = []))
)]
#[instrument(skip_all)]
pub async fn debug_prompts(State(state): State<AppState>, _: AdminAuth) -> Json<PromptReport> {
    let mut report = PromptReport::new();

    for (category, name) in REQUIRED_PROMPTS {
        let check = match state.prompt_manager.get_prompt(category, name, false).await {
            Ok(Some(content)) => PromptCheck::Found {
                preview: excerpt(&content, 100),
                length: content.chars().count(),
            },
            Ok(None) => PromptCheck::NotFound { using_fallback: true },
            Err(e) => PromptCheck::Error { error: e.to_string() },
        };
        report.insert(format!("{category}/{name}"), check);
    }

    let full_prompt = state.prompt_manager.dave_system_prompt("job_seeker", true).await;
    report.insert(
        "full_system_prompt".to_string(),
        PromptCheck::Built {
            length: full_prompt.chars().count(),
            preview: excerpt(&full_prompt, 200),
        },
    );

    Json(report)
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use crate::test_utils::*;

    #[tokio::test]
    async fn test_golden_endpoints() {
        let app = create_test_app(ScriptedModel::default());

        let response = app.get("/health").await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["details"]["service"], "dave");

        let response = app.get("/ready").await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["status"], "ready");
        assert_eq!(body["details"]["environment"], "test");

        let body: serde_json::Value = app.get("/api/v1/ping").await.json();
        assert_eq!(body["status"], "pong");
        assert_eq!(body["details"]["timestamp"], "now");
    }

    #[tokio::test]
    async fn test_ready_in_maintenance_mode() {
        let mut config = create_test_config();
        config.maintenance_mode = true;
        let app = create_test_app_with(config, crate::Storage::in_memory(), ScriptedModel::default());

        let response = app.get("/ready").await;
        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = response.json();
        assert_eq!(body["detail"], "Service under maintenance");

        // Liveness is unaffected
        app.get("/health").await.assert_status_ok();
    }

    #[tokio::test]
    async fn test_metadata_reports_semantic_version() {
        let app = create_test_app(ScriptedModel::default());
        let body: serde_json::Value = app.get("/metadata").await.json();
        assert_eq!(body["service"], "dave");
        assert_eq!(body["version"].as_str().unwrap().matches('.').count(), 2);
    }

    #[tokio::test]
    async fn test_dependency_readiness() {
        let app = create_test_app(ScriptedModel::default());
        let body: serde_json::Value = app.get("/health/ready").await.json();
        assert_eq!(body["status"], "ready");
        assert_eq!(body["checks"]["database"], "ok");
        assert_eq!(body["checks"]["gemini"], "ok");

        let app = create_test_app(ScriptedModel::unconfigured());
        let body: serde_json::Value = app.get("/health/ready").await.json();
        assert_eq!(body["status"], "not_ready");
        assert_eq!(body["checks"]["gemini"], "not configured");

        let body: serde_json::Value = app.get("/health/live").await.json();
        assert_eq!(body["status"], "alive");
    }

    #[tokio::test]
    async fn test_prompt_report_uses_fallbacks() {
        let app = create_test_app(ScriptedModel::default());

        app.get("/health/debug/prompts").await.assert_status(StatusCode::UNAUTHORIZED);

        let response = app
            .get("/health/debug/prompts")
            .add_header("x-api-key", TEST_ADMIN_KEY)
            .await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["dave_system/base_personality"]["status"], "not_found");
        assert_eq!(body["dave_system/base_personality"]["using_fallback"], true);
        assert_eq!(body["recovery_language/guidelines"]["status"], "not_found");
        assert_eq!(body["full_system_prompt"]["status"], "built");
        assert!(body["full_system_prompt"]["length"].as_u64().unwrap() > 0);
    }
}
