//! RFC 8594 deprecation headers and sunset enforcement for versioned API paths.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::warn;

use crate::versions::DeprecationRegistry;

const SUNSET_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// `v1` for `/api/v1/...`; `None` for unversioned paths.
fn api_version(path: &str) -> Option<&str> {
    let mut segments = path.trim_matches('/').split('/');
    match (segments.next(), segments.next()) {
        (Some("api"), Some(version)) if !version.is_empty() => Some(version),
        _ => None,
    }
}

pub async fn deprecation_middleware(
    State(registry): State<Arc<DeprecationRegistry>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let Some(version) = api_version(&path).map(str::to_string) else {
        return next.run(request).await;
    };

    if registry.is_sunset(&version) {
        warn!(version = %version, path = %path, "Request to sunset API version");
        return (
            StatusCode::GONE,
            Json(json!({ "error": format!("API version {version} has been sunset") })),
        )
            .into_response();
    }

    let mut response = next.run(request).await;

    let Some(status) = registry.status(&version).filter(|s| s.deprecated) else {
        return response;
    };

    let headers = response.headers_mut();
    headers.insert("deprecation", HeaderValue::from_static("true"));
    if let Some(value) = status
        .sunset_date
        .and_then(|sunset| HeaderValue::from_str(&sunset.format(SUNSET_FORMAT).to_string()).ok())
    {
        headers.insert("sunset", value);
    }
    if let Some(value) = status
        .migration_guide
        .as_ref()
        .and_then(|guide| HeaderValue::from_str(&format!("<{guide}>; rel=\"deprecation\"")).ok())
    {
        headers.insert("link", value);
    }
    if let Some(days) = status.days_until_sunset.filter(|d| *d > 0) {
        headers.insert("x-api-deprecation-days-remaining", HeaderValue::from(days));
    }

    warn!(version = %version, path = %path, sunset_date = ?status.sunset_date, "Deprecated API usage");
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, middleware::from_fn_with_state, routing::get};
    use axum_test::TestServer;
    use chrono::{Duration, TimeZone, Utc};

    fn server(registry: Arc<DeprecationRegistry>) -> TestServer {
        let app = Router::new()
            .route("/api/{version}/ping", get(|| async { "pong" }))
            .route("/health", get(|| async { "ok" }))
            .layer(from_fn_with_state(registry, deprecation_middleware));
        TestServer::new(app).unwrap()
    }

    #[test]
    fn test_api_version_extraction() {
        assert_eq!(api_version("/api/v1/chat/message"), Some("v1"));
        assert_eq!(api_version("/api/v2"), Some("v2"));
        assert_eq!(api_version("/health"), None);
        assert_eq!(api_version("/apis/v1"), None);
        assert_eq!(api_version("/api/"), None);
    }

    #[tokio::test]
    async fn test_active_version_has_no_headers() {
        let server = server(Arc::new(DeprecationRegistry::default()));
        let response = server.get("/api/v1/ping").await;
        response.assert_status_ok();
        assert!(response.maybe_header("deprecation").is_none());
    }

    #[tokio::test]
    async fn test_deprecated_version_headers() {
        let registry = Arc::new(DeprecationRegistry::default());
        let sunset = Utc.with_ymd_and_hms(2099, 1, 15, 0, 0, 0).unwrap();
        registry.deprecate_until("v1", sunset, Some("https://example.com/guide".to_string()));

        let response = server(registry).get("/api/v1/ping").await;
        response.assert_status_ok();
        assert_eq!(response.header("deprecation"), "true");
        assert_eq!(response.header("sunset"), "Thu, 15 Jan 2099 00:00:00 GMT");
        assert_eq!(response.header("link"), "<https://example.com/guide>; rel=\"deprecation\"");
        assert!(response.maybe_header("x-api-deprecation-days-remaining").is_some());
    }

    #[tokio::test]
    async fn test_sunset_version_is_gone() {
        let registry = Arc::new(DeprecationRegistry::default());
        registry.deprecate_until("v0", Utc::now() - Duration::days(1), None);

        let server = server(registry);
        let response = server.get("/api/v0/ping").await;
        response.assert_status(StatusCode::GONE);
        response.assert_json(&json!({ "error": "API version v0 has been sunset" }));

        server.get("/health").await.assert_status_ok();
    }
}
