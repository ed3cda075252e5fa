//! Request start/end logging keyed by `X-Request-Id`.

use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use tracing::info;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

pub async fn request_id_middleware(request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    info!(request_id = %request_id, path = %request.uri().path(), method = %request.method(), "request.start");
    let mut response = next.run(request).await;
    info!(request_id = %request_id, status_code = response.status().as_u16(), "request.end");

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
