//! Correlation ids for tracing a request across services.
//!
//! The id is taken from the first of `X-Correlation-ID`, `X-Request-ID` or `X-Trace-ID` sent by
//! the caller, or generated. It is recorded on a tracing span wrapping the request, available
//! to handler code through [`current_correlation_id`], and echoed back as `X-Correlation-ID`.

use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use tracing::{Instrument, info_span};
use uuid::Uuid;

pub const CORRELATION_HEADERS: [&str; 3] = ["x-correlation-id", "x-request-id", "x-trace-id"];

tokio::task_local! {
    static CORRELATION_ID: String;
}

/// Correlation id of the request being handled on this task, if any.
pub fn current_correlation_id() -> Option<String> {
    CORRELATION_ID.try_with(|id| id.clone()).ok()
}

pub async fn correlation_id_middleware(request: Request, next: Next) -> Response {
    let correlation_id = CORRELATION_HEADERS
        .iter()
        .find_map(|name| {
            request
                .headers()
                .get(*name)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let span = info_span!("request", correlation_id = %correlation_id);
    let mut response = CORRELATION_ID
        .scope(correlation_id.clone(), next.run(request).instrument(span))
        .await;

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert(CORRELATION_HEADERS[0], value);
    }
    response
}
