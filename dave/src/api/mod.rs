//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers for all API endpoints
//! - **[`models`]**: Request/response data structures for API communication
//!
//! # API Structure
//!
//! - **Probes** (`/health`, `/ready`, `/metadata`, `/health/*`): Liveness, readiness and prompt diagnostics
//! - **Chat** (`/api/v1/chat/*`): Guarded conversations with Dave, blocking or streamed over SSE
//! - **Knowledge** (`/api/v1/knowledge/*`): Article and FAQ search and lookup
//! - **Prompts** (`/api/v1/admin/prompts/*`): Versioned system prompt administration
//! - **Nudges** (`/api/v1/nudges/*`): Short motivational messages for automation workflows
//!
//! # OpenAPI Documentation
//!
//! All endpoints are documented with `utoipa`. The document is served at `/openapi.json`
//! and rendered at `/docs`.

pub mod handlers;
pub mod models;
