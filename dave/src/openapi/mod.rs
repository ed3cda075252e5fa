//! OpenAPI documentation.
//!
//! [`ApiDoc`] describes the probes at the root and nests [`V1ApiDoc`] under `/api/v1`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::api;

/// Service API key and user JWT schemes referenced by the handlers' `security(...)` blocks.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.security_schemes.insert(
            "ApiKeyAuth".to_string(),
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                "x-api-key",
                "Service or admin API key. The admin key is also accepted as `Authorization: Bearer <key>` on admin routes.",
            ))),
        );
        components.security_schemes.insert(
            "BearerAuth".to_string(),
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .description(Some("HS256 user token. The `sub` claim is the user id."))
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::chat::send_message,
        api::handlers::chat::stream_message,
        api::handlers::chat::start_conversation,
        api::handlers::chat::list_conversations,
        api::handlers::chat::get_conversation,
        api::handlers::chat::archive_conversation,
        api::handlers::knowledge::search,
        api::handlers::knowledge::get_article,
        api::handlers::knowledge::get_article_by_slug,
        api::handlers::knowledge::list_faqs,
        api::handlers::knowledge::list_categories,
        api::handlers::knowledge::recovery_articles,
        api::handlers::prompts::list_prompts,
        api::handlers::prompts::create_prompt,
        api::handlers::prompts::list_categories,
        api::handlers::prompts::get_prompt,
        api::handlers::prompts::update_prompt,
        api::handlers::prompts::rollback_prompt,
        api::handlers::prompts::prompts_in_category,
        api::handlers::prompts::clear_cache,
        api::handlers::nudges::generate_nudge,
        api::handlers::nudges::generate_batch,
        api::handlers::nudges::list_nudge_types,
    ),
    components(schemas(
        api::models::chat::UserType,
        api::models::chat::UserContext,
        api::models::knowledge::SearchFilters,
        api::models::nudges::NudgeTypeInfo,
    )),
    tags(
        (name = "chat", description = "Conversations with Dave.

Every message passes the guardrails first: per-caller rate limits, prompt injection detection and topic classification. Blocked messages are answered with a refusal rather than an error."),
        (name = "knowledge", description = "Search and browse career articles and FAQs. Hybrid search blends full-text and embedding similarity."),
        (name = "prompts", description = "Versioned system prompts. Every update creates a new version; rollback re-activates an earlier one."),
        (name = "nudges", description = "Short motivational messages for automation workflows, rate limited per API key."),
    )
)]
pub struct V1ApiDoc;

#[derive(OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    nest((path = "/api/v1", api = V1ApiDoc)),
    paths(
        api::handlers::health::health,
        api::handlers::health::ready,
        api::handlers::health::ping,
        api::handlers::health::metadata,
        api::handlers::health::liveness,
        api::handlers::health::readiness,
        api::handlers::health::debug_prompts,
    ),
    tags(
        (name = "health", description = "Liveness and readiness probes for load balancers and orchestrators."),
    ),
    info(
        title = "Dave API",
        description = "Career-coach AI service for Employa.

## Authentication

- Service callers send `X-API-Key`.
- Users send `Authorization: Bearer <jwt>`.
- Chat and knowledge endpoints also accept anonymous callers, who are rate limited by IP address.

## Errors

Errors carry a `detail` field. Rate limit rejections use a structured detail:

```json
{ \"detail\": { \"error\": \"rate_limit_exceeded\", \"message\": \"...\", \"reason\": \"rate_limit_minute\" } }
```",
    ),
)]
pub struct ApiDoc;
