//! # dave: career-coach AI service
//!
//! `dave` is the backend behind Dave, Employa's career coach for job seekers in recovery,
//! employers and treatment centers. It wraps a Gemini language model with guardrails,
//! a searchable knowledge base and admin-managed, versioned system prompts.
//!
//! ## Architecture
//!
//! The application is built on [Axum](https://github.com/tokio-rs/axum) for the HTTP layer.
//! Persistence goes through the repository traits in [`db::handlers`]; with a `database_url`
//! they are backed by PostgreSQL, otherwise by the in-process stores in [`db::in_memory`].
//!
//! ### Request Flow
//!
//! A chat message first passes the [`guardrails`]: a tiered sliding-window rate limiter,
//! prompt injection detection and topic classification. Allowed messages are answered by
//! [`services::chat::ChatService`], which assembles a system prompt from the admin prompt store
//! ([`services::prompt_manager`]), attaches relevant knowledge base entries
//! ([`services::knowledge`]) and recent conversation history, and calls the model through the
//! [`gemini::LanguageModel`] trait. Responses are returned whole or streamed as server-sent events.
//!
//! ### Core Components
//!
//! - **API layer** ([`api`]): handlers and request/response models
//! - **Authentication** ([`auth`]): service and admin API keys, user JWTs and rate limit tiers
//! - **Language model** ([`gemini`]): Gemini REST client behind a circuit breaker
//! - **Middleware** ([`middleware`]): request ids, correlation ids and API version deprecation
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use dave::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = dave::config::Args::parse();
//!     let config = Config::load(&args)?;
//!     dave::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     }).await
//! }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod gemini;
pub mod guardrails;
pub mod middleware;
mod openapi;
pub mod services;
pub mod telemetry;
#[cfg(test)]
pub mod test_utils;
pub mod versions;

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    Router,
    http::{self, HeaderValue, StatusCode},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};
use bon::Builder;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

pub use config::Config;

use crate::{
    db::{
        handlers::{ConversationRepository, KnowledgeRepository, PgConversations, PgKnowledge, PgPrompts, PromptRepository},
        in_memory::{InMemoryConversations, InMemoryKnowledge, InMemoryPrompts},
    },
    gemini::{GeminiClient, LanguageModel},
    guardrails::{Guardrails, RateLimiter},
    middleware::{correlation_id_middleware, deprecation_middleware, request_id_middleware},
    openapi::ApiDoc,
    services::{chat::ChatService, knowledge::KnowledgeSearch, nudges::NudgeService, prompt_manager::PromptManager},
    versions::DeprecationRegistry,
};

/// Repositories the services read and write through.
///
/// `pool` is set when the repositories are backed by PostgreSQL so it can be closed on shutdown.
#[derive(Clone)]
pub struct Storage {
    pub pool: Option<PgPool>,
    pub conversations: Arc<dyn ConversationRepository>,
    pub prompts: Arc<dyn PromptRepository>,
    pub knowledge: Arc<dyn KnowledgeRepository>,
}

impl Storage {
    /// Connect to PostgreSQL and run pending migrations.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await.context("Failed to connect to database")?;
        db::migrator().run(&pool).await.context("Failed to run database migrations")?;
        info!("Database migrations applied");

        Ok(Self {
            conversations: Arc::new(PgConversations::new(pool.clone())),
            prompts: Arc::new(PgPrompts::new(pool.clone())),
            knowledge: Arc::new(PgKnowledge::new(pool.clone())),
            pool: Some(pool),
        })
    }

    /// Empty in-process storage.
    pub fn in_memory() -> Self {
        Self::in_memory_with_knowledge(InMemoryKnowledge::new(Vec::new(), Vec::new(), Vec::new()))
    }

    /// In-process storage over a fixed knowledge base.
    pub fn in_memory_with_knowledge(knowledge: InMemoryKnowledge) -> Self {
        Self {
            pool: None,
            conversations: Arc::new(InMemoryConversations::new()),
            prompts: Arc::new(InMemoryPrompts::new()),
            knowledge: Arc::new(knowledge),
        }
    }
}

/// Application state shared across all request handlers.
///
/// Services are built once at startup and shared behind `Arc`s; cloning the state is cheap.
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub storage: Storage,
    pub llm: Arc<dyn LanguageModel>,
    pub prompt_manager: Arc<PromptManager>,
    pub knowledge: Arc<KnowledgeSearch>,
    pub chat: ChatService,
    pub nudges: Arc<NudgeService>,
    /// Per-key limiter for nudge generation, separate from the chat guardrails
    pub nudge_limiter: Arc<RateLimiter>,
    pub deprecations: Arc<DeprecationRegistry>,
}

impl AppState {
    /// Wire the services over `storage` and `llm`.
    pub fn assemble(config: Config, storage: Storage, llm: Arc<dyn LanguageModel>) -> Self {
        let prompt_manager = Arc::new(PromptManager::new(storage.prompts.clone(), config.prompts.cache_ttl));
        let knowledge = Arc::new(KnowledgeSearch::new(storage.knowledge.clone(), llm.clone()));
        let guardrails = Arc::new(Guardrails::new(RateLimiter::new(&config.rate_limit)));
        let chat = ChatService::new(
            storage.conversations.clone(),
            knowledge.clone(),
            prompt_manager.clone(),
            llm.clone(),
            guardrails,
        );
        let nudges = Arc::new(NudgeService::new(llm.clone(), prompt_manager.clone(), config.gemini.model.clone()));

        AppState::builder()
            .nudge_limiter(Arc::new(RateLimiter::new(&config.rate_limit)))
            .deprecations(Arc::new(DeprecationRegistry::from_config(&config.deprecated_versions)))
            .prompt_manager(prompt_manager)
            .knowledge(knowledge)
            .chat(chat)
            .nudges(nudges)
            .llm(llm)
            .storage(storage)
            .config(config)
            .build()
    }
}

/// CORS from `cors.allowed_origins`; `*` allows any origin.
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(vec![
            http::header::HeaderName::from_static("x-request-id"),
            http::header::HeaderName::from_static("x-correlation-id"),
        ]);

    if config.cors.allowed_origins.iter().any(|origin| origin == "*") {
        return Ok(cors.allow_origin(Any));
    }

    let mut origins = Vec::new();
    for origin in &config.cors.allowed_origins {
        origins.push(origin.parse::<HeaderValue>()?);
    }
    Ok(cors.allow_origin(origins))
}

/// Build the application router with all endpoints and middleware.
///
/// Probes live at the root, the versioned API under `/api/v1`, and the OpenAPI document at
/// `/openapi.json` with an interactive reference at `/docs`.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    use api::handlers::{chat, health, knowledge, nudges, prompts};

    let v1_routes = Router::new()
        .route("/ping", get(health::ping))
        // Chat
        .route("/chat/message", post(chat::send_message))
        .route("/chat/stream", get(chat::stream_message))
        .route("/chat/start", post(chat::start_conversation))
        .route("/chat/conversations", get(chat::list_conversations))
        .route(
            "/chat/conversations/{conversation_id}",
            get(chat::get_conversation).delete(chat::archive_conversation),
        )
        // Knowledge base
        .route("/knowledge/search", post(knowledge::search))
        .route("/knowledge/articles/{article_id}", get(knowledge::get_article))
        .route("/knowledge/articles/slug/{slug}", get(knowledge::get_article_by_slug))
        .route("/knowledge/faqs", get(knowledge::list_faqs))
        .route("/knowledge/categories", get(knowledge::list_categories))
        .route("/knowledge/recovery", get(knowledge::recovery_articles))
        // Admin prompts
        .route("/admin/prompts", get(prompts::list_prompts).post(prompts::create_prompt))
        .route("/admin/prompts/categories", get(prompts::list_categories))
        .route("/admin/prompts/cache/clear", post(prompts::clear_cache))
        .route("/admin/prompts/category/{category}", get(prompts::prompts_in_category))
        .route(
            "/admin/prompts/{prompt_id}",
            get(prompts::get_prompt).put(prompts::update_prompt),
        )
        .route("/admin/prompts/{prompt_id}/rollback", post(prompts::rollback_prompt))
        // Nudges
        .route("/nudges/generate", post(nudges::generate_nudge))
        .route("/nudges/generate/batch", post(nudges::generate_batch))
        .route("/nudges/types", get(nudges::list_nudge_types));

    let router = Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/metadata", get(health::metadata))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route("/health/debug/prompts", get(health::debug_prompts))
        .nest("/api/v1", v1_routes)
        .with_state(state.clone())
        .route("/openapi.json", get(|| async { axum::Json(ApiDoc::openapi()) }))
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()));

    let cors_layer = create_cors_layer(&state.config)?;

    // Layers run bottom-up: tracing sees every request, deprecation runs closest to the handlers
    let router = router
        .layer(from_fn_with_state(state.deprecations.clone(), deprecation_middleware))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::GATEWAY_TIMEOUT,
            state.config.request_timeout,
        ))
        .layer(from_fn(correlation_id_middleware))
        .layer(from_fn(request_id_middleware))
        .layer(cors_layer)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );

    Ok(router)
}

/// Main application struct that owns the router and its state.
pub struct Application {
    router: Router,
    app_state: AppState,
    config: Config,
}

impl Application {
    /// Create a new application instance with all resources initialized.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting dave with configuration: {:#?}", config);

        let storage = match &config.database_url {
            Some(url) => Storage::connect(url).await?,
            None => {
                info!("No database_url configured, using in-memory storage");
                Storage::in_memory()
            }
        };

        let llm = GeminiClient::new(&config.gemini)?;
        if !llm.is_configured() {
            info!("No Gemini API key configured, chat responses will use fallbacks");
        }

        Self::from_parts(config, storage, Arc::new(llm))
    }

    /// Build the application over existing storage and model.
    pub fn from_parts(config: Config, storage: Storage, llm: Arc<dyn LanguageModel>) -> anyhow::Result<Self> {
        let app_state = AppState::assemble(config.clone(), storage, llm);
        let router = build_router(&app_state)?;
        Ok(Self {
            router,
            app_state,
            config,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        let peer = std::net::SocketAddr::from(([127, 0, 0, 1], 4000));
        let service = self
            .router
            .layer(axum::extract::connect_info::MockConnectInfo(peer))
            .into_make_service();
        axum_test::TestServer::new(service).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            environment = %self.config.environment,
            "Dave listening on http://{}, available at http://localhost:{}",
            bind_addr,
            self.config.port
        );

        axum::serve(listener, self.router.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown)
            .await?;

        if let Some(pool) = &self.app_state.storage.pool {
            info!("Closing database connections...");
            pool.close().await;
        }

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
