use std::time::Instant;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::{
    AppState,
    api::models::knowledge::{
        ArticleList, ArticleResponse, CategoryList, FaqList, FaqQuery, KnowledgeResult, RecoveryQuery, SearchRequest,
        SearchResponse,
    },
    auth::extractors::OptionalAuth,
    db::models::knowledge::{Article, FaqFilter},
    errors::{Error, Result},
};

fn article_not_found(id: &str) -> Error {
    Error::NotFound {
        resource: "Article".to_string(),
        id: id.to_string(),
    }
}

/// Count a view and return the article. A failed count does not fail the read.
async fn viewed(state: &AppState, article: Article) -> ArticleResponse {
    if let Err(e) = state.knowledge.repository().increment_view_count(article.id).await {
        warn!(article_id = %article.id, "Failed to count article view: {}", e);
    }
    article.into()
}

/// Search articles and FAQs.
#[utoipa::path(
    post,
    path = "/knowledge/search",
    tag = "knowledge",
    summary = "Search the knowledge base",
    request_body = SearchRequest,
    responses(
        (status = 200, body = SearchResponse),
        (status = 400, description = "Invalid search request")
    ),
    security((), ("ApiKeyAuth" = []), ("BearerAuth" = []))
)]
#[instrument(skip_all, fields(query = %request.query, search_type = ?request.search_type))]
pub async fn search(
    State(state): State<AppState>,
    _: OptionalAuth,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    request.validate()?;
    let started = Instant::now();

    let filter = request.filters.clone().unwrap_or_default().article_filter();
    let hits = state
        .knowledge
        .search(&request.query, request.search_type, &filter, request.limit as usize)
        .await?;

    let results: Vec<KnowledgeResult> = hits
        .into_iter()
        .map(|hit| KnowledgeResult::from_hit(hit, request.include_content))
        .collect();

    Ok(Json(SearchResponse {
        total: results.len(),
        results,
        query: request.query,
        search_type: request.search_type,
        took_ms: started.elapsed().as_secs_f64() * 1000.0,
    }))
}

#[utoipa::path(
    get,
    path = "/knowledge/articles/{article_id}",
    tag = "knowledge",
    summary = "Get an article",
    params(("article_id" = String, Path, description = "Article ID")),
    responses(
        (status = 200, body = ArticleResponse),
        (status = 404, description = "Article not found")
    ),
    security((), ("ApiKeyAuth" = []), ("BearerAuth" = []))
)]
#[instrument(skip(state, _auth))]
pub async fn get_article(
    State(state): State<AppState>,
    _auth: OptionalAuth,
    Path(article_id): Path<String>,
) -> Result<Json<ArticleResponse>> {
    let id = Uuid::parse_str(&article_id).map_err(|_| article_not_found(&article_id))?;
    let article = state
        .knowledge
        .repository()
        .article(id)
        .await?
        .ok_or_else(|| article_not_found(&article_id))?;
    Ok(Json(viewed(&state, article).await))
}

#[utoipa::path(
    get,
    path = "/knowledge/articles/slug/{slug}",
    tag = "knowledge",
    summary = "Get an article by slug",
    params(("slug" = String, Path, description = "URL slug")),
    responses(
        (status = 200, body = ArticleResponse),
        (status = 404, description = "Article not found")
    ),
    security((), ("ApiKeyAuth" = []), ("BearerAuth" = []))
)]
#[instrument(skip(state, _auth))]
pub async fn get_article_by_slug(
    State(state): State<AppState>,
    _auth: OptionalAuth,
    Path(slug): Path<String>,
) -> Result<Json<ArticleResponse>> {
    let article = state
        .knowledge
        .repository()
        .article_by_slug(&slug)
        .await?
        .ok_or_else(|| article_not_found(&slug))?;
    Ok(Json(viewed(&state, article).await))
}

#[utoipa::path(
    get,
    path = "/knowledge/faqs",
    tag = "knowledge",
    summary = "List FAQs",
    params(FaqQuery),
    responses((status = 200, body = FaqList)),
    security((), ("ApiKeyAuth" = []), ("BearerAuth" = []))
)]
#[instrument(skip_all)]
pub async fn list_faqs(
    State(state): State<AppState>,
    _: OptionalAuth,
    Query(query): Query<FaqQuery>,
) -> Result<Json<FaqList>> {
    query.validate()?;
    let faqs = state
        .knowledge
        .repository()
        .faqs(&FaqFilter {
            category_id: query.category_id,
            featured_only: query.featured_only,
            limit: query.limit,
        })
        .await?;

    Ok(Json(FaqList {
        total: faqs.len(),
        faqs: faqs.into_iter().map(Into::into).collect(),
    }))
}

#[utoipa::path(
    get,
    path = "/knowledge/categories",
    tag = "knowledge",
    summary = "List categories",
    responses((status = 200, body = CategoryList)),
    security((), ("ApiKeyAuth" = []), ("BearerAuth" = []))
)]
#[instrument(skip_all)]
pub async fn list_categories(State(state): State<AppState>, _: OptionalAuth) -> Result<Json<CategoryList>> {
    let categories = state.knowledge.repository().categories().await?;
    Ok(Json(CategoryList {
        categories: categories.into_iter().map(Into::into).collect(),
    }))
}

/// Articles written for people in recovery.
#[utoipa::path(
    get,
    path = "/knowledge/recovery",
    tag = "knowledge",
    summary = "Recovery-focused articles",
    params(RecoveryQuery),
    responses((status = 200, body = ArticleList)),
    security((), ("ApiKeyAuth" = []), ("BearerAuth" = []))
)]
#[instrument(skip_all)]
pub async fn recovery_articles(
    State(state): State<AppState>,
    _: OptionalAuth,
    Query(query): Query<RecoveryQuery>,
) -> Result<Json<ArticleList>> {
    query.validate()?;
    let articles = state.knowledge.recovery_articles(query.limit as usize).await?;
    Ok(Json(ArticleList {
        total: articles.len(),
        articles: articles.into_iter().map(Into::into).collect(),
    }))
}
