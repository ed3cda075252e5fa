//! API models for knowledge base endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::{check_length, check_range};
use crate::{
    db::models::knowledge::{Article, Faq, KnowledgeCategory},
    errors::Result,
    services::knowledge::{ArticleFilter, ResultKind, ResultSource, SearchHit, SearchType},
};

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct SearchFilters {
    /// Category ids or names; only the first is applied
    pub categories: Option<Vec<String>>,
    pub content_types: Option<Vec<String>>,
    pub difficulty_levels: Option<Vec<String>>,
    pub recovery_focused: Option<bool>,
    pub tags: Option<Vec<String>>,
}

impl SearchFilters {
    pub fn article_filter(&self) -> ArticleFilter {
        ArticleFilter {
            category: self.categories.as_ref().and_then(|c| c.first().cloned()),
            recovery_focused: self.recovery_focused,
        }
    }
}

fn default_search_limit() -> i64 {
    10
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SearchRequest {
    /// Search query (1-500 characters)
    pub query: String,
    #[serde(default)]
    pub search_type: SearchType,
    #[serde(default)]
    pub filters: Option<SearchFilters>,
    /// Maximum results to return (1-50)
    #[serde(default = "default_search_limit")]
    pub limit: i64,
    /// Include full content in results
    #[serde(default)]
    pub include_content: bool,
}

impl SearchRequest {
    pub fn validate(&self) -> Result<()> {
        check_length("query", &self.query, 1, 500)?;
        check_range("limit", self.limit, 1, 50)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct KnowledgeResult {
    #[schema(value_type = String, format = "uuid")]
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: ResultKind,
    pub title: String,
    pub excerpt: Option<String>,
    /// Only present when `include_content` was requested
    pub content: Option<String>,
    /// Category id
    pub category: Option<String>,
    pub url: String,
    /// Relevance score (0-1)
    pub score: f64,
    pub source: ResultSource,
}

impl KnowledgeResult {
    pub fn from_hit(hit: SearchHit, include_content: bool) -> Self {
        Self {
            id: hit.id,
            kind: hit.kind,
            title: hit.title,
            excerpt: hit.excerpt,
            content: if include_content { hit.content } else { None },
            category: hit.category_id.map(|id| id.to_string()),
            url: hit.url,
            score: hit.score,
            source: hit.source,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SearchResponse {
    pub results: Vec<KnowledgeResult>,
    pub total: usize,
    pub query: String,
    pub search_type: SearchType,
    pub took_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ArticleResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    pub excerpt: Option<String>,
    pub content: String,
    pub content_html: Option<String>,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub category_id: Option<Uuid>,
    pub category_name: Option<String>,
    pub content_type: String,
    pub difficulty_level: Option<String>,
    /// Minutes
    pub reading_time: Option<i32>,
    pub tags: Vec<String>,
    pub is_recovery_focused: bool,
    pub is_featured: bool,
    pub view_count: i32,
    pub helpful_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Article> for ArticleResponse {
    fn from(article: Article) -> Self {
        Self {
            id: article.id,
            title: article.title,
            slug: article.slug,
            excerpt: article.excerpt,
            content: article.content,
            content_html: article.content_html,
            category_id: article.category_id,
            category_name: article.category_name,
            content_type: article.content_type,
            difficulty_level: article.difficulty_level,
            reading_time: article.reading_time,
            tags: article.tags,
            is_recovery_focused: article.is_recovery_focused,
            is_featured: article.is_featured,
            view_count: article.view_count,
            helpful_count: article.helpful_count,
            created_at: article.created_at,
            updated_at: article.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FaqResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: Uuid,
    pub question: String,
    pub answer: String,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub category_id: Option<Uuid>,
    pub category_name: Option<String>,
    pub display_order: i32,
    pub is_featured: bool,
    pub is_expert_answer: bool,
    #[schema(value_type = Vec<String>)]
    pub related_article_ids: Vec<Uuid>,
}

impl From<Faq> for FaqResponse {
    fn from(faq: Faq) -> Self {
        Self {
            id: faq.id,
            question: faq.question,
            answer: faq.answer,
            category_id: faq.category_id,
            category_name: faq.category_name,
            display_order: faq.display_order,
            is_featured: faq.is_featured,
            is_expert_answer: faq.is_expert_answer,
            related_article_ids: faq.related_article_ids,
        }
    }
}

fn default_faq_limit() -> i64 {
    50
}

#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct FaqQuery {
    pub category_id: Option<Uuid>,
    #[serde(default)]
    pub featured_only: bool,
    /// Maximum FAQs to return (1-100)
    #[serde(default = "default_faq_limit")]
    pub limit: i64,
}

impl FaqQuery {
    pub fn validate(&self) -> Result<()> {
        check_range("limit", self.limit, 1, 100)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FaqList {
    pub faqs: Vec<FaqResponse>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CategoryResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub display_order: i32,
}

impl From<KnowledgeCategory> for CategoryResponse {
    fn from(category: KnowledgeCategory) -> Self {
        Self {
            id: category.id,
            name: category.name,
            slug: category.slug,
            description: category.description,
            display_order: category.display_order,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CategoryList {
    pub categories: Vec<CategoryResponse>,
}

fn default_recovery_limit() -> i64 {
    10
}

#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct RecoveryQuery {
    /// Maximum articles to return (1-50)
    #[serde(default = "default_recovery_limit")]
    pub limit: i64,
}

impl RecoveryQuery {
    pub fn validate(&self) -> Result<()> {
        check_range("limit", self.limit, 1, 50)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ArticleList {
    pub articles: Vec<ArticleResponse>,
    pub total: usize,
}
