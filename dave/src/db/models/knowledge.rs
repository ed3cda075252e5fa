//! Database models for the knowledge base.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

pub type CategoryId = Uuid;
pub type ArticleId = Uuid;
pub type FaqId = Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct KnowledgeCategory {
    pub id: CategoryId,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub display_order: i32,
}

/// An article row joined with its category name.
#[derive(Debug, Clone, FromRow)]
pub struct Article {
    pub id: ArticleId,
    pub title: String,
    pub slug: String,
    pub excerpt: Option<String>,
    pub content: String,
    pub content_html: Option<String>,
    pub category_id: Option<CategoryId>,
    pub category_name: Option<String>,
    pub content_type: String,
    pub difficulty_level: Option<String>,
    pub reading_time: Option<i32>,
    pub tags: Vec<String>,
    pub is_recovery_focused: bool,
    pub is_featured: bool,
    pub view_count: i32,
    pub helpful_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Faq {
    pub id: FaqId,
    pub question: String,
    pub answer: String,
    pub category_id: Option<CategoryId>,
    pub category_name: Option<String>,
    pub display_order: i32,
    pub is_featured: bool,
    pub is_expert_answer: bool,
    pub related_article_ids: Vec<ArticleId>,
}

#[derive(Debug, Clone, Default)]
pub struct FaqFilter {
    pub category_id: Option<CategoryId>,
    pub featured_only: bool,
    pub limit: i64,
}
