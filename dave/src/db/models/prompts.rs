//! Database models for admin prompts and their versions.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

pub type PromptId = Uuid;
pub type PromptVersionId = Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct Prompt {
    pub id: PromptId,
    pub category: String,
    pub name: String,
    pub description: Option<String>,
    pub current_version_id: Option<PromptVersionId>,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable snapshot of a prompt's content. Version numbers start at 1 per prompt.
#[derive(Debug, Clone, FromRow)]
pub struct PromptVersion {
    pub id: PromptVersionId,
    pub prompt_id: PromptId,
    pub version_number: i32,
    pub content: String,
    pub variables_schema: Option<serde_json::Value>,
    pub commit_message: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// A prompt together with the version it currently points at.
#[derive(Debug, Clone)]
pub struct PromptWithVersion {
    pub prompt: Prompt,
    pub current_version: Option<PromptVersion>,
}

#[derive(Debug, Clone)]
pub struct PromptCreateDBRequest {
    pub category: String,
    pub name: String,
    pub description: Option<String>,
    pub content: String,
    pub variables_schema: Option<serde_json::Value>,
    pub created_by: String,
}

#[derive(Debug, Clone)]
pub struct PromptVersionCreateDBRequest {
    pub prompt_id: PromptId,
    pub content: String,
    pub commit_message: Option<String>,
    pub variables_schema: Option<serde_json::Value>,
    pub created_by: String,
}

#[derive(Debug, Clone, Default)]
pub struct PromptListFilter {
    pub category: Option<String>,
    pub include_archived: bool,
    pub page: i64,
    pub limit: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct PromptCategoryCount {
    pub category: String,
    pub prompt_count: i64,
}
