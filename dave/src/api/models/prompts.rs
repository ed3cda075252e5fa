//! API models for admin prompt management.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::{check_length, check_range};
use crate::{
    db::models::prompts::{PromptCategoryCount, PromptVersion, PromptWithVersion},
    errors::Result,
};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PromptVersionResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: Uuid,
    pub version_number: i32,
    pub content: String,
    pub variables_schema: Option<Value>,
    pub commit_message: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl From<PromptVersion> for PromptVersionResponse {
    fn from(version: PromptVersion) -> Self {
        Self {
            id: version.id,
            version_number: version.version_number,
            content: version.content,
            variables_schema: version.variables_schema,
            commit_message: version.commit_message,
            created_by: version.created_by,
            created_at: version.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PromptResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: Uuid,
    pub category: String,
    pub name: String,
    pub description: Option<String>,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub current_version_id: Option<Uuid>,
    pub current_version: Option<PromptVersionResponse>,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Full history, newest first; only present when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub versions: Option<Vec<PromptVersionResponse>>,
}

impl From<PromptWithVersion> for PromptResponse {
    fn from(value: PromptWithVersion) -> Self {
        let prompt = value.prompt;
        Self {
            id: prompt.id,
            category: prompt.category,
            name: prompt.name,
            description: prompt.description,
            current_version_id: prompt.current_version_id,
            current_version: value.current_version.map(Into::into),
            is_archived: prompt.is_archived,
            created_at: prompt.created_at,
            updated_at: prompt.updated_at,
            versions: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PromptList {
    pub items: Vec<PromptResponse>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub has_more: bool,
}

fn default_page() -> i64 {
    1
}

fn default_prompt_limit() -> i64 {
    50
}

/// Highest page a prompt listing accepts.
pub const MAX_PAGE: i64 = 10_000;

#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct ListPromptsQuery {
    pub category: Option<String>,
    /// Page number, starting at 1 (at most 10000)
    #[serde(default = "default_page")]
    pub page: i64,
    /// Page size (1-100)
    #[serde(default = "default_prompt_limit")]
    pub limit: i64,
    #[serde(default)]
    pub include_archived: bool,
}

impl ListPromptsQuery {
    pub fn validate(&self) -> Result<()> {
        check_range("page", self.page, 1, MAX_PAGE)?;
        check_range("limit", self.limit, 1, 100)
    }
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct GetPromptQuery {
    #[serde(default)]
    pub include_versions: bool,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PromptCreate {
    /// Category (1-100 characters)
    pub category: String,
    /// Name, unique within the category (1-100 characters)
    pub name: String,
    pub description: Option<String>,
    pub content: String,
    pub variables_schema: Option<Value>,
}

impl PromptCreate {
    pub fn validate(&self) -> Result<()> {
        check_length("category", &self.category, 1, 100)?;
        check_length("name", &self.name, 1, 100)?;
        if let Some(description) = &self.description {
            check_length("description", description, 0, 500)?;
        }
        check_length("content", &self.content, 1, usize::MAX)
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PromptUpdate {
    pub content: String,
    /// Description of the change (1-500 characters)
    pub commit_message: String,
    pub variables_schema: Option<Value>,
}

impl PromptUpdate {
    pub fn validate(&self) -> Result<()> {
        check_length("content", &self.content, 1, usize::MAX)?;
        check_length("commit_message", &self.commit_message, 1, 500)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PromptUpdated {
    pub status: String,
    #[schema(value_type = String, format = "uuid")]
    pub prompt_id: Uuid,
    pub version: PromptVersionResponse,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PromptRollback {
    #[schema(value_type = String, format = "uuid")]
    pub version_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PromptRolledBack {
    pub status: String,
    #[schema(value_type = String, format = "uuid")]
    pub prompt_id: Uuid,
    #[schema(value_type = String, format = "uuid")]
    pub version_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CategoryInfo {
    pub category: String,
    pub prompt_count: i64,
    pub description: Option<String>,
}

impl From<PromptCategoryCount> for CategoryInfo {
    fn from(count: PromptCategoryCount) -> Self {
        Self {
            category: count.category,
            prompt_count: count.prompt_count,
            description: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PromptCategoryList {
    pub categories: Vec<CategoryInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CategoryPrompts {
    pub category: String,
    pub prompts: Vec<PromptResponse>,
    pub total: usize,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct ClearCacheQuery {
    pub category: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CacheCleared {
    pub status: String,
    pub category: Option<String>,
    pub name: Option<String>,
}
