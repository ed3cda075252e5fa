//! Database models for conversations and messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub type ConversationId = Uuid;
pub type MessageId = Uuid;

/// Lifecycle state of a conversation. Archived conversations are hidden from listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Archived,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Active => "active",
            ConversationStatus::Archived => "archived",
        }
    }
}

/// Author of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Conversation {
    pub id: ConversationId,
    pub user_id: Option<String>,
    pub title: String,
    pub status: String,
    pub context: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ConversationCreateDBRequest {
    pub user_id: Option<String>,
    pub title: Option<String>,
    pub context: Option<serde_json::Value>,
}

/// Fields left as `None` are not changed. `updated_at` is always bumped.
#[derive(Debug, Clone, Default)]
pub struct ConversationUpdateDBRequest {
    pub title: Option<String>,
    pub status: Option<ConversationStatus>,
    pub context: Option<serde_json::Value>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub role: String,
    pub content: String,
    pub metadata: serde_json::Value,
    pub resources: serde_json::Value,
    pub follow_up_suggestions: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MessageCreateDBRequest {
    pub conversation_id: ConversationId,
    pub role: MessageRole,
    pub content: String,
    pub metadata: Option<serde_json::Value>,
    pub resources: Option<serde_json::Value>,
    pub follow_up_suggestions: Vec<String>,
}

impl MessageCreateDBRequest {
    pub fn new(conversation_id: ConversationId, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            conversation_id,
            role,
            content: content.into(),
            metadata: None,
            resources: None,
            follow_up_suggestions: Vec::new(),
        }
    }
}
