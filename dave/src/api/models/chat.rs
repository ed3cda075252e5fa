//! API models for chat endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::check_length;
use crate::{
    db::models::conversations::{Conversation, Message},
    errors::Result,
    services::knowledge::ResultKind,
};

/// Audience a conversation is tuned for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    JobSeeker,
    Employer,
    TreatmentCenter,
    #[default]
    Anonymous,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::JobSeeker => "job_seeker",
            UserType::Employer => "employer",
            UserType::TreatmentCenter => "treatment_center",
            UserType::Anonymous => "anonymous",
        }
    }
}

fn default_tone() -> Option<String> {
    Some("supportive".to_string())
}

/// Personalisation context sent with a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserContext {
    /// Ignored on input; always replaced by the authenticated user
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_type: UserType,
    /// early, intermediate, advanced or long-term
    #[serde(default)]
    pub recovery_stage: Option<String>,
    /// supportive, professional or casual
    #[serde(default = "default_tone")]
    pub preferred_tone: Option<String>,
    #[serde(default)]
    pub session_metadata: Option<serde_json::Value>,
}

impl Default for UserContext {
    fn default() -> Self {
        Self {
            user_id: None,
            user_type: UserType::default(),
            recovery_stage: None,
            preferred_tone: default_tone(),
            session_metadata: None,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ChatMessageRequest {
    /// The user's message (1-10000 characters)
    pub message: String,
    /// Existing conversation id; a new conversation is started when absent or unknown
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub context: Option<UserContext>,
    /// Include knowledge base resources in the response
    #[serde(default = "default_true")]
    pub include_resources: bool,
}

impl ChatMessageRequest {
    pub fn validate(&self) -> Result<()> {
        check_length("message", &self.message, 1, 10_000)
    }
}

/// Knowledge base resource attached to a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Resource {
    #[schema(value_type = String, format = "uuid")]
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: ResultKind,
    pub title: String,
    pub url: Option<String>,
    pub excerpt: Option<String>,
    pub relevance_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatMessageResponse {
    pub conversation_id: String,
    pub message_id: String,
    pub response: String,
    pub resources: Vec<Resource>,
    pub follow_up_suggestions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

fn default_job_seeker() -> UserType {
    UserType::JobSeeker
}

#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct StreamQuery {
    /// The user's message (1-10000 characters)
    pub message: String,
    pub conversation_id: Option<String>,
    #[serde(default = "default_job_seeker")]
    #[param(inline)]
    pub user_type: UserType,
}

impl StreamQuery {
    pub fn validate(&self) -> Result<()> {
        check_length("message", &self.message, 1, 10_000)
    }
}

#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct StartConversationQuery {
    #[serde(default = "default_job_seeker")]
    #[param(inline)]
    pub user_type: UserType,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StartConversationResponse {
    #[schema(value_type = String, format = "uuid")]
    pub conversation_id: Uuid,
    pub message: String,
    pub suggestions: Vec<String>,
}

fn default_conversation_limit() -> i64 {
    50
}

#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct ListConversationsQuery {
    /// Maximum conversations to return (1-100)
    #[serde(default = "default_conversation_limit")]
    pub limit: i64,
}

impl ListConversationsQuery {
    pub fn validate(&self) -> Result<()> {
        super::check_range("limit", self.limit, 1, 100)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConversationSummary {
    #[schema(value_type = String, format = "uuid")]
    pub id: Uuid,
    pub title: Option<String>,
    pub message_count: i64,
    pub last_message_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConversationList {
    pub conversations: Vec<ConversationSummary>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConversationMessage {
    #[schema(value_type = String, format = "uuid")]
    pub id: Uuid,
    /// user, assistant or system
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

impl From<Message> for ConversationMessage {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            role: message.role,
            content: message.content,
            timestamp: message.timestamp,
            metadata: Some(message.metadata),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConversationDetail {
    #[schema(value_type = String, format = "uuid")]
    pub id: Uuid,
    pub title: Option<String>,
    pub status: String,
    pub messages: Vec<ConversationMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationDetail {
    pub fn new(conversation: Conversation, messages: Vec<Message>) -> Self {
        Self {
            id: conversation.id,
            title: Some(conversation.title),
            status: conversation.status,
            messages: messages.into_iter().map(Into::into).collect(),
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ArchiveResponse {
    pub status: String,
    #[schema(value_type = String, format = "uuid")]
    pub conversation_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_defaults() {
        let request: ChatMessageRequest = serde_json::from_value(json!({ "message": "hi" })).unwrap();
        assert!(request.include_resources);
        assert!(request.context.is_none());

        let context: UserContext = serde_json::from_value(json!({})).unwrap();
        assert_eq!(context.user_type, UserType::Anonymous);
        assert_eq!(context.preferred_tone.as_deref(), Some("supportive"));
    }

    #[test]
    fn test_message_length_validation() {
        let request = |message: String| ChatMessageRequest {
            message,
            conversation_id: None,
            context: None,
            include_resources: true,
        };
        assert!(request(String::new()).validate().is_err());
        assert!(request("a".repeat(10_000)).validate().is_ok());
        assert!(request("a".repeat(10_001)).validate().is_err());
    }

    #[test]
    fn test_unknown_user_type_is_rejected() {
        let result: serde_json::Result<UserContext> = serde_json::from_value(json!({ "user_type": "pirate" }));
        assert!(result.is_err());
    }
}
