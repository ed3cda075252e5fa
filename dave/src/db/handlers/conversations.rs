//! Repository for conversations and their messages.

use async_trait::async_trait;
use serde_json::json;
use sqlx::PgPool;
use tracing::instrument;

use crate::db::{
    errors::Result,
    models::conversations::{
        Conversation, ConversationCreateDBRequest, ConversationId, ConversationStatus, ConversationUpdateDBRequest,
        Message, MessageCreateDBRequest, MessageId,
    },
};

pub const DEFAULT_CONVERSATION_TITLE: &str = "New Conversation";

const CONVERSATION_COLUMNS: &str = "id, user_id, title, status, context, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, conversation_id, role, content, metadata, resources, follow_up_suggestions, timestamp";

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Create an active conversation. Title defaults to "New Conversation" and context to `{}`.
    async fn create(&self, request: &ConversationCreateDBRequest) -> Result<Conversation>;

    async fn get(&self, id: ConversationId) -> Result<Option<Conversation>>;

    /// Active conversations for a user, most recently updated first.
    async fn list_for_user(&self, user_id: &str, limit: i64) -> Result<Vec<Conversation>>;

    /// Returns false when the conversation does not exist.
    async fn update(&self, id: ConversationId, request: &ConversationUpdateDBRequest) -> Result<bool>;

    async fn archive(&self, id: ConversationId) -> Result<bool> {
        self.update(
            id,
            &ConversationUpdateDBRequest {
                status: Some(ConversationStatus::Archived),
                ..Default::default()
            },
        )
        .await
    }

    /// Store a message and bump the conversation's `updated_at`.
    async fn add_message(&self, request: &MessageCreateDBRequest) -> Result<Message>;

    /// Messages in chronological order. With `before_id`, only messages older than that one.
    async fn messages(&self, id: ConversationId, limit: i64, before_id: Option<MessageId>) -> Result<Vec<Message>>;

    /// The last `limit` messages, in chronological order.
    async fn recent_messages(&self, id: ConversationId, limit: i64) -> Result<Vec<Message>>;

    async fn message_count(&self, id: ConversationId) -> Result<i64>;
}

pub struct PgConversations {
    pool: PgPool,
}

impl PgConversations {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationRepository for PgConversations {
    #[instrument(skip(self, request), fields(user_id = ?request.user_id), err)]
    async fn create(&self, request: &ConversationCreateDBRequest) -> Result<Conversation> {
        let conversation = sqlx::query_as::<_, Conversation>(&format!(
            "INSERT INTO ai_conversations (user_id, title, status, context) VALUES ($1, $2, $3, $4) RETURNING {CONVERSATION_COLUMNS}"
        ))
        .bind(&request.user_id)
        .bind(request.title.as_deref().unwrap_or(DEFAULT_CONVERSATION_TITLE))
        .bind(ConversationStatus::Active.as_str())
        .bind(request.context.clone().unwrap_or_else(|| json!({})))
        .fetch_one(&self.pool)
        .await?;

        Ok(conversation)
    }

    #[instrument(skip(self), err)]
    async fn get(&self, id: ConversationId) -> Result<Option<Conversation>> {
        let conversation =
            sqlx::query_as::<_, Conversation>(&format!("SELECT {CONVERSATION_COLUMNS} FROM ai_conversations WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(conversation)
    }

    #[instrument(skip(self), err)]
    async fn list_for_user(&self, user_id: &str, limit: i64) -> Result<Vec<Conversation>> {
        let conversations = sqlx::query_as::<_, Conversation>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM ai_conversations
             WHERE user_id = $1 AND status = $2
             ORDER BY updated_at DESC
             LIMIT $3"
        ))
        .bind(user_id)
        .bind(ConversationStatus::Active.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(conversations)
    }

    #[instrument(skip(self, request), err)]
    async fn update(&self, id: ConversationId, request: &ConversationUpdateDBRequest) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE ai_conversations SET
                title = COALESCE($2, title),
                status = COALESCE($3, status),
                context = COALESCE($4, context),
                updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(&request.title)
        .bind(request.status.map(|s| s.as_str()))
        .bind(&request.context)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(conversation_id = %request.conversation_id, role = request.role.as_str()), err)]
    async fn add_message(&self, request: &MessageCreateDBRequest) -> Result<Message> {
        let mut tx = self.pool.begin().await?;

        let message = sqlx::query_as::<_, Message>(&format!(
            "INSERT INTO ai_messages (conversation_id, role, content, metadata, resources, follow_up_suggestions)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(request.conversation_id)
        .bind(request.role.as_str())
        .bind(&request.content)
        .bind(request.metadata.clone().unwrap_or_else(|| json!({})))
        .bind(request.resources.clone().unwrap_or_else(|| json!([])))
        .bind(&request.follow_up_suggestions)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE ai_conversations SET updated_at = NOW() WHERE id = $1")
            .bind(request.conversation_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(message)
    }

    #[instrument(skip(self), err)]
    async fn messages(&self, id: ConversationId, limit: i64, before_id: Option<MessageId>) -> Result<Vec<Message>> {
        // An unknown before_id does not filter anything
        let messages = sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM ai_messages
             WHERE conversation_id = $1
               AND (
                 $3::uuid IS NULL
                 OR NOT EXISTS (SELECT 1 FROM ai_messages WHERE id = $3)
                 OR timestamp < (SELECT timestamp FROM ai_messages WHERE id = $3)
               )
             ORDER BY timestamp ASC
             LIMIT $2"
        ))
        .bind(id)
        .bind(limit)
        .bind(before_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    #[instrument(skip(self), err)]
    async fn recent_messages(&self, id: ConversationId, limit: i64) -> Result<Vec<Message>> {
        let messages = sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM (
                SELECT {MESSAGE_COLUMNS} FROM ai_messages
                WHERE conversation_id = $1
                ORDER BY timestamp DESC
                LIMIT $2
             ) recent
             ORDER BY timestamp ASC"
        ))
        .bind(id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    #[instrument(skip(self), err)]
    async fn message_count(&self, id: ConversationId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ai_messages WHERE conversation_id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}
