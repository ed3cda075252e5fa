//! In-memory repository implementations.
//!
//! Used when no `database_url` is configured and by the HTTP tests. Each store keeps its rows
//! behind a `parking_lot::RwLock`; no lock is held across an await point.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde_json::json;
use uuid::Uuid;

use super::{
    errors::{DbError, Result},
    handlers::{
        ConversationRepository, KnowledgeRepository, PromptRepository, conversations::DEFAULT_CONVERSATION_TITLE,
    },
    models::{
        conversations::{
            Conversation, ConversationCreateDBRequest, ConversationId, ConversationStatus, ConversationUpdateDBRequest,
            Message, MessageCreateDBRequest, MessageId,
        },
        knowledge::{Article, ArticleId, Faq, FaqFilter, KnowledgeCategory},
        prompts::{
            Prompt, PromptCategoryCount, PromptCreateDBRequest, PromptId, PromptListFilter, PromptVersion,
            PromptVersionCreateDBRequest, PromptVersionId, PromptWithVersion,
        },
    },
};

/// Strictly increasing timestamps so ordering by time matches insertion order.
#[derive(Debug, Default)]
struct Clock {
    last: Option<DateTime<Utc>>,
}

impl Clock {
    fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let next = match self.last {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last = Some(next);
        next
    }
}

#[derive(Debug, Default)]
struct ConversationState {
    clock: Clock,
    conversations: HashMap<ConversationId, Conversation>,
    messages: Vec<Message>,
}

#[derive(Debug, Default)]
pub struct InMemoryConversations {
    state: RwLock<ConversationState>,
}

impl InMemoryConversations {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationRepository for InMemoryConversations {
    async fn create(&self, request: &ConversationCreateDBRequest) -> Result<Conversation> {
        let mut state = self.state.write();
        let now = state.clock.tick();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            user_id: request.user_id.clone(),
            title: request.title.clone().unwrap_or_else(|| DEFAULT_CONVERSATION_TITLE.to_string()),
            status: ConversationStatus::Active.as_str().to_string(),
            context: request.context.clone().unwrap_or_else(|| json!({})),
            created_at: now,
            updated_at: now,
        };
        state.conversations.insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn get(&self, id: ConversationId) -> Result<Option<Conversation>> {
        Ok(self.state.read().conversations.get(&id).cloned())
    }

    async fn list_for_user(&self, user_id: &str, limit: i64) -> Result<Vec<Conversation>> {
        let state = self.state.read();
        let mut conversations: Vec<Conversation> = state
            .conversations
            .values()
            .filter(|c| c.user_id.as_deref() == Some(user_id) && c.status == ConversationStatus::Active.as_str())
            .cloned()
            .collect();
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        conversations.truncate(limit.max(0) as usize);
        Ok(conversations)
    }

    async fn update(&self, id: ConversationId, request: &ConversationUpdateDBRequest) -> Result<bool> {
        let mut state = self.state.write();
        let now = state.clock.tick();
        let Some(conversation) = state.conversations.get_mut(&id) else {
            return Ok(false);
        };

        if let Some(title) = &request.title {
            conversation.title = title.clone();
        }
        if let Some(status) = request.status {
            conversation.status = status.as_str().to_string();
        }
        if let Some(context) = &request.context {
            conversation.context = context.clone();
        }
        conversation.updated_at = now;
        Ok(true)
    }

    async fn add_message(&self, request: &MessageCreateDBRequest) -> Result<Message> {
        let mut state = self.state.write();
        let now = state.clock.tick();
        let Some(conversation) = state.conversations.get_mut(&request.conversation_id) else {
            return Err(DbError::ForeignKeyViolation {
                constraint: Some("ai_messages_conversation_id_fkey".to_string()),
                table: Some("ai_messages".to_string()),
                message: format!("conversation {} does not exist", request.conversation_id),
            });
        };
        conversation.updated_at = now;

        let message = Message {
            id: Uuid::new_v4(),
            conversation_id: request.conversation_id,
            role: request.role.as_str().to_string(),
            content: request.content.clone(),
            metadata: request.metadata.clone().unwrap_or_else(|| json!({})),
            resources: request.resources.clone().unwrap_or_else(|| json!([])),
            follow_up_suggestions: request.follow_up_suggestions.clone(),
            timestamp: now,
        };
        state.messages.push(message.clone());
        Ok(message)
    }

    async fn messages(&self, id: ConversationId, limit: i64, before_id: Option<MessageId>) -> Result<Vec<Message>> {
        let state = self.state.read();
        let before = before_id.and_then(|before_id| state.messages.iter().find(|m| m.id == before_id).map(|m| m.timestamp));

        Ok(state
            .messages
            .iter()
            .filter(|m| m.conversation_id == id)
            .filter(|m| before.is_none_or(|before| m.timestamp < before))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn recent_messages(&self, id: ConversationId, limit: i64) -> Result<Vec<Message>> {
        let state = self.state.read();
        let mut recent: Vec<Message> = state
            .messages
            .iter()
            .rev()
            .filter(|m| m.conversation_id == id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
        recent.reverse();
        Ok(recent)
    }

    async fn message_count(&self, id: ConversationId) -> Result<i64> {
        Ok(self.state.read().messages.iter().filter(|m| m.conversation_id == id).count() as i64)
    }
}

#[derive(Debug, Default)]
struct PromptState {
    clock: Clock,
    prompts: HashMap<PromptId, Prompt>,
    versions: Vec<PromptVersion>,
}

impl PromptState {
    fn with_version(&self, prompt: &Prompt) -> PromptWithVersion {
        PromptWithVersion {
            prompt: prompt.clone(),
            current_version: prompt
                .current_version_id
                .and_then(|id| self.versions.iter().find(|v| v.id == id).cloned()),
        }
    }

    fn next_version_number(&self, prompt_id: PromptId) -> i32 {
        self.versions
            .iter()
            .filter(|v| v.prompt_id == prompt_id)
            .map(|v| v.version_number)
            .max()
            .unwrap_or(0)
            + 1
    }
}

#[derive(Debug, Default)]
pub struct InMemoryPrompts {
    state: RwLock<PromptState>,
}

impl InMemoryPrompts {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PromptRepository for InMemoryPrompts {
    async fn get_by_category_name(&self, category: &str, name: &str) -> Result<Option<PromptWithVersion>> {
        let state = self.state.read();
        Ok(state
            .prompts
            .values()
            .find(|p| p.category == category && p.name == name && !p.is_archived)
            .map(|p| state.with_version(p)))
    }

    async fn get_by_id(&self, id: PromptId) -> Result<Option<PromptWithVersion>> {
        let state = self.state.read();
        Ok(state.prompts.get(&id).map(|p| state.with_version(p)))
    }

    async fn list(&self, filter: &PromptListFilter) -> Result<(Vec<PromptWithVersion>, i64)> {
        let state = self.state.read();
        let mut matching: Vec<&Prompt> = state
            .prompts
            .values()
            .filter(|p| filter.category.as_ref().is_none_or(|c| &p.category == c))
            .filter(|p| filter.include_archived || !p.is_archived)
            .collect();
        matching.sort_by(|a, b| (&a.category, &a.name).cmp(&(&b.category, &b.name)));

        let total = matching.len() as i64;
        let offset = (filter.page.max(1) - 1).saturating_mul(filter.limit).max(0) as usize;
        let page = matching
            .into_iter()
            .skip(offset)
            .take(filter.limit.max(0) as usize)
            .map(|p| state.with_version(p))
            .collect();
        Ok((page, total))
    }

    async fn versions(&self, prompt_id: PromptId) -> Result<Vec<PromptVersion>> {
        let state = self.state.read();
        let mut versions: Vec<PromptVersion> = state.versions.iter().filter(|v| v.prompt_id == prompt_id).cloned().collect();
        versions.sort_by(|a, b| b.version_number.cmp(&a.version_number));
        Ok(versions)
    }

    async fn create_version(&self, request: &PromptVersionCreateDBRequest) -> Result<PromptVersion> {
        let mut state = self.state.write();
        if !state.prompts.contains_key(&request.prompt_id) {
            return Err(DbError::NotFound);
        }

        let now = state.clock.tick();
        let version = PromptVersion {
            id: Uuid::new_v4(),
            prompt_id: request.prompt_id,
            version_number: state.next_version_number(request.prompt_id),
            content: request.content.clone(),
            variables_schema: request.variables_schema.clone(),
            commit_message: request.commit_message.clone(),
            created_by: request.created_by.clone(),
            created_at: now,
        };
        state.versions.push(version.clone());

        if let Some(prompt) = state.prompts.get_mut(&request.prompt_id) {
            prompt.current_version_id = Some(version.id);
            prompt.updated_at = now;
        }
        Ok(version)
    }

    async fn rollback(&self, prompt_id: PromptId, version_id: PromptVersionId) -> Result<bool> {
        let mut state = self.state.write();
        if !state.versions.iter().any(|v| v.id == version_id && v.prompt_id == prompt_id) {
            return Ok(false);
        }

        let now = state.clock.tick();
        let Some(prompt) = state.prompts.get_mut(&prompt_id) else {
            return Ok(false);
        };
        prompt.current_version_id = Some(version_id);
        prompt.updated_at = now;
        Ok(true)
    }

    async fn categories(&self) -> Result<Vec<PromptCategoryCount>> {
        let state = self.state.read();
        let mut counts: HashMap<&str, i64> = HashMap::new();
        for prompt in state.prompts.values().filter(|p| !p.is_archived) {
            *counts.entry(prompt.category.as_str()).or_default() += 1;
        }

        let mut categories: Vec<PromptCategoryCount> = counts
            .into_iter()
            .map(|(category, prompt_count)| PromptCategoryCount {
                category: category.to_string(),
                prompt_count,
            })
            .collect();
        categories.sort_by(|a, b| a.category.cmp(&b.category));
        Ok(categories)
    }

    async fn create(&self, request: &PromptCreateDBRequest) -> Result<PromptWithVersion> {
        let mut state = self.state.write();
        if state
            .prompts
            .values()
            .any(|p| p.category == request.category && p.name == request.name)
        {
            return Err(DbError::UniqueViolation {
                constraint: Some("admin_prompts_category_name_key".to_string()),
                table: Some("admin_prompts".to_string()),
                message: format!("prompt {}/{} already exists", request.category, request.name),
            });
        }

        let now = state.clock.tick();
        let prompt_id = Uuid::new_v4();
        let version = PromptVersion {
            id: Uuid::new_v4(),
            prompt_id,
            version_number: 1,
            content: request.content.clone(),
            variables_schema: request.variables_schema.clone(),
            commit_message: Some("Initial version".to_string()),
            created_by: request.created_by.clone(),
            created_at: now,
        };
        let prompt = Prompt {
            id: prompt_id,
            category: request.category.clone(),
            name: request.name.clone(),
            description: request.description.clone(),
            current_version_id: Some(version.id),
            is_archived: false,
            created_at: now,
            updated_at: now,
        };

        state.versions.push(version.clone());
        state.prompts.insert(prompt_id, prompt.clone());
        Ok(PromptWithVersion {
            prompt,
            current_version: Some(version),
        })
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct KnowledgeState {
    categories: Vec<KnowledgeCategory>,
    articles: Vec<Article>,
    faqs: Vec<Faq>,
}

/// Knowledge store seeded up front; only view counts change afterwards.
#[derive(Debug, Default)]
pub struct InMemoryKnowledge {
    state: RwLock<KnowledgeState>,
}

impl InMemoryKnowledge {
    pub fn new(categories: Vec<KnowledgeCategory>, articles: Vec<Article>, faqs: Vec<Faq>) -> Self {
        Self {
            state: RwLock::new(KnowledgeState {
                categories,
                articles,
                faqs,
            }),
        }
    }
}

#[async_trait]
impl KnowledgeRepository for InMemoryKnowledge {
    async fn articles(&self) -> Result<Vec<Article>> {
        let mut articles = self.state.read().articles.clone();
        articles.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(articles)
    }

    async fn article(&self, id: ArticleId) -> Result<Option<Article>> {
        Ok(self.state.read().articles.iter().find(|a| a.id == id).cloned())
    }

    async fn article_by_slug(&self, slug: &str) -> Result<Option<Article>> {
        Ok(self.state.read().articles.iter().find(|a| a.slug == slug).cloned())
    }

    async fn increment_view_count(&self, id: ArticleId) -> Result<()> {
        if let Some(article) = self.state.write().articles.iter_mut().find(|a| a.id == id) {
            article.view_count += 1;
        }
        Ok(())
    }

    async fn faqs(&self, filter: &FaqFilter) -> Result<Vec<Faq>> {
        let mut faqs: Vec<Faq> = self
            .state
            .read()
            .faqs
            .iter()
            .filter(|f| filter.category_id.is_none_or(|c| f.category_id == Some(c)))
            .filter(|f| !filter.featured_only || f.is_featured)
            .cloned()
            .collect();
        faqs.sort_by_key(|f| f.display_order);
        faqs.truncate(filter.limit.max(0) as usize);
        Ok(faqs)
    }

    async fn all_faqs(&self) -> Result<Vec<Faq>> {
        let mut faqs = self.state.read().faqs.clone();
        faqs.sort_by_key(|f| f.display_order);
        Ok(faqs)
    }

    async fn categories(&self) -> Result<Vec<KnowledgeCategory>> {
        let mut categories = self.state.read().categories.clone();
        categories.sort_by(|a, b| (a.display_order, &a.name).cmp(&(b.display_order, &b.name)));
        Ok(categories)
    }
}
