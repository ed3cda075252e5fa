//! Test utilities: a scripted language model, knowledge fixtures and an in-memory test app.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum_test::TestServer;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::{
    Application, Storage,
    config::{AuthConfig, Config},
    db::models::knowledge::{Article, Faq},
    gemini::{ChatTurn, CircuitStatus, EmbeddingTask, LanguageModel, LlmError, TextStream},
};

pub const TEST_API_KEY: &str = "test-dave-key";
pub const TEST_ADMIN_KEY: &str = "test-admin-key";
pub const TEST_JWT_SECRET: &str = "test-jwt-secret-for-testing-only";

const DEFAULT_REPLY: &str = "Happy to help with your job search.";

/// reqwest is built without a default crypto provider.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// One generation call seen by [`ScriptedModel`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub prompt: String,
    pub system_instruction: Option<String>,
    pub history: Vec<ChatTurn>,
}

/// Language model double with canned replies, stream chunks and embeddings.
#[derive(Debug)]
pub struct ScriptedModel {
    configured: bool,
    reply: String,
    stream: Option<Vec<String>>,
    stream_error: bool,
    embeddings: HashMap<String, Vec<f32>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl Default for ScriptedModel {
    fn default() -> Self {
        Self {
            configured: true,
            reply: DEFAULT_REPLY.to_string(),
            stream: None,
            stream_error: false,
            embeddings: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedModel {
    /// A model without credentials; every call fails.
    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::default()
        }
    }

    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = reply.into();
        self
    }

    /// Stream these chunks instead of the reply as a single chunk.
    pub fn with_stream<I, S>(mut self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stream = Some(chunks.into_iter().map(Into::into).collect());
        self
    }

    /// End the stream with an error after its chunks.
    pub fn with_stream_error(mut self) -> Self {
        self.stream_error = true;
        self
    }

    /// Embedding returned for `text` (matched after trimming). Other texts fail to embed.
    pub fn with_embedding(mut self, text: &str, embedding: Vec<f32>) -> Self {
        self.embeddings.insert(text.trim().to_string(), embedding);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    fn record(&self, prompt: &str, system_instruction: Option<&str>, history: &[ChatTurn]) -> Result<(), LlmError> {
        if !self.configured {
            return Err(LlmError::NotConfigured);
        }
        self.calls.lock().push(RecordedCall {
            prompt: prompt.to_string(),
            system_instruction: system_instruction.map(str::to_string),
            history: history.to_vec(),
        });
        Ok(())
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn generate(&self, prompt: &str, system_instruction: Option<&str>, history: &[ChatTurn]) -> Result<String, LlmError> {
        self.record(prompt, system_instruction, history)?;
        Ok(self.reply.clone())
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        system_instruction: Option<&str>,
        history: &[ChatTurn],
    ) -> Result<TextStream, LlmError> {
        self.record(prompt, system_instruction, history)?;
        let chunks = self.stream.clone().unwrap_or_else(|| vec![self.reply.clone()]);
        let mut items: Vec<Result<String, LlmError>> = chunks.into_iter().map(Ok).collect();
        if self.stream_error {
            items.push(Err(LlmError::InvalidResponse("stream interrupted".to_string())));
        }
        Ok(Box::pin(futures::stream::iter(items)))
    }

    async fn embed(&self, text: &str, _task: EmbeddingTask) -> Result<Vec<f32>, LlmError> {
        if !self.configured {
            return Err(LlmError::NotConfigured);
        }
        self.embeddings
            .get(text.trim())
            .cloned()
            .ok_or_else(|| LlmError::InvalidResponse(format!("no embedding scripted for {text:?}")))
    }

    fn circuit_status(&self) -> CircuitStatus {
        CircuitStatus {
            open: false,
            failures: 0,
            time_until_retry: 0.0,
        }
    }
}

fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// A published general article.
pub fn article(title: &str, content: &str) -> Article {
    let now = Utc::now();
    Article {
        id: Uuid::new_v4(),
        title: title.to_string(),
        slug: slugify(title),
        excerpt: None,
        content: content.to_string(),
        content_html: None,
        category_id: None,
        category_name: None,
        content_type: "article".to_string(),
        difficulty_level: None,
        reading_time: None,
        tags: Vec::new(),
        is_recovery_focused: false,
        is_featured: false,
        view_count: 0,
        helpful_count: 0,
        created_at: now,
        updated_at: now,
    }
}

pub fn faq(question: &str, answer: &str) -> Faq {
    Faq {
        id: Uuid::new_v4(),
        question: question.to_string(),
        answer: answer.to_string(),
        category_id: None,
        category_name: None,
        display_order: 0,
        is_featured: false,
        is_expert_answer: false,
        related_article_ids: Vec::new(),
    }
}

pub fn create_test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        environment: "test".to_string(),
        auth: AuthConfig {
            dave_api_key: Some(TEST_API_KEY.to_string()),
            admin_api_key: Some(TEST_ADMIN_KEY.to_string()),
            jwt_secret: Some(TEST_JWT_SECRET.to_string()),
        },
        ..Config::default()
    }
}

/// Bearer header value for a signed-in user.
pub fn user_bearer(user_id: &str) -> String {
    let token = crate::auth::jwt::issue_token(user_id, TEST_JWT_SECRET, Duration::from_secs(3600))
        .expect("Failed to sign test token");
    format!("Bearer {token}")
}

/// App over in-memory storage with no knowledge content.
pub fn create_test_app(llm: ScriptedModel) -> TestServer {
    create_test_app_with(create_test_config(), Storage::in_memory(), llm)
}

pub fn create_test_app_with(config: Config, storage: Storage, llm: ScriptedModel) -> TestServer {
    Application::from_parts(config, storage, Arc::new(llm))
        .expect("Failed to build test application")
        .into_test_server()
}
