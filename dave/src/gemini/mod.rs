//! Language model access.
//!
//! [`LanguageModel`] is the seam the chat, knowledge and nudge services talk to. The production
//! implementation is [`client::GeminiClient`], which calls the Gemini REST API with `reqwest`
//! and guards generation calls with a [`circuit_breaker::CircuitBreaker`].

pub mod circuit_breaker;
pub mod client;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

pub use client::GeminiClient;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Gemini API circuit breaker is open. Service temporarily unavailable.")]
    CircuitOpen,

    #[error("Gemini API key is not configured")]
    NotConfigured,

    #[error("Gemini API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Gemini request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Unexpected Gemini response: {0}")]
    InvalidResponse(String),
}

impl From<LlmError> for crate::errors::Error {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::CircuitOpen | LlmError::NotConfigured => crate::errors::Error::ServiceUnavailable {
                message: err.to_string(),
            },
            other => crate::errors::Error::Other(anyhow::Error::from(other)),
        }
    }
}

/// Speaker of a conversation turn, as the model API names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// A prior turn passed as conversation history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: Role,
    pub text: String,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
        }
    }
}

/// What an embedding will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmbeddingTask {
    RetrievalDocument,
    RetrievalQuery,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CircuitStatus {
    pub open: bool,
    pub failures: u32,
    /// Seconds until a trial call is allowed; 0 when closed
    pub time_until_retry: f64,
}

/// Stream of generated text chunks.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Whether credentials are present. Unconfigured models fail every call.
    fn is_configured(&self) -> bool;

    /// Generate a complete response.
    async fn generate(&self, prompt: &str, system_instruction: Option<&str>, history: &[ChatTurn]) -> Result<String, LlmError>;

    /// Generate a response as a stream of text chunks.
    async fn generate_stream(
        &self,
        prompt: &str,
        system_instruction: Option<&str>,
        history: &[ChatTurn],
    ) -> Result<TextStream, LlmError>;

    /// Embed text for semantic search.
    async fn embed(&self, text: &str, task: EmbeddingTask) -> Result<Vec<f32>, LlmError>;

    fn circuit_status(&self) -> CircuitStatus;
}
