//! Prompt lookup with a TTL cache, and assembly of Dave's system prompt.
//!
//! Prompts are stored in the admin prompt repository as `category/name`. Every lookup goes
//! through a `moka` cache keyed `category:name`; editing a prompt through the admin API clears
//! the affected keys.

use std::{sync::Arc, time::Duration};

use moka::future::Cache;
use tracing::{debug, instrument, warn};

use crate::db::{errors::Result, handlers::PromptRepository};

pub const DAVE_SYSTEM_CATEGORY: &str = "dave_system";
pub const RECOVERY_LANGUAGE_CATEGORY: &str = "recovery_language";

const FALLBACK_PERSONALITY: &str = r#"# Dave - Employa AI Career Coach

You are Dave, Employa's AI career coach. You help individuals in recovery from addiction find meaningful employment with recovery-friendly employers.

## Core Personality
- Empathetic and supportive, but practical and action-oriented
- Direct and honest, while remaining encouraging
- Professional but warm - like a trusted mentor
- Recovery-informed: you understand the journey without being clinical

## Expertise Areas
- Job search strategies for people with employment gaps
- Resume and cover letter writing that frames experience positively
- Interview preparation with a focus on addressing background honestly
- Connecting users with recovery-friendly employers
- Career development and skills assessment

## Boundaries
- You are NOT a therapist or counselor - redirect clinical questions appropriately
- You do NOT provide medical or legal advice
- You focus on career and employment topics
- You politely redirect off-topic conversations back to career support

## Communication Style
- Use clear, encouraging language
- Acknowledge challenges while emphasizing strengths
- Provide specific, actionable advice
- Celebrate wins, no matter how small
- Never use stigmatizing language about addiction or recovery"#;

const EMPLOYER_WELCOME: &str = "Hi! I'm Dave, Employa's AI assistant. I'm here to help you connect with motivated candidates from our recovery community. How can I assist you today?";
const TREATMENT_CENTER_WELCOME: &str = "Hello! I'm Dave from Employa. I'm here to help you connect your clients with recovery-friendly employment opportunities. What can I help you with?";
const JOB_SEEKER_WELCOME: &str = "Hey there! I'm Dave, your AI career coach at Employa. I'm here to help you navigate your job search and connect with employers who value second-chance hiring. What's on your mind today?";

fn cache_key(category: &str, name: &str) -> String {
    format!("{category}:{name}")
}

/// `job_seeker` → `Job Seeker`. Letters following a non-letter are capitalised, the rest
/// lowercased.
fn title_case(user_type: &str) -> String {
    let mut previous_is_letter = false;
    user_type
        .replace('_', " ")
        .chars()
        .map(|c| {
            let mapped: String = if previous_is_letter {
                c.to_lowercase().collect()
            } else {
                c.to_uppercase().collect()
            };
            previous_is_letter = c.is_alphabetic();
            mapped
        })
        .collect()
}

pub fn fallback_personality() -> &'static str {
    FALLBACK_PERSONALITY
}

pub fn fallback_welcome(user_type: &str) -> &'static str {
    match user_type {
        "employer" => EMPLOYER_WELCOME,
        "treatment_center" => TREATMENT_CENTER_WELCOME,
        _ => JOB_SEEKER_WELCOME,
    }
}

pub struct PromptManager {
    repo: Arc<dyn PromptRepository>,
    cache: Cache<String, String>,
}

impl PromptManager {
    pub fn new(repo: Arc<dyn PromptRepository>, ttl: Duration) -> Self {
        Self {
            repo,
            cache: Cache::builder().time_to_live(ttl).max_capacity(1_000).build(),
        }
    }

    /// Current content of `category/name`, or `None` when the prompt does not exist or has no
    /// current version.
    #[instrument(skip(self), err)]
    pub async fn get_prompt(&self, category: &str, name: &str, use_cache: bool) -> Result<Option<String>> {
        let key = cache_key(category, name);
        if use_cache && let Some(content) = self.cache.get(&key).await {
            debug!("Prompt cache hit for {}", key);
            return Ok(Some(content));
        }

        let content = self
            .repo
            .get_by_category_name(category, name)
            .await?
            .and_then(|p| p.current_version)
            .map(|v| v.content);

        if let Some(content) = &content {
            self.cache.insert(key, content.clone()).await;
        }
        Ok(content)
    }

    /// Lookup that treats repository failures as a missing prompt so fallbacks apply.
    pub(crate) async fn prompt_or_none(&self, category: &str, name: &str) -> Option<String> {
        match self.get_prompt(category, name, true).await {
            Ok(content) => content,
            Err(e) => {
                warn!("Prompt {}/{} unavailable, using fallback: {}", category, name, e);
                None
            }
        }
    }

    /// Dave's system prompt for a conversation with a `user_type` user.
    pub async fn dave_system_prompt(&self, user_type: &str, include_recovery_language: bool) -> String {
        let mut parts = Vec::with_capacity(4);

        let base = self.prompt_or_none(DAVE_SYSTEM_CATEGORY, "base_personality").await;
        parts.push(base.unwrap_or_else(|| FALLBACK_PERSONALITY.to_string()));

        if let Some(mode) = self.prompt_or_none(DAVE_SYSTEM_CATEGORY, &format!("{user_type}_mode")).await {
            parts.push(format!("\n\n## Context Mode: {}\n{mode}", title_case(user_type)));
        }

        if include_recovery_language
            && let Some(guidelines) = self.prompt_or_none(RECOVERY_LANGUAGE_CATEGORY, "guidelines").await
        {
            parts.push(format!("\n\n## Language Guidelines\n{guidelines}"));
        }

        if let Some(redirect) = self.prompt_or_none(DAVE_SYSTEM_CATEGORY, "off_topic_redirect").await {
            parts.push(format!("\n\n## Off-Topic Handling\n{redirect}"));
        }

        parts.join("\n")
    }

    /// Opening message for a new conversation.
    pub async fn welcome_message(&self, user_type: &str) -> String {
        match self.prompt_or_none(DAVE_SYSTEM_CATEGORY, "welcome_message").await {
            Some(welcome) => welcome.replace("{{ user_type }}", &user_type.replace('_', " ")),
            None => fallback_welcome(user_type).to_string(),
        }
    }

    /// Drop one cached prompt, a whole category, or everything.
    pub async fn clear_cache(&self, category: Option<&str>, name: Option<&str>) {
        match (category, name) {
            (Some(category), Some(name)) => self.cache.invalidate(&cache_key(category, name)).await,
            (Some(category), None) => {
                let prefix = format!("{category}:");
                let keys: Vec<String> = self
                    .cache
                    .iter()
                    .filter(|(key, _)| key.starts_with(&prefix))
                    .map(|(key, _)| key.as_ref().clone())
                    .collect();
                for key in keys {
                    self.cache.invalidate(&key).await;
                }
            }
            _ => self.cache.invalidate_all(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        handlers::PromptRepository,
        in_memory::InMemoryPrompts,
        models::prompts::{PromptCreateDBRequest, PromptVersionCreateDBRequest},
    };

    async fn seed(repo: &InMemoryPrompts, category: &str, name: &str, content: &str) -> uuid::Uuid {
        repo.create(&PromptCreateDBRequest {
            category: category.to_string(),
            name: name.to_string(),
            description: None,
            content: content.to_string(),
            variables_schema: None,
            created_by: "admin".to_string(),
        })
        .await
        .unwrap()
        .prompt
        .id
    }

    fn manager(repo: Arc<InMemoryPrompts>) -> PromptManager {
        PromptManager::new(repo, Duration::from_secs(300))
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("job_seeker"), "Job Seeker");
        assert_eq!(title_case("treatment_center"), "Treatment Center");
        assert_eq!(title_case("EMPLOYER"), "Employer");
    }

    #[tokio::test]
    async fn test_system_prompt_uses_fallback_without_prompts() {
        let manager = manager(Arc::new(InMemoryPrompts::new()));
        let prompt = manager.dave_system_prompt("job_seeker", true).await;
        assert_eq!(prompt, FALLBACK_PERSONALITY);
    }

    #[tokio::test]
    async fn test_system_prompt_assembly() {
        let repo = Arc::new(InMemoryPrompts::new());
        seed(&repo, "dave_system", "base_personality", "BASE").await;
        seed(&repo, "dave_system", "employer_mode", "EMPLOYER").await;
        seed(&repo, "recovery_language", "guidelines", "GUIDE").await;
        seed(&repo, "dave_system", "off_topic_redirect", "REDIRECT").await;
        let manager = manager(repo);

        let prompt = manager.dave_system_prompt("employer", true).await;
        assert_eq!(
            prompt,
            "BASE\n\n\n## Context Mode: Employer\nEMPLOYER\n\n\n## Language Guidelines\nGUIDE\n\n\n## Off-Topic Handling\nREDIRECT"
        );

        let prompt = manager.dave_system_prompt("job_seeker", false).await;
        assert_eq!(prompt, "BASE\n\n\n## Off-Topic Handling\nREDIRECT");
    }

    #[tokio::test]
    async fn test_welcome_message() {
        let repo = Arc::new(InMemoryPrompts::new());
        let manager = manager(repo.clone());
        assert_eq!(manager.welcome_message("employer").await, EMPLOYER_WELCOME);
        assert_eq!(manager.welcome_message("treatment_center").await, TREATMENT_CENTER_WELCOME);
        assert_eq!(manager.welcome_message("anonymous").await, JOB_SEEKER_WELCOME);

        seed(&repo, "dave_system", "welcome_message", "Welcome, {{ user_type }}!").await;
        assert_eq!(manager.welcome_message("job_seeker").await, "Welcome, job seeker!");
    }

    #[tokio::test]
    async fn test_cache_serves_stale_until_cleared() {
        let repo = Arc::new(InMemoryPrompts::new());
        let prompt_id = seed(&repo, "dave_system", "base_personality", "v1").await;
        let manager = manager(repo.clone());

        assert_eq!(manager.get_prompt("dave_system", "base_personality", true).await.unwrap().as_deref(), Some("v1"));

        repo.create_version(&PromptVersionCreateDBRequest {
            prompt_id,
            content: "v2".to_string(),
            commit_message: None,
            variables_schema: None,
            created_by: "admin".to_string(),
        })
        .await
        .unwrap();

        assert_eq!(manager.get_prompt("dave_system", "base_personality", true).await.unwrap().as_deref(), Some("v1"));
        assert_eq!(manager.get_prompt("dave_system", "base_personality", false).await.unwrap().as_deref(), Some("v2"));

        // The uncached read refreshed the entry
        assert_eq!(manager.get_prompt("dave_system", "base_personality", true).await.unwrap().as_deref(), Some("v2"));

        repo.create_version(&PromptVersionCreateDBRequest {
            prompt_id,
            content: "v3".to_string(),
            commit_message: None,
            variables_schema: None,
            created_by: "admin".to_string(),
        })
        .await
        .unwrap();
        manager.clear_cache(Some("dave_system"), None).await;
        assert_eq!(manager.get_prompt("dave_system", "base_personality", true).await.unwrap().as_deref(), Some("v3"));
    }

    #[tokio::test]
    async fn test_missing_prompt_is_none() {
        let manager = manager(Arc::new(InMemoryPrompts::new()));
        assert!(manager.get_prompt("dave_system", "nope", true).await.unwrap().is_none());
    }
}
