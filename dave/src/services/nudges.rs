//! Nudge generation.
//!
//! A nudge is a short message (100-200 characters) nudging a user in recovery toward their
//! next step. Prompt templates live in the `dave_nudges` prompt category so they can be edited
//! without a deploy; built-in templates are used when a template is missing. Templates accept
//! variables as either `{{name}}` or `{name}`.
//!
//! Generation never fails outright: if the model call fails a canned message for the nudge type
//! is returned with `prompt_source: fallback_error`.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{error, info, instrument};
use uuid::Uuid;

use super::prompt_manager::PromptManager;
use crate::{
    api::models::nudges::{
        NudgeContext, NudgeGenerateRequest, NudgeGenerateResponse, NudgeType, NudgeTypeInfo, RecoveryStage,
    },
    gemini::{LanguageModel, LlmError},
};

pub const NUDGE_PROMPT_CATEGORY: &str = "dave_nudges";

/// Messages longer than this are shortened.
const MAX_MESSAGE_CHARS: usize = 300;
const TRUNCATED_MESSAGE_CHARS: usize = 280;

const SYSTEM_INSTRUCTION: &str = "You are Dave, Employa's AI career coach, writing short nudge messages.
Your nudges should be:
- Warm and encouraging, never pushy or guilt-inducing
- Recovery-sensitive (no stigmatizing language)
- Personal and conversational
- Between 100-200 characters
- Action-oriented but supportive

Never include quotes around the message. Just output the message directly.";

/// Call-to-action button shown with a nudge.
struct CallToAction {
    text: &'static str,
    link_template: &'static str,
}

fn call_to_action(nudge_type: NudgeType) -> CallToAction {
    let (text, link_template) = match nudge_type {
        NudgeType::JobSearchEncouragement => ("View Job", "/jobs/{job_id}"),
        NudgeType::CheckinReminder => ("Check In Now", "/journey/check-in"),
        NudgeType::MilestoneCelebration => ("View Progress", "/journey"),
        NudgeType::ProfileAlmostComplete => ("Complete Profile", "/profile/edit"),
        NudgeType::SkillEncouragement => ("Take Assessment", "/skills"),
        NudgeType::MeetingReminder => ("Find Meetings", "/recover/meetings"),
    };
    CallToAction { text, link_template }
}

/// Name of the editable template in the `dave_nudges` category.
pub fn prompt_name(nudge_type: NudgeType) -> &'static str {
    match nudge_type {
        NudgeType::JobSearchEncouragement => "nudge_job_search_stuck",
        NudgeType::CheckinReminder => "nudge_checkin_reminder",
        NudgeType::MilestoneCelebration => "nudge_milestone_celebration",
        NudgeType::ProfileAlmostComplete => "nudge_profile_incomplete",
        NudgeType::SkillEncouragement => "nudge_skill_encouragement",
        NudgeType::MeetingReminder => "nudge_meeting_reminder",
    }
}

fn fallback_prompt(nudge_type: NudgeType) -> &'static str {
    match nudge_type {
        NudgeType::JobSearchEncouragement => {
            "Generate a short, encouraging nudge (100-150 chars) for a user in {recovery_stage} recovery who saved a job {days_ago} days ago but hasn't applied.
Be warm, not pushy. Recovery-sensitive language.
Job: {job_title} at {company_name}
User name: {user_name}

Only output the nudge message, nothing else."
        }
        NudgeType::CheckinReminder => {
            "Generate a gentle, caring check-in reminder nudge (100-150 chars) for a user in {recovery_stage} recovery who hasn't checked in for {days_inactive} days.
Be supportive, not guilt-inducing. Recovery-sensitive language.
User name: {user_name}

Only output the nudge message, nothing else."
        }
        NudgeType::MilestoneCelebration => {
            "Generate a celebratory nudge (100-150 chars) for a user in {recovery_stage} recovery who just achieved: {milestone}.
Be genuinely excited and affirming. Recovery-sensitive language.
User name: {user_name}

Only output the nudge message, nothing else."
        }
        NudgeType::ProfileAlmostComplete => {
            "Generate an encouraging nudge (100-150 chars) for a user in {recovery_stage} recovery whose profile is {completion_percentage}% complete.
Highlight the benefit of completing it. Recovery-sensitive language.
User name: {user_name}

Only output the nudge message, nothing else."
        }
        NudgeType::SkillEncouragement => {
            "Generate an encouraging nudge (100-150 chars) for a user in {recovery_stage} recovery about taking a skills assessment.
Focus on self-discovery and confidence. Recovery-sensitive language.
User name: {user_name}
Skill: {skill_name}

Only output the nudge message, nothing else."
        }
        NudgeType::MeetingReminder => {
            "Generate a supportive meeting reminder nudge (100-150 chars) for a user in {recovery_stage} recovery.
Be caring and non-judgmental. Recovery-sensitive language.
User name: {user_name}

Only output the nudge message, nothing else."
        }
    }
}

fn fallback_message(nudge_type: NudgeType, name: &str) -> String {
    match nudge_type {
        NudgeType::JobSearchEncouragement => {
            format!("Hey {name}! Ready to take the next step on that saved job? We're cheering you on!")
        }
        NudgeType::CheckinReminder => {
            format!("Hey {name}, we miss you! Take a moment to check in - your progress matters.")
        }
        NudgeType::MilestoneCelebration => format!("Amazing work, {name}! You're making real progress. Keep going!"),
        NudgeType::ProfileAlmostComplete => {
            format!("Almost there, {name}! Complete your profile to unlock more opportunities.")
        }
        NudgeType::SkillEncouragement => format!("Curious about your strengths, {name}? Try a quick skills assessment!"),
        NudgeType::MeetingReminder => format!("Hey {name}, staying connected matters. Find a meeting near you today."),
    }
}

/// Description and triggering rule for each nudge type.
pub fn nudge_types() -> Vec<NudgeTypeInfo> {
    NudgeType::ALL
        .iter()
        .map(|&nudge_type| {
            let (description, trigger) = match nudge_type {
                NudgeType::JobSearchEncouragement => (
                    "Encourages user to apply for saved jobs",
                    "job_saved event 7+ days ago, no application",
                ),
                NudgeType::CheckinReminder => (
                    "Gentle reminder to complete daily check-in",
                    "No checkin_completed event in 3+ days",
                ),
                NudgeType::MilestoneCelebration => (
                    "Celebrates user achievements",
                    "Immediate on skill_completed or streak milestone",
                ),
                NudgeType::ProfileAlmostComplete => {
                    ("Encourages profile completion", "Profile reaches 80% completion")
                }
                NudgeType::SkillEncouragement => {
                    ("Encourages skills assessment", "User hasn't taken skills assessment")
                }
                NudgeType::MeetingReminder => ("Supportive meeting reminder", "No meeting_attended in 7+ days"),
            };
            NudgeTypeInfo {
                nudge_type,
                description: description.to_string(),
                trigger: trigger.to_string(),
            }
        })
        .collect()
}

fn new_nudge_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("nudge_{}", &hex[..12])
}

/// Counts of zero are treated like missing values.
fn count_or(value: Option<i64>, default: &str) -> String {
    value.filter(|v| *v != 0).map_or_else(|| default.to_string(), |v| v.to_string())
}

/// Substitute template variables.
///
/// Context-derived variables are only filled in when a context was supplied; otherwise their
/// placeholders are left in place.
pub fn format_prompt(
    template: &str,
    nudge_type: NudgeType,
    recovery_stage: RecoveryStage,
    context: Option<&NudgeContext>,
    user_name: Option<&str>,
) -> String {
    let mut variables: Vec<(&str, String)> = vec![
        ("recovery_stage", recovery_stage.description().to_string()),
        ("user_name", user_name.unwrap_or("there").to_string()),
        ("nudge_type", nudge_type.as_str().to_string()),
    ];

    if let Some(context) = context {
        let text = |value: &Option<String>, default: &str| {
            value.as_deref().filter(|v| !v.is_empty()).unwrap_or(default).to_string()
        };
        variables.extend([
            ("days_ago", count_or(context.days_since_event, "a few")),
            ("days_inactive", count_or(context.days_inactive, "a few")),
            ("job_title", text(&context.job_title, "the saved job")),
            ("company_name", text(&context.company_name, "the company")),
            ("milestone", text(&context.milestone, "your achievement")),
            ("streak", count_or(context.streak, "0")),
            ("completion_percentage", count_or(context.completion_percentage, "0")),
            ("skill_name", text(&context.skill_name, "this skill")),
        ]);
    }

    variables.iter().fold(template.to_string(), |formatted, (key, value)| {
        formatted
            .replace(&format!("{{{{{key}}}}}"), value)
            .replace(&format!("{{{key}}}"), value)
    })
}

/// Trim quotes and whitespace, and shorten overlong messages at a sentence boundary.
pub fn clean_message(raw: &str) -> String {
    let message = raw.trim().trim_matches('"').trim_matches('\'');
    if message.chars().count() <= MAX_MESSAGE_CHARS {
        return message.to_string();
    }

    let mut truncated = String::new();
    for sentence in message.split(". ") {
        if truncated.chars().count() + sentence.chars().count() + 2 > TRUNCATED_MESSAGE_CHARS {
            break;
        }
        truncated.push_str(sentence);
        truncated.push_str(". ");
    }

    let truncated = truncated.trim();
    if truncated.is_empty() {
        format!("{}...", super::truncate_chars(message, TRUNCATED_MESSAGE_CHARS))
    } else {
        truncated.to_string()
    }
}

fn cta_link(template: &str, context: Option<&NudgeContext>) -> String {
    let Some(context) = context else {
        return template.to_string();
    };

    let mut link = template.to_string();
    if let Some(job_id) = context.job_id.as_deref().filter(|id| !id.is_empty()) {
        link = link.replace("{job_id}", job_id);
    }
    if let Some(skill_id) = context.skill_id.as_deref().filter(|id| !id.is_empty()) {
        link = link.replace("{skill_id}", skill_id);
    }
    link
}

pub struct NudgeService {
    llm: Arc<dyn LanguageModel>,
    prompts: Arc<PromptManager>,
    model_name: String,
}

impl NudgeService {
    pub fn new(llm: Arc<dyn LanguageModel>, prompts: Arc<PromptManager>, model_name: impl Into<String>) -> Self {
        Self {
            llm,
            prompts,
            model_name: model_name.into(),
        }
    }

    /// The editable template for `nudge_type` and whether it came from the prompt store.
    async fn template(&self, nudge_type: NudgeType) -> (String, bool) {
        match self.prompts.prompt_or_none(NUDGE_PROMPT_CATEGORY, prompt_name(nudge_type)).await {
            Some(template) if !template.is_empty() => (template, true),
            _ => (fallback_prompt(nudge_type).to_string(), false),
        }
    }

    async fn generate_message(&self, prompt: &str) -> Result<String, LlmError> {
        let raw = self.llm.generate(prompt, Some(SYSTEM_INSTRUCTION), &[]).await?;
        Ok(clean_message(&raw))
    }

    #[instrument(skip(self, request), fields(user_id = %request.user_id, nudge_type = request.nudge_type.as_str()))]
    pub async fn generate(&self, request: &NudgeGenerateRequest) -> NudgeGenerateResponse {
        let nudge_id = new_nudge_id();
        let (template, from_store) = self.template(request.nudge_type).await;
        let prompt = format_prompt(
            &template,
            request.nudge_type,
            request.recovery_stage,
            request.context.as_ref(),
            request.user_name.as_deref(),
        );

        let message = match self.generate_message(&prompt).await {
            Ok(message) => message,
            Err(e) => {
                error!("Failed to generate nudge: {}", e);
                return self.fallback_response(nudge_id, request);
            }
        };

        let cta = call_to_action(request.nudge_type);
        info!(nudge_id = %nudge_id, recovery_stage = ?request.recovery_stage, "Generated nudge");

        NudgeGenerateResponse {
            nudge_id,
            message,
            cta_text: Some(cta.text.to_string()),
            cta_link: Some(cta_link(cta.link_template, request.context.as_ref())),
            nudge_type: request.nudge_type,
            recovery_stage: request.recovery_stage,
            generated_at: Utc::now(),
            metadata: Some(json!({
                "model": self.model_name,
                "prompt_source": if from_store { "database" } else { "fallback" },
                "user_id": request.user_id,
            })),
        }
    }

    fn fallback_response(&self, nudge_id: String, request: &NudgeGenerateRequest) -> NudgeGenerateResponse {
        let cta = call_to_action(request.nudge_type);
        NudgeGenerateResponse {
            nudge_id,
            message: fallback_message(request.nudge_type, request.user_name.as_deref().unwrap_or("there")),
            cta_text: Some(cta.text.to_string()),
            cta_link: Some(cta.link_template.replace("{job_id}", "")),
            nudge_type: request.nudge_type,
            recovery_stage: request.recovery_stage,
            generated_at: Utc::now(),
            metadata: Some(json!({ "prompt_source": "fallback_error" })),
        }
    }
}
