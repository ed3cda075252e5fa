//! API models for nudge generation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::check_range;
use crate::errors::{Error, Result};

pub const MAX_BATCH_SIZE: usize = 50;

/// User's recovery stage, used to adjust tone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStage {
    /// 0-6 months
    Early,
    /// 6-18 months
    #[default]
    Intermediate,
    /// 18+ months
    Advanced,
    /// 3+ years
    LongTerm,
}

impl RecoveryStage {
    /// Description used inside prompts.
    pub fn description(&self) -> &'static str {
        match self {
            RecoveryStage::Early => "early (0-6 months)",
            RecoveryStage::Intermediate => "intermediate (6-18 months)",
            RecoveryStage::Advanced => "advanced (18+ months)",
            RecoveryStage::LongTerm => "long-term (3+ years)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NudgeType {
    JobSearchEncouragement,
    CheckinReminder,
    MilestoneCelebration,
    ProfileAlmostComplete,
    SkillEncouragement,
    MeetingReminder,
}

impl NudgeType {
    pub const ALL: [NudgeType; 6] = [
        NudgeType::JobSearchEncouragement,
        NudgeType::CheckinReminder,
        NudgeType::MilestoneCelebration,
        NudgeType::ProfileAlmostComplete,
        NudgeType::SkillEncouragement,
        NudgeType::MeetingReminder,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NudgeType::JobSearchEncouragement => "job_search_encouragement",
            NudgeType::CheckinReminder => "checkin_reminder",
            NudgeType::MilestoneCelebration => "milestone_celebration",
            NudgeType::ProfileAlmostComplete => "profile_almost_complete",
            NudgeType::SkillEncouragement => "skill_encouragement",
            NudgeType::MeetingReminder => "meeting_reminder",
        }
    }
}

/// Personalisation data for a nudge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct NudgeContext {
    /// Days since the triggering event occurred
    pub days_since_event: Option<i64>,
    /// Days since the user was last active
    pub days_inactive: Option<i64>,
    pub job_id: Option<String>,
    pub job_title: Option<String>,
    pub company_name: Option<String>,
    /// Achievement name, e.g. "First Application" or "7-Day Streak"
    pub milestone: Option<String>,
    pub streak: Option<i64>,
    /// Profile completion percentage (0-100)
    pub completion_percentage: Option<i64>,
    pub missing_fields: Option<Vec<String>>,
    pub skill_id: Option<String>,
    pub skill_name: Option<String>,
    pub skill_score: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "user_id": "123e4567-e89b-12d3-a456-426614174000",
    "recovery_stage": "intermediate",
    "nudge_type": "job_search_encouragement",
    "context": {"days_since_event": 7, "job_title": "Warehouse Associate", "company_name": "Amazon"},
    "user_name": "Marcus"
}))]
pub struct NudgeGenerateRequest {
    pub user_id: String,
    #[serde(default)]
    pub recovery_stage: RecoveryStage,
    pub nudge_type: NudgeType,
    #[serde(default)]
    pub context: Option<NudgeContext>,
    /// First name used to personalise the message
    #[serde(default)]
    pub user_name: Option<String>,
}

impl NudgeGenerateRequest {
    pub fn validate(&self) -> Result<()> {
        if let Some(percentage) = self.context.as_ref().and_then(|c| c.completion_percentage) {
            check_range("completion_percentage", percentage, 0, 100)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct NudgeGenerateResponse {
    /// `nudge_` followed by 12 hex characters
    pub nudge_id: String,
    pub message: String,
    pub cta_text: Option<String>,
    pub cta_link: Option<String>,
    pub nudge_type: NudgeType,
    pub recovery_stage: RecoveryStage,
    pub generated_at: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NudgeBatchRequest {
    /// Between 1 and 50 nudge requests
    pub nudges: Vec<NudgeGenerateRequest>,
}

impl NudgeBatchRequest {
    pub fn validate(&self) -> Result<()> {
        if self.nudges.is_empty() || self.nudges.len() > MAX_BATCH_SIZE {
            return Err(Error::BadRequest {
                message: format!("nudges must contain between 1 and {MAX_BATCH_SIZE} requests"),
            });
        }
        self.nudges.iter().try_for_each(NudgeGenerateRequest::validate)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NudgeBatchResponse {
    pub results: Vec<NudgeGenerateResponse>,
    pub total_requested: usize,
    pub total_generated: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NudgeTypeInfo {
    #[serde(rename = "type")]
    pub nudge_type: NudgeType,
    pub description: String,
    pub trigger: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NudgeTypeList {
    pub nudge_types: Vec<NudgeTypeInfo>,
}
