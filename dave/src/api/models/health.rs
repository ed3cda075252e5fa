//! API models for probes and service metadata.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// Envelope shared by `/health`, `/ready` and `/api/v1/ping`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    pub status: String,
    pub details: Value,
}

impl StatusResponse {
    pub fn new(status: &str, details: Value) -> Self {
        Self {
            status: status.to_string(),
            details,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MetadataResponse {
    pub service: String,
    pub environment: String,
    /// Semantic version (X.Y.Z)
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LivenessResponse {
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    Ready,
    NotReady,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReadinessChecks {
    /// `ok` or `error: ...`
    pub database: String,
    /// `ok` or `not configured`
    pub gemini: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReadinessResponse {
    pub status: Readiness,
    pub checks: ReadinessChecks,
}

/// Outcome of loading one prompt for the debug report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PromptCheck {
    Found { preview: String, length: usize },
    NotFound { using_fallback: bool },
    Built { length: usize, preview: String },
    Error { error: String },
}

/// Keyed by `category/name`, plus `full_system_prompt`.
pub type PromptReport = BTreeMap<String, PromptCheck>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_prompt_check_is_tagged_by_status() {
        let found = PromptCheck::Found {
            preview: "Hi".to_string(),
            length: 2,
        };
        assert_eq!(
            serde_json::to_value(found).unwrap(),
            json!({"status": "found", "preview": "Hi", "length": 2})
        );
        let missing = PromptCheck::NotFound { using_fallback: true };
        assert_eq!(
            serde_json::to_value(missing).unwrap(),
            json!({"status": "not_found", "using_fallback": true})
        );
    }

    #[test]
    fn test_readiness_serializes_snake_case() {
        assert_eq!(serde_json::to_value(Readiness::NotReady).unwrap(), json!("not_ready"));
    }
}
