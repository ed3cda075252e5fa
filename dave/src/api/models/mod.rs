//! API request and response data models.
//!
//! These structures define the public HTTP contract. They are distinct from the database
//! models in [`crate::db::models`] and are annotated with `utoipa` for the OpenAPI document.
//!
//! Request models carry a `validate` method enforcing field limits; handlers call it before
//! doing any work, and violations surface as `400 Bad Request`.
//!
//! - [`chat`]: chat messages, conversations and stream events
//! - [`knowledge`]: knowledge base search, articles and FAQs
//! - [`prompts`]: admin prompt management
//! - [`nudges`]: nudge generation
//! - [`health`]: probe and metadata responses

pub mod chat;
pub mod health;
pub mod knowledge;
pub mod nudges;
pub mod prompts;

use crate::errors::{Error, Result};

/// Reject `value` unless its character count is within `min..=max`.
pub(crate) fn check_length(field: &str, value: &str, min: usize, max: usize) -> Result<()> {
    let len = value.chars().count();
    if len < min {
        return Err(Error::BadRequest {
            message: format!("{field} must be at least {min} characters"),
        });
    }
    if len > max {
        return Err(Error::BadRequest {
            message: format!("{field} must be at most {max} characters"),
        });
    }
    Ok(())
}

/// Reject `value` unless it is within `min..=max`.
pub(crate) fn check_range(field: &str, value: i64, min: i64, max: i64) -> Result<()> {
    if value < min || value > max {
        return Err(Error::BadRequest {
            message: format!("{field} must be between {min} and {max}"),
        });
    }
    Ok(())
}
