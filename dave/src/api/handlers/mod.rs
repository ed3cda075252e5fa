//! HTTP request handlers for all API endpoints.
//!
//! Handlers validate the request, resolve the caller through the extractors in
//! [`crate::auth::extractors`] and delegate to the services held in [`crate::AppState`].
//! Failures are returned as [`crate::errors::Error`], which renders the `{"detail": ...}` body.
//!
//! # Handler Modules
//!
//! - [`chat`]: Messages, SSE streaming and conversation history
//! - [`health`]: Probes, service metadata and the prompt diagnostic report
//! - [`knowledge`]: Knowledge base search, articles, FAQs and categories
//! - [`nudges`]: Single and batch nudge generation
//! - [`prompts`]: Admin prompt CRUD, versioning, rollback and cache control

pub mod chat;
pub mod health;
pub mod knowledge;
pub mod nudges;
pub mod prompts;
