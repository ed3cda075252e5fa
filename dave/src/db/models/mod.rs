//! Database record models matching table schemas.
//!
//! These structs correspond to table rows and derive `sqlx::FromRow`. They are kept separate
//! from the API models in [`crate::api::models`] so storage and wire formats can evolve
//! independently.
//!
//! - [`conversations`]: chat conversations and their messages
//! - [`prompts`]: admin-managed prompts and their version history
//! - [`knowledge`]: knowledge base categories, articles and FAQs

pub mod conversations;
pub mod knowledge;
pub mod prompts;
