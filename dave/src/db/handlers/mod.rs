//! Repository traits and their PostgreSQL implementations.
//!
//! Each repository is an object-safe `async_trait` so services can hold it as
//! `Arc<dyn ...Repository>` and tests can swap in the stores from [`crate::db::in_memory`].
//!
//! - [`ConversationRepository`]: conversations and messages
//! - [`PromptRepository`]: versioned admin prompts
//! - [`KnowledgeRepository`]: knowledge base articles, FAQs and categories
//!
//! ```ignore
//! use dave::db::handlers::{ConversationRepository, PgConversations};
//!
//! let repo = PgConversations::new(pool.clone());
//! let conversation = repo.create(&request).await?;
//! let history = repo.recent_messages(conversation.id, 10).await?;
//! ```

pub mod conversations;
pub mod knowledge;
pub mod prompts;

pub use conversations::{ConversationRepository, PgConversations};
pub use knowledge::{KnowledgeRepository, PgKnowledge};
pub use prompts::{PgPrompts, PromptRepository};
