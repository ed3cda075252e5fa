//! Database layer for data persistence and access.
//!
//! Data access follows the repository pattern: services depend on the traits in [`handlers`],
//! never on SQL.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐
//! │  Services   │  (chat, knowledge search, prompt manager)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │ Repositories│  (db::handlers traits; Postgres or in-memory)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │   Models    │  (db::models - database records)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │  PostgreSQL │
//! └─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`handlers`]: Repository traits and their PostgreSQL implementations
//! - [`in_memory`]: Lock-protected in-process implementations of the same traits
//! - [`models`]: Database record structures matching table schemas
//! - [`errors`]: Database-specific error types
//!
//! # Migrations
//!
//! Schema migrations live in `migrations/` and are embedded into the binary by
//! [`migrator`]. They run at startup before the server accepts traffic.

pub mod errors;
pub mod handlers;
pub mod in_memory;
pub mod models;

/// Embedded schema migrations.
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}
