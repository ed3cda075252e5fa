use sqlx::error::DatabaseError;
use thiserror::Error;

/// Repository failures that handlers can act on; everything else is `Other`.
#[derive(Error, Debug)]
pub enum DbError {
    /// Row not found by the given identifier
    #[error("Entity not found")]
    NotFound,

    /// A unique key already exists, e.g. a duplicate `(category, name)` prompt or article slug
    #[error("Unique constraint violation")]
    UniqueViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    /// A referenced row is missing, e.g. a message for a deleted conversation
    #[error("Foreign key constraint violation")]
    ForeignKeyViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    /// A column check failed, e.g. a message role outside user/assistant/system
    #[error("Check constraint violation")]
    CheckViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn violation_parts(db_err: &dyn DatabaseError) -> (Option<String>, Option<String>, String) {
    (
        db_err.constraint().map(str::to_string),
        db_err.table().map(str::to_string),
        db_err.message().to_string(),
    )
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        let sqlx::Error::Database(db_err) = &err else {
            return match err {
                sqlx::Error::RowNotFound => DbError::NotFound,
                other => DbError::Other(anyhow::Error::from(other)),
            };
        };

        let (constraint, table, message) = violation_parts(&**db_err);
        if db_err.is_unique_violation() {
            DbError::UniqueViolation {
                constraint,
                table,
                message,
            }
        } else if db_err.is_foreign_key_violation() {
            DbError::ForeignKeyViolation {
                constraint,
                table,
                message,
            }
        } else if db_err.is_check_violation() {
            DbError::CheckViolation {
                constraint,
                table,
                message,
            }
        } else {
            DbError::Other(anyhow::Error::from(err))
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
