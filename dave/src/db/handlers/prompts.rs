//! Repository for admin prompts with version history.
//!
//! A prompt row points at its current version through `current_version_id`. Editing a prompt
//! appends a new version and moves the pointer; rolling back only moves the pointer.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::instrument;

use crate::db::{
    errors::{DbError, Result},
    models::prompts::{
        Prompt, PromptCategoryCount, PromptCreateDBRequest, PromptId, PromptListFilter, PromptVersion,
        PromptVersionCreateDBRequest, PromptVersionId, PromptWithVersion,
    },
};

const PROMPT_COLUMNS: &str = "id, category, name, description, current_version_id, is_archived, created_at, updated_at";
const VERSION_COLUMNS: &str =
    "id, prompt_id, version_number, content, variables_schema, commit_message, created_by, created_at";

#[async_trait]
pub trait PromptRepository: Send + Sync {
    /// Non-archived prompt by category and name, with its current version.
    async fn get_by_category_name(&self, category: &str, name: &str) -> Result<Option<PromptWithVersion>>;

    async fn get_by_id(&self, id: PromptId) -> Result<Option<PromptWithVersion>>;

    /// One page of prompts ordered by category then name, plus the total matching count.
    async fn list(&self, filter: &PromptListFilter) -> Result<(Vec<PromptWithVersion>, i64)>;

    /// Every non-archived prompt in a category.
    async fn list_by_category(&self, category: &str) -> Result<Vec<PromptWithVersion>> {
        let (prompts, _) = self
            .list(&PromptListFilter {
                category: Some(category.to_string()),
                include_archived: false,
                page: 1,
                limit: 1000,
            })
            .await?;
        Ok(prompts)
    }

    /// All versions of a prompt, newest first.
    async fn versions(&self, prompt_id: PromptId) -> Result<Vec<PromptVersion>>;

    /// Append a version numbered one past the highest existing one and make it current.
    async fn create_version(&self, request: &PromptVersionCreateDBRequest) -> Result<PromptVersion>;

    /// Point the prompt at an existing version. Returns false when the version does not belong
    /// to the prompt.
    async fn rollback(&self, prompt_id: PromptId, version_id: PromptVersionId) -> Result<bool>;

    /// Non-archived prompt counts per category, sorted by category.
    async fn categories(&self) -> Result<Vec<PromptCategoryCount>>;

    /// Create a prompt with version 1 as its current version.
    async fn create(&self, request: &PromptCreateDBRequest) -> Result<PromptWithVersion>;

    /// Cheap round trip used by readiness probes.
    async fn health_check(&self) -> Result<()>;
}

pub struct PgPrompts {
    pool: PgPool,
}

impl PgPrompts {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn attach_versions(&self, prompts: Vec<Prompt>) -> Result<Vec<PromptWithVersion>> {
        let version_ids: Vec<PromptVersionId> = prompts.iter().filter_map(|p| p.current_version_id).collect();

        let mut versions: HashMap<PromptVersionId, PromptVersion> = if version_ids.is_empty() {
            HashMap::new()
        } else {
            sqlx::query_as::<_, PromptVersion>(&format!(
                "SELECT {VERSION_COLUMNS} FROM admin_prompt_versions WHERE id = ANY($1)"
            ))
            .bind(&version_ids)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|v| (v.id, v))
            .collect()
        };

        Ok(prompts
            .into_iter()
            .map(|prompt| {
                let current_version = prompt.current_version_id.and_then(|id| versions.remove(&id));
                PromptWithVersion { prompt, current_version }
            })
            .collect())
    }

    async fn attach_version(&self, prompt: Option<Prompt>) -> Result<Option<PromptWithVersion>> {
        let Some(prompt) = prompt else {
            return Ok(None);
        };
        Ok(self.attach_versions(vec![prompt]).await?.into_iter().next())
    }
}

#[async_trait]
impl PromptRepository for PgPrompts {
    #[instrument(skip(self), err)]
    async fn get_by_category_name(&self, category: &str, name: &str) -> Result<Option<PromptWithVersion>> {
        let prompt = sqlx::query_as::<_, Prompt>(&format!(
            "SELECT {PROMPT_COLUMNS} FROM admin_prompts WHERE category = $1 AND name = $2 AND is_archived = FALSE"
        ))
        .bind(category)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        self.attach_version(prompt).await
    }

    #[instrument(skip(self), err)]
    async fn get_by_id(&self, id: PromptId) -> Result<Option<PromptWithVersion>> {
        let prompt = sqlx::query_as::<_, Prompt>(&format!("SELECT {PROMPT_COLUMNS} FROM admin_prompts WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        self.attach_version(prompt).await
    }

    #[instrument(skip(self), err)]
    async fn list(&self, filter: &PromptListFilter) -> Result<(Vec<PromptWithVersion>, i64)> {
        let offset = (filter.page.max(1) - 1).saturating_mul(filter.limit);

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM admin_prompts
             WHERE ($1::text IS NULL OR category = $1) AND ($2 OR is_archived = FALSE)",
        )
        .bind(&filter.category)
        .bind(filter.include_archived)
        .fetch_one(&self.pool)
        .await?;

        let prompts = sqlx::query_as::<_, Prompt>(&format!(
            "SELECT {PROMPT_COLUMNS} FROM admin_prompts
             WHERE ($1::text IS NULL OR category = $1) AND ($2 OR is_archived = FALSE)
             ORDER BY category, name
             LIMIT $3 OFFSET $4"
        ))
        .bind(&filter.category)
        .bind(filter.include_archived)
        .bind(filter.limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((self.attach_versions(prompts).await?, total))
    }

    #[instrument(skip(self), err)]
    async fn versions(&self, prompt_id: PromptId) -> Result<Vec<PromptVersion>> {
        let versions = sqlx::query_as::<_, PromptVersion>(&format!(
            "SELECT {VERSION_COLUMNS} FROM admin_prompt_versions WHERE prompt_id = $1 ORDER BY version_number DESC"
        ))
        .bind(prompt_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(versions)
    }

    #[instrument(skip(self, request), fields(prompt_id = %request.prompt_id), err)]
    async fn create_version(&self, request: &PromptVersionCreateDBRequest) -> Result<PromptVersion> {
        let mut tx = self.pool.begin().await?;

        // Serialise concurrent edits of the same prompt
        let locked: Option<PromptId> = sqlx::query_scalar("SELECT id FROM admin_prompts WHERE id = $1 FOR UPDATE")
            .bind(request.prompt_id)
            .fetch_optional(&mut *tx)
            .await?;
        if locked.is_none() {
            return Err(DbError::NotFound);
        }

        let version = sqlx::query_as::<_, PromptVersion>(&format!(
            "INSERT INTO admin_prompt_versions (prompt_id, version_number, content, variables_schema, commit_message, created_by)
             VALUES (
                $1,
                (SELECT COALESCE(MAX(version_number), 0) + 1 FROM admin_prompt_versions WHERE prompt_id = $1),
                $2, $3, $4, $5
             )
             RETURNING {VERSION_COLUMNS}"
        ))
        .bind(request.prompt_id)
        .bind(&request.content)
        .bind(&request.variables_schema)
        .bind(&request.commit_message)
        .bind(&request.created_by)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE admin_prompts SET current_version_id = $2, updated_at = NOW() WHERE id = $1")
            .bind(request.prompt_id)
            .bind(version.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(version)
    }

    #[instrument(skip(self), err)]
    async fn rollback(&self, prompt_id: PromptId, version_id: PromptVersionId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE admin_prompts SET current_version_id = $2, updated_at = NOW()
             WHERE id = $1
               AND EXISTS (SELECT 1 FROM admin_prompt_versions WHERE id = $2 AND prompt_id = $1)",
        )
        .bind(prompt_id)
        .bind(version_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    async fn categories(&self) -> Result<Vec<PromptCategoryCount>> {
        let categories = sqlx::query_as::<_, PromptCategoryCount>(
            "SELECT category, COUNT(*) AS prompt_count FROM admin_prompts
             WHERE is_archived = FALSE
             GROUP BY category
             ORDER BY category",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(categories)
    }

    #[instrument(skip(self, request), fields(category = %request.category, name = %request.name), err)]
    async fn create(&self, request: &PromptCreateDBRequest) -> Result<PromptWithVersion> {
        let mut tx = self.pool.begin().await?;

        let prompt = sqlx::query_as::<_, Prompt>(&format!(
            "INSERT INTO admin_prompts (category, name, description) VALUES ($1, $2, $3) RETURNING {PROMPT_COLUMNS}"
        ))
        .bind(&request.category)
        .bind(&request.name)
        .bind(&request.description)
        .fetch_one(&mut *tx)
        .await?;

        let version = sqlx::query_as::<_, PromptVersion>(&format!(
            "INSERT INTO admin_prompt_versions (prompt_id, version_number, content, variables_schema, commit_message, created_by)
             VALUES ($1, 1, $2, $3, $4, $5)
             RETURNING {VERSION_COLUMNS}"
        ))
        .bind(prompt.id)
        .bind(&request.content)
        .bind(&request.variables_schema)
        .bind("Initial version")
        .bind(&request.created_by)
        .fetch_one(&mut *tx)
        .await?;

        let prompt = sqlx::query_as::<_, Prompt>(&format!(
            "UPDATE admin_prompts SET current_version_id = $2 WHERE id = $1 RETURNING {PROMPT_COLUMNS}"
        ))
        .bind(prompt.id)
        .bind(version.id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(PromptWithVersion {
            prompt,
            current_version: Some(version),
        })
    }

    #[instrument(skip(self), err)]
    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1 FROM admin_prompts LIMIT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_request(category: &str, name: &str, content: &str) -> PromptCreateDBRequest {
        PromptCreateDBRequest {
            category: category.to_string(),
            name: name.to_string(),
            description: None,
            content: content.to_string(),
            variables_schema: None,
            created_by: "admin".to_string(),
        }
    }

    fn version_request(prompt_id: PromptId, content: &str) -> PromptVersionCreateDBRequest {
        PromptVersionCreateDBRequest {
            prompt_id,
            content: content.to_string(),
            commit_message: Some(format!("Set to {content}")),
            variables_schema: None,
            created_by: "admin".to_string(),
        }
    }

    #[sqlx::test]
    async fn test_create_and_lookup(pool: PgPool) {
        let repo = PgPrompts::new(pool);
        let created = repo
            .create(&create_request("dave_system", "base_personality", "You are Dave."))
            .await
            .unwrap();

        let version = created.current_version.as_ref().unwrap();
        assert_eq!(version.version_number, 1);
        assert_eq!(version.commit_message.as_deref(), Some("Initial version"));
        assert_eq!(created.prompt.current_version_id, Some(version.id));

        let found = repo
            .get_by_category_name("dave_system", "base_personality")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.prompt.id, created.prompt.id);
        assert_eq!(found.current_version.unwrap().content, "You are Dave.");
        assert!(repo.get_by_category_name("dave_system", "missing").await.unwrap().is_none());

        let duplicate = repo.create(&create_request("dave_system", "base_personality", "Again")).await;
        assert!(matches!(duplicate, Err(DbError::UniqueViolation { .. })));
    }

    #[sqlx::test]
    async fn test_versions_are_numbered_sequentially(pool: PgPool) {
        let repo = PgPrompts::new(pool);
        let created = repo.create(&create_request("dave_system", "tone", "v1")).await.unwrap();
        let prompt_id = created.prompt.id;

        let second = repo.create_version(&version_request(prompt_id, "v2")).await.unwrap();
        let third = repo.create_version(&version_request(prompt_id, "v3")).await.unwrap();
        assert_eq!((second.version_number, third.version_number), (2, 3));

        let current = repo.get_by_id(prompt_id).await.unwrap().unwrap();
        assert_eq!(current.current_version.unwrap().id, third.id);

        let numbers: Vec<i32> = repo
            .versions(prompt_id)
            .await
            .unwrap()
            .iter()
            .map(|v| v.version_number)
            .collect();
        assert_eq!(numbers, vec![3, 2, 1]);

        let missing = repo.create_version(&version_request(uuid::Uuid::new_v4(), "v1")).await;
        assert!(matches!(missing, Err(DbError::NotFound)));
    }

    #[sqlx::test]
    async fn test_concurrent_versions_do_not_collide(pool: PgPool) {
        let repo = std::sync::Arc::new(PgPrompts::new(pool));
        let created = repo.create(&create_request("dave_system", "tone", "v1")).await.unwrap();
        let prompt_id = created.prompt.id;

        let tasks: Vec<_> = (0..5)
            .map(|i| {
                let repo = repo.clone();
                tokio::spawn(async move { repo.create_version(&version_request(prompt_id, &format!("edit {i}"))).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let mut numbers: Vec<i32> = repo
            .versions(prompt_id)
            .await
            .unwrap()
            .iter()
            .map(|v| v.version_number)
            .collect();
        numbers.sort();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5, 6]);
    }

    #[sqlx::test]
    async fn test_rollback_requires_owned_version(pool: PgPool) {
        let repo = PgPrompts::new(pool);
        let tone = repo.create(&create_request("dave_system", "tone", "v1")).await.unwrap();
        let other = repo.create(&create_request("dave_system", "other", "x")).await.unwrap();
        let first_version = tone.current_version.unwrap().id;
        repo.create_version(&version_request(tone.prompt.id, "v2")).await.unwrap();

        // A version belonging to another prompt is rejected
        let foreign_version = other.current_version.unwrap().id;
        assert!(!repo.rollback(tone.prompt.id, foreign_version).await.unwrap());
        assert!(!repo.rollback(tone.prompt.id, uuid::Uuid::new_v4()).await.unwrap());

        assert!(repo.rollback(tone.prompt.id, first_version).await.unwrap());
        let current = repo.get_by_id(tone.prompt.id).await.unwrap().unwrap();
        assert_eq!(current.current_version.unwrap().content, "v1");
        // Rollback does not add a version
        assert_eq!(repo.versions(tone.prompt.id).await.unwrap().len(), 2);
    }

    #[sqlx::test]
    async fn test_list_pages_and_categories(pool: PgPool) {
        let repo = PgPrompts::new(pool.clone());
        repo.create(&create_request("dave_system", "b_prompt", "b")).await.unwrap();
        repo.create(&create_request("dave_system", "a_prompt", "a")).await.unwrap();
        let archived = repo.create(&create_request("nudges", "old", "old")).await.unwrap();
        repo.create(&create_request("nudges", "fresh", "fresh")).await.unwrap();

        sqlx::query("UPDATE admin_prompts SET is_archived = TRUE WHERE id = $1")
            .bind(archived.prompt.id)
            .execute(&pool)
            .await
            .unwrap();

        let filter = PromptListFilter {
            category: None,
            include_archived: false,
            page: 1,
            limit: 2,
        };
        let (first_page, total) = repo.list(&filter).await.unwrap();
        assert_eq!(total, 3);
        let names: Vec<&str> = first_page.iter().map(|p| p.prompt.name.as_str()).collect();
        assert_eq!(names, vec!["a_prompt", "b_prompt"]);
        assert!(first_page.iter().all(|p| p.current_version.is_some()));

        let (second_page, _) = repo.list(&PromptListFilter { page: 2, ..filter.clone() }).await.unwrap();
        assert_eq!(second_page.len(), 1);
        assert_eq!(second_page[0].prompt.name, "fresh");

        let (with_archived, total) = repo
            .list(&PromptListFilter {
                category: Some("nudges".to_string()),
                include_archived: true,
                ..filter.clone()
            })
            .await
            .unwrap();
        assert_eq!((with_archived.len(), total), (2, 2));

        // Pages far past the end are empty rather than an error
        let (beyond, total) = repo.list(&PromptListFilter { page: i64::MAX, ..filter }).await.unwrap();
        assert!(beyond.is_empty());
        assert_eq!(total, 3);

        assert_eq!(
            repo.categories().await.unwrap(),
            vec![
                PromptCategoryCount {
                    category: "dave_system".to_string(),
                    prompt_count: 2,
                },
                PromptCategoryCount {
                    category: "nudges".to_string(),
                    prompt_count: 1,
                },
            ]
        );

        assert_eq!(repo.list_by_category("dave_system").await.unwrap().len(), 2);
        repo.health_check().await.unwrap();
    }
}
