//! Repository for knowledge base content. Search itself lives in
//! [`crate::services::knowledge`]; this layer only loads rows.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::instrument;

use crate::db::{
    errors::Result,
    models::knowledge::{Article, ArticleId, Faq, FaqFilter, KnowledgeCategory},
};

const ARTICLE_SELECT: &str = "SELECT a.id, a.title, a.slug, a.excerpt, a.content, a.content_html, a.category_id,
        c.name AS category_name, a.content_type, a.difficulty_level, a.reading_time, a.tags,
        a.is_recovery_focused, a.is_featured, a.view_count, a.helpful_count, a.created_at, a.updated_at
     FROM knowledge_articles a
     LEFT JOIN knowledge_categories c ON c.id = a.category_id";

const FAQ_SELECT: &str = "SELECT f.id, f.question, f.answer, f.category_id, c.name AS category_name,
        f.display_order, f.is_featured, f.is_expert_answer, f.related_article_ids
     FROM knowledge_faqs f
     LEFT JOIN knowledge_categories c ON c.id = f.category_id";

#[async_trait]
pub trait KnowledgeRepository: Send + Sync {
    /// All articles ordered by title.
    async fn articles(&self) -> Result<Vec<Article>>;

    async fn article(&self, id: ArticleId) -> Result<Option<Article>>;

    async fn article_by_slug(&self, slug: &str) -> Result<Option<Article>>;

    async fn increment_view_count(&self, id: ArticleId) -> Result<()>;

    /// FAQs ordered by display order.
    async fn faqs(&self, filter: &FaqFilter) -> Result<Vec<Faq>>;

    async fn all_faqs(&self) -> Result<Vec<Faq>>;

    async fn categories(&self) -> Result<Vec<KnowledgeCategory>>;
}

pub struct PgKnowledge {
    pool: PgPool,
}

impl PgKnowledge {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KnowledgeRepository for PgKnowledge {
    #[instrument(skip(self), err)]
    async fn articles(&self) -> Result<Vec<Article>> {
        let articles = sqlx::query_as::<_, Article>(&format!("{ARTICLE_SELECT} ORDER BY a.title"))
            .fetch_all(&self.pool)
            .await?;
        Ok(articles)
    }

    #[instrument(skip(self), err)]
    async fn article(&self, id: ArticleId) -> Result<Option<Article>> {
        let article = sqlx::query_as::<_, Article>(&format!("{ARTICLE_SELECT} WHERE a.id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(article)
    }

    #[instrument(skip(self), err)]
    async fn article_by_slug(&self, slug: &str) -> Result<Option<Article>> {
        let article = sqlx::query_as::<_, Article>(&format!("{ARTICLE_SELECT} WHERE a.slug = $1"))
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        Ok(article)
    }

    #[instrument(skip(self), err)]
    async fn increment_view_count(&self, id: ArticleId) -> Result<()> {
        sqlx::query("UPDATE knowledge_articles SET view_count = view_count + 1 WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn faqs(&self, filter: &FaqFilter) -> Result<Vec<Faq>> {
        let faqs = sqlx::query_as::<_, Faq>(&format!(
            "{FAQ_SELECT}
             WHERE ($1::uuid IS NULL OR f.category_id = $1) AND (NOT $2 OR f.is_featured)
             ORDER BY f.display_order, f.created_at
             LIMIT $3"
        ))
        .bind(filter.category_id)
        .bind(filter.featured_only)
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(faqs)
    }

    #[instrument(skip(self), err)]
    async fn all_faqs(&self) -> Result<Vec<Faq>> {
        let faqs = sqlx::query_as::<_, Faq>(&format!("{FAQ_SELECT} ORDER BY f.display_order, f.created_at"))
            .fetch_all(&self.pool)
            .await?;
        Ok(faqs)
    }

    #[instrument(skip(self), err)]
    async fn categories(&self) -> Result<Vec<KnowledgeCategory>> {
        let categories = sqlx::query_as::<_, KnowledgeCategory>(
            "SELECT id, name, slug, description, display_order FROM knowledge_categories ORDER BY display_order, name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(categories)
    }
}
