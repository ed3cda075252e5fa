//! Knowledge base search.
//!
//! Three strategies are offered:
//!
//! - **Full-text**: keyword matching. Articles score the share of distinct query words found
//!   in their title. FAQs score 2 per query word in the question and 1 per word in the answer,
//!   normalised by three times the word count.
//! - **Semantic**: cosine similarity between the query embedding and document embeddings,
//!   mapped from `[-1, 1]` onto `[0, 1]`. Document embeddings are computed on first use and
//!   kept for the life of the process.
//! - **Hybrid**: union of both. A document found by both gets
//!   `0.65 * semantic + 0.35 * full-text`.

use std::{collections::HashMap, sync::Arc};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{error, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{excerpt, truncate_chars};
use crate::{
    db::{
        errors::Result,
        handlers::KnowledgeRepository,
        models::knowledge::{Article, Faq},
    },
    gemini::{EmbeddingTask, LanguageModel},
};

pub const SEMANTIC_WEIGHT: f64 = 0.65;
pub const FULLTEXT_WEIGHT: f64 = 0.35;

const EXCERPT_CHARS: usize = 200;
const EMBEDDING_TEXT_CHARS: usize = 2000;
const RECOVERY_KEYWORDS: [&str; 5] = ["recovery", "wellness", "workplace", "support", "journey"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    #[default]
    Hybrid,
    Semantic,
    Fulltext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Article,
    Faq,
}

impl ResultKind {
    fn as_str(&self) -> &'static str {
        match self {
            ResultKind::Article => "article",
            ResultKind::Faq => "faq",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    Semantic,
    Fulltext,
    Both,
}

/// A scored search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: Uuid,
    pub kind: ResultKind,
    pub title: String,
    pub excerpt: Option<String>,
    pub content: Option<String>,
    pub category_id: Option<Uuid>,
    pub url: String,
    pub score: f64,
    pub source: ResultSource,
}

impl SearchHit {
    fn key(&self) -> String {
        format!("{}:{}", self.kind.as_str(), self.id)
    }
}

/// Filters applied to article full-text search.
#[derive(Debug, Clone, Default)]
pub struct ArticleFilter {
    /// Category id or name
    pub category: Option<String>,
    pub recovery_focused: Option<bool>,
}

pub fn article_url(article: &Article) -> String {
    format!("/knowledge-base/articles/{}", article.slug)
}

pub fn faq_url(faq: &Faq) -> String {
    format!("/knowledge-base/faq#{}", faq.id)
}

fn faq_excerpt(faq: &Faq) -> String {
    excerpt(&faq.answer, EXCERPT_CHARS)
}

/// Whether an article is aimed at readers in recovery.
pub fn is_recovery_article(article: &Article) -> bool {
    let title = article.title.to_lowercase();
    article.is_recovery_focused || RECOVERY_KEYWORDS.iter().any(|k| title.contains(k))
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
    let norm_a = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|y| f64::from(*y).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn normalize_similarity(score: f64) -> f64 {
    ((score + 1.0) / 2.0).clamp(0.0, 1.0)
}

fn sort_by_score(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
}

/// Document prepared for embedding.
struct SemanticDocument {
    hit: SearchHit,
    text: String,
}

pub struct KnowledgeSearch {
    repo: Arc<dyn KnowledgeRepository>,
    llm: Arc<dyn LanguageModel>,
    embeddings: DashMap<String, Vec<f32>>,
}

impl KnowledgeSearch {
    pub fn new(repo: Arc<dyn KnowledgeRepository>, llm: Arc<dyn LanguageModel>) -> Self {
        Self {
            repo,
            llm,
            embeddings: DashMap::new(),
        }
    }

    pub fn repository(&self) -> &Arc<dyn KnowledgeRepository> {
        &self.repo
    }

    #[instrument(skip(self, filter), err)]
    pub async fn search_articles_fulltext(&self, query: &str, filter: &ArticleFilter, limit: usize) -> Result<Vec<SearchHit>> {
        let lowered = query.to_lowercase();
        let mut words: Vec<&str> = lowered.split_whitespace().collect();
        words.sort_unstable();
        words.dedup();
        if words.is_empty() {
            return Ok(Vec::new());
        }

        let articles = self.repo.articles().await?;
        let mut hits: Vec<SearchHit> = articles
            .iter()
            .filter(|a| {
                filter.category.as_deref().is_none_or(|c| {
                    a.category_id.is_some_and(|id| id.to_string() == c)
                        || a.category_name.as_deref().is_some_and(|name| name.eq_ignore_ascii_case(c))
                })
            })
            .filter(|a| filter.recovery_focused.is_none_or(|r| a.is_recovery_focused == r))
            .filter_map(|article| {
                let title = article.title.to_lowercase();
                let matches = words.iter().filter(|w| title.contains(*w)).count();
                (matches > 0).then(|| SearchHit {
                    id: article.id,
                    kind: ResultKind::Article,
                    title: article.title.clone(),
                    excerpt: Some(
                        article
                            .excerpt
                            .clone()
                            .unwrap_or_else(|| format!("Career guidance article: {}", article.title)),
                    ),
                    content: Some(article.content.clone()),
                    category_id: article.category_id,
                    url: article_url(article),
                    score: matches as f64 / words.len() as f64,
                    source: ResultSource::Fulltext,
                })
            })
            .collect();

        sort_by_score(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    #[instrument(skip(self), err)]
    pub async fn search_faqs_fulltext(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let lowered = query.to_lowercase();
        let words: Vec<&str> = lowered.split_whitespace().collect();
        if words.is_empty() {
            return Ok(Vec::new());
        }

        let faqs = self.repo.all_faqs().await?;
        let mut hits: Vec<SearchHit> = faqs
            .iter()
            .filter_map(|faq| {
                let question = faq.question.to_lowercase();
                let answer = faq.answer.to_lowercase();
                let score: usize = words
                    .iter()
                    .map(|w| 2 * usize::from(question.contains(w)) + usize::from(answer.contains(w)))
                    .sum();

                (score > 0).then(|| SearchHit {
                    id: faq.id,
                    kind: ResultKind::Faq,
                    title: faq.question.clone(),
                    excerpt: Some(faq_excerpt(faq)),
                    content: Some(faq.answer.clone()),
                    category_id: faq.category_id,
                    url: faq_url(faq),
                    score: score as f64 / (words.len() * 3) as f64,
                    source: ResultSource::Fulltext,
                })
            })
            .collect();

        sort_by_score(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn semantic_documents(&self) -> Result<Vec<SemanticDocument>> {
        let mut documents = Vec::new();

        for article in self.repo.articles().await? {
            let content = truncate_chars(&article.content, EMBEDDING_TEXT_CHARS);
            let excerpt = if content.is_empty() {
                format!("Career guidance article: {}", article.title)
            } else {
                format!("{}...", truncate_chars(content, EXCERPT_CHARS))
            };
            documents.push(SemanticDocument {
                text: format!("{}\n{}", article.title, content).trim().to_string(),
                hit: SearchHit {
                    id: article.id,
                    kind: ResultKind::Article,
                    title: article.title.clone(),
                    excerpt: Some(excerpt),
                    content: Some(article.content.clone()),
                    category_id: article.category_id,
                    url: article_url(&article),
                    score: 0.0,
                    source: ResultSource::Semantic,
                },
            });
        }

        match self.repo.all_faqs().await {
            Ok(faqs) => {
                for faq in faqs {
                    documents.push(SemanticDocument {
                        text: format!("FAQ: {}\n{}", faq.question, faq.answer).trim().to_string(),
                        hit: SearchHit {
                            id: faq.id,
                            kind: ResultKind::Faq,
                            title: faq.question.clone(),
                            excerpt: Some(faq_excerpt(&faq)),
                            content: Some(faq.answer.clone()),
                            category_id: faq.category_id,
                            url: faq_url(&faq),
                            score: 0.0,
                            source: ResultSource::Semantic,
                        },
                    });
                }
            }
            Err(e) => error!("Error loading FAQs for semantic search: {}", e),
        }

        Ok(documents)
    }

    async fn ensure_embeddings(&self, documents: &[SemanticDocument]) {
        for document in documents {
            let key = document.hit.key();
            if self.embeddings.contains_key(&key) || document.text.is_empty() {
                continue;
            }
            match self.llm.embed(&document.text, EmbeddingTask::RetrievalDocument).await {
                Ok(embedding) => {
                    self.embeddings.insert(key, embedding);
                }
                Err(e) => error!("Error generating embedding for {}: {}", key, e),
            }
        }
    }

    /// Semantic search. Failures are logged and yield no results.
    #[instrument(skip(self))]
    pub async fn search_semantic(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        let documents = match self.semantic_documents().await {
            Ok(documents) if !documents.is_empty() => documents,
            Ok(_) => return Vec::new(),
            Err(e) => {
                error!("Error in semantic search: {}", e);
                return Vec::new();
            }
        };

        self.ensure_embeddings(&documents).await;

        let query_embedding = match self.llm.embed(query, EmbeddingTask::RetrievalQuery).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!("Error in semantic search: {}", e);
                return Vec::new();
            }
        };

        let mut hits: Vec<SearchHit> = documents
            .into_iter()
            .filter_map(|document| {
                let embedding = self.embeddings.get(&document.hit.key())?;
                let score = normalize_similarity(cosine_similarity(&query_embedding, &embedding));
                (score > 0.0).then(|| SearchHit { score, ..document.hit })
            })
            .collect();

        sort_by_score(&mut hits);
        hits.truncate(limit);
        hits
    }

    /// Articles and FAQs by keyword, each labelled with its full-text score.
    pub async fn search_fulltext(&self, query: &str, filter: &ArticleFilter, limit: usize) -> Result<Vec<SearchHit>> {
        let mut hits = self.search_articles_fulltext(query, filter, limit).await?;
        hits.extend(self.search_faqs_fulltext(query, limit.min(5)).await?);
        sort_by_score(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    #[instrument(skip(self, filter), err)]
    pub async fn search_hybrid(&self, query: &str, filter: &ArticleFilter, limit: usize) -> Result<Vec<SearchHit>> {
        let semantic = self.search_semantic(query, (limit * 2).max(10)).await;
        let articles = self.search_articles_fulltext(query, filter, limit).await?;
        let faqs = self.search_faqs_fulltext(query, limit.min(5)).await?;

        let mut combined: Vec<SearchHit> = Vec::with_capacity(semantic.len() + articles.len() + faqs.len());
        let mut index: HashMap<String, usize> = HashMap::new();

        for hit in semantic {
            index.insert(hit.key(), combined.len());
            combined.push(hit);
        }

        for hit in articles.into_iter().chain(faqs) {
            match index.get(&hit.key()) {
                Some(&i) => {
                    let existing = &mut combined[i];
                    existing.score = SEMANTIC_WEIGHT * existing.score + FULLTEXT_WEIGHT * hit.score;
                    existing.source = ResultSource::Both;
                    if existing.excerpt.is_none() {
                        existing.excerpt = hit.excerpt;
                    }
                    if existing.url.is_empty() {
                        existing.url = hit.url;
                    }
                }
                None => {
                    index.insert(hit.key(), combined.len());
                    combined.push(hit);
                }
            }
        }

        sort_by_score(&mut combined);
        combined.truncate(limit);
        Ok(combined)
    }

    pub async fn search(&self, query: &str, search_type: SearchType, filter: &ArticleFilter, limit: usize) -> Result<Vec<SearchHit>> {
        match search_type {
            SearchType::Semantic => Ok(self.search_semantic(query, limit).await),
            SearchType::Fulltext => self.search_fulltext(query, filter, limit).await,
            SearchType::Hybrid => self.search_hybrid(query, filter, limit).await,
        }
    }

    pub async fn recovery_articles(&self, limit: usize) -> Result<Vec<Article>> {
        let articles = self.repo.articles().await?;
        Ok(articles.into_iter().filter(is_recovery_article).take(limit).collect())
    }
}
