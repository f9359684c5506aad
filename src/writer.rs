//! Dual-store write coordinator.
//!
//! Every incoming document runs the same state machine: dedup check,
//! field validation, embedding, relational upsert, vector upsert. The
//! relational write is the consistency anchor: it always happens before
//! the vector write, and a vector failure never undoes it. The outcome
//! type makes that contract explicit instead of discarding the secondary
//! error.

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};

use crate::context::AppContext;
use crate::error::Result;
use crate::ids;
use crate::models::{Article, RecordKind, Source};

/// Why a document was skipped without touching either store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// A source with the same URL already exists. Callers treat the
    /// document as already ingested.
    Duplicate { existing_id: String },
    /// A required field was absent or empty.
    MissingField(&'static str),
}

/// Terminal state of one document's write.
///
/// Failures of the relational store or (for sources) the embedding
/// gateway are not outcomes; they surface as errors from the write
/// functions and abort the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Skipped(SkipReason),
    /// Both stores hold the document.
    Stored { id: String },
    /// The relational store holds the document; the vector index write
    /// failed and the warning says how.
    PartiallyStored { id: String, warning: String },
}

impl WriteOutcome {
    /// True when the document is durably stored, vector index or not.
    pub fn is_stored(&self) -> bool {
        matches!(
            self,
            WriteOutcome::Stored { .. } | WriteOutcome::PartiallyStored { .. }
        )
    }
}

/// A source document before defaults are applied.
#[derive(Debug, Clone, Default)]
pub struct SourceDraft {
    pub id: Option<String>,
    pub url: String,
    pub title: String,
    pub topic: String,
    pub summary: String,
    pub language: String,
    pub model: String,
    pub created_at: Option<String>,
    pub tags: Vec<String>,
}

/// An article before defaults are applied.
#[derive(Debug, Clone, Default)]
pub struct ArticleDraft {
    pub id: Option<String>,
    pub title: String,
    pub path: String,
    pub author: String,
    pub summary: String,
    pub tags: Vec<String>,
    pub meta: Map<String, Value>,
    pub content: String,
    pub category: String,
}

/// Article body prefix included in the embedding text.
const ARTICLE_BODY_PREFIX_CHARS: usize = 1000;

/// Write a source through both stores.
///
/// The embedding is generated before the relational write, so every
/// stored source has had its embedding attempt; the vector write itself
/// may still fail afterwards, which degrades the outcome to
/// [`WriteOutcome::PartiallyStored`].
pub async fn store_source(ctx: &AppContext, draft: SourceDraft) -> Result<WriteOutcome> {
    if !draft.url.is_empty() {
        if let Some(existing) = ctx.store.get_source_by_url(&draft.url).await? {
            return Ok(WriteOutcome::Skipped(SkipReason::Duplicate {
                existing_id: existing.id,
            }));
        }
    }

    if draft.url.is_empty() {
        return Ok(WriteOutcome::Skipped(SkipReason::MissingField("url")));
    }
    if draft.summary.trim().is_empty() {
        return Ok(WriteOutcome::Skipped(SkipReason::MissingField("summary")));
    }

    let id = draft.id.unwrap_or_else(ids::new_doc_id);
    let created_at = draft
        .created_at
        .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));

    let vector = ctx.embedder.embed(&draft.summary).await?;

    let source = Source {
        id: id.clone(),
        url: draft.url,
        title: draft.title,
        topic: draft.topic,
        summary: draft.summary,
        language: draft.language,
        model: draft.model,
        created_at,
        tags: draft.tags,
    };
    ctx.store.upsert_source(&source).await?;

    let payload = source_payload(&source);
    match ctx
        .vectors
        .upsert(RecordKind::Sources, &source.id, &vector, payload)
        .await
    {
        Ok(()) => Ok(WriteOutcome::Stored { id }),
        Err(e) => Ok(WriteOutcome::PartiallyStored {
            id,
            warning: e.to_string(),
        }),
    }
}

/// Write an article through the relational store and, optionally, the
/// vector index.
///
/// Articles are replaced by path: an existing row at the same path keeps
/// its id across re-index runs. Embeddings are optional for this path;
/// when enabled, an embedding or vector failure degrades the outcome to
/// [`WriteOutcome::PartiallyStored`] since the relational write has
/// already committed.
pub async fn store_article(
    ctx: &AppContext,
    draft: ArticleDraft,
    with_embeddings: bool,
) -> Result<WriteOutcome> {
    if draft.path.is_empty() {
        return Ok(WriteOutcome::Skipped(SkipReason::MissingField("path")));
    }

    let id = match draft.id.clone() {
        Some(id) => id,
        None => match ctx.store.get_article_id_by_path(&draft.path).await? {
            Some(existing) => existing,
            None => ids::new_doc_id(),
        },
    };

    let article = Article {
        id: id.clone(),
        title: draft.title,
        path: draft.path,
        author: draft.author,
        summary: draft.summary,
        tags: draft.tags,
        meta: draft.meta,
        content: draft.content,
    };
    ctx.store.upsert_article(&article).await?;

    if !with_embeddings {
        return Ok(WriteOutcome::Stored { id });
    }

    let text = article_embedding_text(&article);
    let vector = match ctx.embedder.embed(&text).await {
        Ok(v) => v,
        Err(e) => {
            return Ok(WriteOutcome::PartiallyStored {
                id,
                warning: e.to_string(),
            })
        }
    };

    let payload = article_payload(&article, &draft.category);
    match ctx
        .vectors
        .upsert(RecordKind::Articles, &article.id, &vector, payload)
        .await
    {
        Ok(()) => Ok(WriteOutcome::Stored { id }),
        Err(e) => Ok(WriteOutcome::PartiallyStored {
            id,
            warning: e.to_string(),
        }),
    }
}

/// Remove a source from both stores. The relational delete is
/// authoritative; a vector delete failure is returned as a warning.
pub async fn delete_source(ctx: &AppContext, id: &str) -> Result<Option<String>> {
    ctx.store.delete_source(id).await?;

    match ctx.vectors.delete(RecordKind::Sources, id).await {
        Ok(()) => Ok(None),
        Err(e) => Ok(Some(e.to_string())),
    }
}

/// Title, summary, and a bounded body prefix, the text a source's
/// article counterpart is embedded from.
fn article_embedding_text(article: &Article) -> String {
    let mut text = article.title.clone();
    if !article.summary.is_empty() {
        text.push(' ');
        text.push_str(&article.summary);
    }
    if !article.content.is_empty() {
        text.push(' ');
        text.extend(article.content.chars().take(ARTICLE_BODY_PREFIX_CHARS));
    }
    text
}

fn source_payload(source: &Source) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("id".to_string(), json!(source.id));
    payload.insert("url".to_string(), json!(source.url));
    payload.insert("title".to_string(), json!(source.title));
    payload.insert("topic".to_string(), json!(source.topic));
    payload.insert("summary".to_string(), json!(source.summary));
    payload.insert("language".to_string(), json!(source.language));
    payload.insert("model".to_string(), json!(source.model));
    payload.insert("created_at".to_string(), json!(source.created_at));
    payload
}

fn article_payload(article: &Article, category: &str) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("id".to_string(), json!(article.id));
    payload.insert("title".to_string(), json!(article.title));
    payload.insert("path".to_string(), json!(article.path));
    payload.insert("summary".to_string(), json!(article.summary));
    payload.insert("tags".to_string(), json!(article.tags));
    payload.insert("category".to_string(), json!(category));
    payload
}
