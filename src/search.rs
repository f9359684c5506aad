//! Search fan-out.
//!
//! Routes a query to one of three backends and normalizes everything to
//! [`SearchHit`]:
//!
//! - **lexical**: ranked FTS5 match in the relational store
//! - **semantic**: nearest-neighbor query in the vector store, from
//!   either a query string (embedded on the fly) or a caller-supplied
//!   precomputed vector
//! - **browse**: exact topic filter, served from the relational store
//!
//! Semantic hits are built from vector point payloads, which are not
//! guaranteed complete for externally written points; missing fields
//! degrade to empty strings.

use base64::Engine;

use crate::context::AppContext;
use crate::error::{KbError, Result};
use crate::models::{payload_str, payload_str_list, Article, RecordKind, SearchHit, Source};
use crate::vectordb::ScoredPoint;

/// Input to a semantic search: free text or a precomputed vector.
#[derive(Debug, Clone)]
pub enum SemanticQuery {
    Text(String),
    Vector(Vec<f32>),
}

/// Ranked keyword search against the relational store's text index.
pub async fn search_lexical(
    ctx: &AppContext,
    kind: RecordKind,
    query: &str,
    limit: i64,
) -> Result<Vec<SearchHit>> {
    if query.trim().is_empty() {
        return Err(KbError::validation("query must not be empty"));
    }

    match kind {
        RecordKind::Sources => {
            let sources = ctx.store.search_sources(query, limit).await?;
            Ok(sources.iter().map(source_hit).collect())
        }
        RecordKind::Articles => {
            let articles = ctx.store.search_articles(query, limit).await?;
            Ok(articles.iter().map(article_hit).collect())
        }
    }
}

/// Nearest-neighbor search against the vector store, optionally narrowed
/// by a categorical filter (`topic` for sources, `category` for articles).
pub async fn search_semantic(
    ctx: &AppContext,
    kind: RecordKind,
    query: SemanticQuery,
    filter_value: Option<&str>,
    limit: usize,
) -> Result<Vec<SearchHit>> {
    let vector = match query {
        SemanticQuery::Text(text) => {
            if text.trim().is_empty() {
                return Err(KbError::validation("query must not be empty"));
            }
            ctx.embedder.embed(&text).await?
        }
        SemanticQuery::Vector(v) => {
            if v.len() != ctx.embedder.dims() {
                return Err(KbError::Validation(format!(
                    "embedding has {} dimensions, expected {}",
                    v.len(),
                    ctx.embedder.dims()
                )));
            }
            v
        }
    };

    let filter_field = match kind {
        RecordKind::Sources => "topic",
        RecordKind::Articles => "category",
    };
    let filter = filter_value
        .filter(|v| !v.is_empty())
        .map(|v| (filter_field, v));

    let points = ctx.vectors.query(kind, &vector, limit, filter).await?;
    Ok(points.iter().map(point_hit).collect())
}

/// Browse sources by exact topic, no query text involved.
///
/// The vector store's filtered scroll could serve this too; the
/// relational store is used because it is the consistency anchor.
pub async fn browse_topic(ctx: &AppContext, topic: &str, limit: i64) -> Result<Vec<SearchHit>> {
    let sources = ctx.store.list_sources_by_topic(topic, limit).await?;
    Ok(sources.iter().map(source_hit).collect())
}

/// Decode a base64-encoded little-endian float32 vector.
///
/// Rejects bad base64 and byte lengths that are not a multiple of four
/// before any store is contacted.
pub fn decode_vector_b64(encoded: &str) -> Result<Vec<f32>> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| KbError::Validation(format!("invalid embedding encoding: {}", e)))?;

    if bytes.len() % 4 != 0 {
        return Err(KbError::Validation(format!(
            "invalid embedding length: {} bytes is not a whole number of f32s",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

fn source_hit(src: &Source) -> SearchHit {
    SearchHit {
        id: src.id.clone(),
        score: None,
        url: src.url.clone(),
        title: src.title.clone(),
        topic: src.topic.clone(),
        summary: src.summary.clone(),
        tags: src.tags.clone(),
        language: src.language.clone(),
        model: src.model.clone(),
        created_at: src.created_at.clone(),
    }
}

fn article_hit(art: &Article) -> SearchHit {
    SearchHit {
        id: art.id.clone(),
        score: None,
        title: art.title.clone(),
        summary: art.summary.clone(),
        tags: art.tags.clone(),
        ..Default::default()
    }
}

fn point_hit(point: &ScoredPoint) -> SearchHit {
    // Prefer the document id recorded in the payload; the point id is the
    // UUID-mapped form.
    let payload_id = payload_str(&point.payload, "id");
    let id = if payload_id.is_empty() {
        point.id.clone()
    } else {
        payload_id
    };

    SearchHit {
        id,
        score: Some(point.score),
        url: payload_str(&point.payload, "url"),
        title: payload_str(&point.payload, "title"),
        topic: payload_str(&point.payload, "topic"),
        summary: payload_str(&point.payload, "summary"),
        tags: payload_str_list(&point.payload, "tags"),
        language: payload_str(&point.payload, "language"),
        model: payload_str(&point.payload, "model"),
        created_at: payload_str(&point.payload, "created_at"),
    }
}
