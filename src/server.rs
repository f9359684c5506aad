//! HTTP API server.
//!
//! Exposes the knowledge base over a small JSON API:
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Record counts and content version |
//! | `POST` | `/sources` | Create a source (embeds and dual-writes) |
//! | `GET`  | `/sources` | List sources, optionally by topic |
//! | `GET`  | `/sources/{id}` | Fetch one source |
//! | `DELETE` | `/sources/{id}` | Remove a source from both stores |
//! | `GET`  | `/sources/topic/{topic}` | Browse a topic |
//! | `POST`/`GET` | `/sources/search` | Semantic search (query text or base64 vector) |
//! | `POST`/`GET` | `/articles/search` | Lexical article search |
//!
//! # Error Contract
//!
//! All error responses use one shape:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "url and summary are required" } }
//! ```
//!
//! Codes: `bad_request` (400), `not_found` (404), `storage_error`,
//! `embedding_error`, `vector_index_error`, `internal` (500).

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::context::AppContext;
use crate::error::KbError;
use crate::models::{RecordKind, SearchHit, Source};
use crate::search::{self, SemanticQuery};
use crate::writer::{self, SkipReason, SourceDraft, WriteOutcome};

type SharedContext = Arc<AppContext>;

/// Start the server and block until it exits.
pub async fn run_server(ctx: AppContext) -> anyhow::Result<()> {
    let bind = ctx.config.server.bind.clone();
    let state: SharedContext = Arc::new(ctx);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route(
            "/sources",
            axum::routing::post(handle_create_source).get(handle_list_sources),
        )
        .route(
            "/sources/search",
            axum::routing::post(handle_search_sources_post).get(handle_search_sources_get),
        )
        .route("/sources/topic/{topic}", get(handle_sources_by_topic))
        .route(
            "/sources/{id}",
            get(handle_get_source).delete(handle_delete_source),
        )
        .route(
            "/articles/search",
            axum::routing::post(handle_search_articles_post).get(handle_search_articles_get),
        )
        .layer(cors)
        .with_state(state);

    println!("Knowledge base API listening on http://{}", bind);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<KbError> for AppError {
    fn from(err: KbError) -> Self {
        let (status, code) = match &err {
            KbError::Validation(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            KbError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            KbError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
            KbError::Embedding(_) => (StatusCode::INTERNAL_SERVER_ERROR, "embedding_error"),
            KbError::VectorIndex(_) => (StatusCode::INTERNAL_SERVER_ERROR, "vector_index_error"),
        };
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

// ============ Request / response shapes ============

#[derive(Deserialize)]
struct SourceRequest {
    #[serde(default)]
    id: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    topic: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    language: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    created_at: String,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Deserialize)]
struct SearchRequest {
    /// Text to embed and search with.
    #[serde(default)]
    query: String,
    /// Base64-encoded little-endian f32 vector, as an alternative to `query`.
    #[serde(default)]
    embedding: String,
    #[serde(default)]
    topic: String,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
    #[serde(default)]
    topic: String,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct ListParams {
    #[serde(default)]
    topic: String,
    #[serde(default)]
    limit: Option<i64>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
    count: usize,
}

#[derive(Serialize)]
struct ListResponse {
    sources: Vec<Source>,
    count: usize,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    source_count: i64,
    article_count: i64,
    version: String,
}

#[derive(Serialize)]
struct CreatedResponse {
    id: String,
}

// ============ Handlers ============

async fn handle_health(
    State(ctx): State<SharedContext>,
) -> Result<Json<HealthResponse>, AppError> {
    let source_count = ctx.store.count_sources().await?;
    let article_count = ctx.store.count_articles().await?;
    let version = ctx
        .store
        .get_info("version")
        .await?
        .unwrap_or_else(|| "unknown".to_string());

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        source_count,
        article_count,
        version,
    }))
}

async fn handle_create_source(
    State(ctx): State<SharedContext>,
    Json(req): Json<SourceRequest>,
) -> Result<(StatusCode, Json<CreatedResponse>), AppError> {
    if req.url.is_empty() || req.summary.is_empty() {
        return Err(bad_request("url and summary are required"));
    }

    let draft = SourceDraft {
        id: none_if_empty(req.id),
        url: req.url,
        title: req.title,
        topic: req.topic,
        summary: req.summary,
        language: req.language,
        model: req.model,
        created_at: none_if_empty(req.created_at),
        tags: req.tags,
    };

    match writer::store_source(&ctx, draft).await? {
        WriteOutcome::Stored { id } => Ok((StatusCode::CREATED, Json(CreatedResponse { id }))),
        WriteOutcome::PartiallyStored { id, warning } => {
            // The relational store has the data; losing the vector point
            // does not fail the request.
            eprintln!("Warning: vector index write failed for {}: {}", id, warning);
            Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
        }
        WriteOutcome::Skipped(SkipReason::Duplicate { existing_id }) => {
            Ok((StatusCode::OK, Json(CreatedResponse { id: existing_id })))
        }
        WriteOutcome::Skipped(SkipReason::MissingField(field)) => {
            Err(bad_request(format!("{} is required", field)))
        }
    }
}

async fn handle_get_source(
    State(ctx): State<SharedContext>,
    Path(id): Path<String>,
) -> Result<Json<Source>, AppError> {
    match ctx.store.get_source(&id).await? {
        Some(source) => Ok(Json(source)),
        None => Err(KbError::NotFound("source").into()),
    }
}

async fn handle_delete_source(
    State(ctx): State<SharedContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if let Some(warning) = writer::delete_source(&ctx, &id).await? {
        eprintln!("Warning: vector index delete failed for {}: {}", id, warning);
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_list_sources(
    State(ctx): State<SharedContext>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse>, AppError> {
    let limit = params.limit.filter(|l| *l > 0).unwrap_or(100);
    let sources = ctx.store.list_sources_by_topic(&params.topic, limit).await?;
    let count = sources.len();
    Ok(Json(ListResponse { sources, count }))
}

async fn handle_sources_by_topic(
    State(ctx): State<SharedContext>,
    Path(topic): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse>, AppError> {
    let limit = params.limit.filter(|l| *l > 0).unwrap_or(100);
    let sources = ctx.store.list_sources_by_topic(&topic, limit).await?;
    let count = sources.len();
    Ok(Json(ListResponse { sources, count }))
}

async fn handle_search_sources_post(
    State(ctx): State<SharedContext>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    search_sources(&ctx, req).await
}

async fn handle_search_sources_get(
    State(ctx): State<SharedContext>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, AppError> {
    search_sources(
        &ctx,
        SearchRequest {
            query: params.q,
            embedding: String::new(),
            topic: params.topic,
            limit: params.limit,
        },
    )
    .await
}

async fn search_sources(
    ctx: &AppContext,
    req: SearchRequest,
) -> Result<Json<SearchResponse>, AppError> {
    if req.query.is_empty() && req.embedding.is_empty() {
        return Err(bad_request("query or embedding is required"));
    }

    let query = if req.embedding.is_empty() {
        SemanticQuery::Text(req.query)
    } else {
        SemanticQuery::Vector(search::decode_vector_b64(&req.embedding)?)
    };

    let limit = req.limit.filter(|l| *l > 0).unwrap_or(10);
    let topic = none_if_empty(req.topic);

    let results =
        search::search_semantic(ctx, RecordKind::Sources, query, topic.as_deref(), limit).await?;
    let count = results.len();
    Ok(Json(SearchResponse { results, count }))
}

async fn handle_search_articles_post(
    State(ctx): State<SharedContext>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    search_articles(&ctx, req).await
}

async fn handle_search_articles_get(
    State(ctx): State<SharedContext>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, AppError> {
    search_articles(
        &ctx,
        SearchRequest {
            query: params.q,
            embedding: String::new(),
            topic: String::new(),
            limit: params.limit,
        },
    )
    .await
}

async fn search_articles(
    ctx: &AppContext,
    req: SearchRequest,
) -> Result<Json<SearchResponse>, AppError> {
    if req.query.is_empty() {
        return Err(bad_request("query is required"));
    }

    let limit = req.limit.filter(|l| *l > 0).unwrap_or(10) as i64;
    let results = search::search_lexical(ctx, RecordKind::Articles, &req.query, limit).await?;
    let count = results.len();
    Ok(Json(SearchResponse { results, count }))
}

fn none_if_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_map_to_status_codes() {
        let cases: Vec<(KbError, StatusCode, &str)> = vec![
            (
                KbError::validation("bad"),
                StatusCode::BAD_REQUEST,
                "bad_request",
            ),
            (KbError::NotFound("source"), StatusCode::NOT_FOUND, "not_found"),
            (
                KbError::Embedding("down".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "embedding_error",
            ),
            (
                KbError::VectorIndex("down".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "vector_index_error",
            ),
        ];

        for (err, status, code) in cases {
            let app_err: AppError = err.into();
            assert_eq!(app_err.status, status);
            assert_eq!(app_err.code, code);
        }
    }
}
