//! Vector store adapter (Qdrant REST API).
//!
//! Maintains two fixed-dimension cosine collections, `sources` and
//! `articles`, created lazily at startup. Point ids must be UUID-shaped,
//! so every document id passes through [`crate::ids::to_vector_id`] on
//! the way in; ids the mapper cannot convert are sent as-is and rejected
//! by the store itself.
//!
//! This index is a best-effort accelerator: callers decide whether a
//! failure here is fatal, and on the write path it never is.

use serde_json::{json, Map, Value};
use std::time::Duration;

use crate::config::VectorConfig;
use crate::error::{KbError, Result};
use crate::ids;
use crate::models::RecordKind;

/// Score reported for filtered scrolls, where no query vector exists.
pub const SCROLL_SCORE: f32 = 1.0;

pub struct VectorClient {
    base_url: String,
    dims: usize,
    http: reqwest::Client,
}

/// One point returned by a nearest-neighbor query or a filtered scroll.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: Map<String, Value>,
}

impl VectorClient {
    pub fn new(config: &VectorConfig, dims: usize) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| KbError::VectorIndex(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            dims,
            http,
        })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Create the `sources` and `articles` collections if absent.
    /// Idempotent; called on every process start.
    pub async fn ensure_collections(&self) -> Result<()> {
        for kind in [RecordKind::Sources, RecordKind::Articles] {
            let name = kind.as_str();
            if !self.collection_exists(name).await? {
                self.create_collection(name).await?;
            }
        }
        Ok(())
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        let url = format!("{}/collections/{}", self.base_url, name);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| transport_error(&self.base_url, e))?;

        let status = resp.status();
        if status.is_success() {
            Ok(true)
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Ok(false)
        } else {
            Err(status_error("check collection", name, status, resp).await)
        }
    }

    async fn create_collection(&self, name: &str) -> Result<()> {
        let url = format!("{}/collections/{}", self.base_url, name);
        let body = json!({
            "vectors": {
                "size": self.dims,
                "distance": "Cosine",
            }
        });

        let resp = self
            .http
            .put(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(&self.base_url, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(status_error("create collection", name, status, resp).await);
        }
        Ok(())
    }

    /// Write (or replace) a single point under the mapped id.
    pub async fn upsert(
        &self,
        kind: RecordKind,
        id: &str,
        vector: &[f32],
        payload: Map<String, Value>,
    ) -> Result<()> {
        self.check_dims(vector)?;

        let url = format!(
            "{}/collections/{}/points?wait=true",
            self.base_url,
            kind.as_str()
        );
        let body = json!({
            "points": [{
                "id": ids::to_vector_id(id),
                "vector": vector,
                "payload": payload,
            }]
        });

        let resp = self
            .http
            .put(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(&self.base_url, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(status_error("upsert point", kind.as_str(), status, resp).await);
        }
        Ok(())
    }

    /// Nearest-neighbor query, best-first, optionally narrowed by a
    /// single-field equality filter applied before ranking.
    pub async fn query(
        &self,
        kind: RecordKind,
        vector: &[f32],
        limit: usize,
        filter: Option<(&str, &str)>,
    ) -> Result<Vec<ScoredPoint>> {
        self.check_dims(vector)?;

        let url = format!(
            "{}/collections/{}/points/search",
            self.base_url,
            kind.as_str()
        );
        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });
        if let Some((field, value)) = filter {
            body["filter"] = equality_filter(field, value);
        }

        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(&self.base_url, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(status_error("search", kind.as_str(), status, resp).await);
        }

        let parsed: Value = resp
            .json()
            .await
            .map_err(|e| KbError::VectorIndex(format!("malformed search response: {}", e)))?;

        let points = parsed
            .get("result")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                KbError::VectorIndex("malformed search response: missing result".to_string())
            })?;

        Ok(points.iter().map(scored_point_from_json).collect())
    }

    /// Fetch up to `limit` points matching an equality filter, with no
    /// similarity ranking. Used for category browsing when there is no
    /// query vector; every hit reports [`SCROLL_SCORE`].
    pub async fn scroll_by_filter(
        &self,
        kind: RecordKind,
        field: &str,
        value: &str,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let url = format!(
            "{}/collections/{}/points/scroll",
            self.base_url,
            kind.as_str()
        );
        let body = json!({
            "filter": equality_filter(field, value),
            "limit": limit,
            "with_payload": true,
        });

        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(&self.base_url, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(status_error("scroll", kind.as_str(), status, resp).await);
        }

        let parsed: Value = resp
            .json()
            .await
            .map_err(|e| KbError::VectorIndex(format!("malformed scroll response: {}", e)))?;

        let points = parsed
            .get("result")
            .and_then(|r| r.get("points"))
            .and_then(Value::as_array)
            .ok_or_else(|| {
                KbError::VectorIndex("malformed scroll response: missing points".to_string())
            })?;

        Ok(points.iter().map(scored_point_from_json).collect())
    }

    /// Remove a point by mapped id. A missing point is not an error.
    pub async fn delete(&self, kind: RecordKind, id: &str) -> Result<()> {
        let url = format!(
            "{}/collections/{}/points/delete?wait=true",
            self.base_url,
            kind.as_str()
        );
        let body = json!({ "points": [ids::to_vector_id(id)] });

        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(&self.base_url, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(status_error("delete point", kind.as_str(), status, resp).await);
        }
        Ok(())
    }

    /// Dimension and metric are fixed at collection creation; a mismatched
    /// vector must fail here rather than be truncated or padded downstream.
    fn check_dims(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dims {
            return Err(KbError::VectorIndex(format!(
                "vector dimension mismatch: got {}, collection expects {}",
                vector.len(),
                self.dims
            )));
        }
        Ok(())
    }
}

fn equality_filter(field: &str, value: &str) -> Value {
    json!({
        "must": [{
            "key": field,
            "match": { "value": value },
        }]
    })
}

fn scored_point_from_json(point: &Value) -> ScoredPoint {
    let id = match point.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    let score = point
        .get("score")
        .and_then(Value::as_f64)
        .map(|s| s as f32)
        .unwrap_or(SCROLL_SCORE);
    let payload = point
        .get("payload")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    ScoredPoint { id, score, payload }
}

fn transport_error(base_url: &str, err: reqwest::Error) -> KbError {
    KbError::VectorIndex(format!(
        "vector store request failed (is Qdrant running at {}?): {}",
        base_url, err
    ))
}

async fn status_error(
    op: &str,
    collection: &str,
    status: reqwest::StatusCode,
    resp: reqwest::Response,
) -> KbError {
    let body = resp.text().await.unwrap_or_default();
    KbError::VectorIndex(format!(
        "{} on '{}' failed ({}): {}",
        op, collection, status, body
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn client_for(server: &MockServer, dims: usize) -> VectorClient {
        VectorClient::new(
            &VectorConfig {
                url: server.base_url(),
                timeout_secs: 5,
            },
            dims,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_ensure_collections_creates_missing_only() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/sources");
                then.status(404);
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(PUT).path("/collections/sources");
                then.status(200).json_body(serde_json::json!({"result": true}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/articles");
                then.status(200).json_body(serde_json::json!({"result": {}}));
            })
            .await;

        let client = client_for(&server, 4);
        client.ensure_collections().await.unwrap();
        create.assert_async().await;
    }

    #[tokio::test]
    async fn test_upsert_maps_doc_id_to_uuid() {
        let server = MockServer::start_async().await;
        let doc_id = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
        let mapped = crate::ids::to_vector_id(doc_id);

        let mut payload = Map::new();
        payload.insert("id".to_string(), serde_json::json!(doc_id));

        let upsert = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/sources/points")
                    .query_param("wait", "true")
                    .json_body(serde_json::json!({
                        "points": [{
                            "id": mapped,
                            "vector": [1.0, 0.0, 0.0, 0.0],
                            "payload": { "id": doc_id },
                        }]
                    }));
                then.status(200).json_body(serde_json::json!({"result": {}}));
            })
            .await;

        let client = client_for(&server, 4);
        client
            .upsert(RecordKind::Sources, doc_id, &[1.0, 0.0, 0.0, 0.0], payload)
            .await
            .unwrap();
        upsert.assert_async().await;
    }

    #[tokio::test]
    async fn test_wrong_dimension_fails_without_store_call() {
        let server = MockServer::start_async().await;
        let client = client_for(&server, 4);

        let err = client
            .upsert(RecordKind::Sources, "x", &[1.0, 2.0], Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, KbError::VectorIndex(_)));

        let err = client
            .query(RecordKind::Sources, &[1.0, 2.0], 5, None)
            .await
            .unwrap_err();
        assert!(matches!(err, KbError::VectorIndex(_)));
    }

    #[tokio::test]
    async fn test_query_parses_scored_points() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/sources/points/search");
                then.status(200).json_body(serde_json::json!({
                    "result": [
                        {"id": "0163306c-7adc-d34c-62c4-7bdef629bacb", "score": 0.92,
                         "payload": {"title": "Entanglement", "topic": "quantum-mechanics"}},
                        {"id": "0163306c-7adc-d34c-62c4-7bdef629bacc", "score": 0.61,
                         "payload": {}},
                    ]
                }));
            })
            .await;

        let client = client_for(&server, 4);
        let hits = client
            .query(RecordKind::Sources, &[1.0, 0.0, 0.0, 0.0], 5, Some(("topic", "quantum-mechanics")))
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert!(hits[0].score >= hits[1].score);
        assert_eq!(
            hits[0].payload.get("title").and_then(Value::as_str),
            Some("Entanglement")
        );
    }

    #[tokio::test]
    async fn test_scroll_reports_sentinel_score() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/sources/points/scroll");
                then.status(200).json_body(serde_json::json!({
                    "result": {
                        "points": [
                            {"id": "0163306c-7adc-d34c-62c4-7bdef629bacb",
                             "payload": {"topic": "relativity"}}
                        ],
                        "next_page_offset": null
                    }
                }));
            })
            .await;

        let client = client_for(&server, 4);
        let hits = client
            .scroll_by_filter(RecordKind::Sources, "topic", "relativity", 10)
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].score, SCROLL_SCORE);
    }

    #[tokio::test]
    async fn test_delete_sends_mapped_id() {
        let server = MockServer::start_async().await;
        let doc_id = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
        let mapped = crate::ids::to_vector_id(doc_id);

        let delete = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/sources/points/delete")
                    .json_body(serde_json::json!({"points": [mapped]}));
                then.status(200).json_body(serde_json::json!({"result": {}}));
            })
            .await;

        let client = client_for(&server, 4);
        client.delete(RecordKind::Sources, doc_id).await.unwrap();
        delete.assert_async().await;
    }

    #[tokio::test]
    async fn test_unreachable_store_is_vector_index_error() {
        let client = VectorClient::new(
            &VectorConfig {
                url: "http://127.0.0.1:1".to_string(),
                timeout_secs: 1,
            },
            4,
        )
        .unwrap();

        let err = client
            .query(RecordKind::Sources, &[0.0; 4], 5, None)
            .await
            .unwrap_err();
        assert!(matches!(err, KbError::VectorIndex(_)));
    }
}
