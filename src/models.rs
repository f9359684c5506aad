//! Core record types shared by the stores, the write path, and the API.
//!
//! `Source` and `Article` are the two persisted record kinds; `SearchHit`
//! is the read-only projection every search mode normalizes into.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An external document: a URL plus the human summary that gets embedded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub url: String,
    pub title: String,
    pub topic: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub language: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// An internally authored document, keyed by its storage path.
///
/// `meta` is the open-ended front-matter capture: any header key the
/// indexer does not recognize lands here unchanged. `content` is the full
/// body text; it only feeds the full-text shadow row and is not read back.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub author: String,
    pub summary: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
}

/// One ranked result, constructed fresh per query and never persisted.
///
/// `score` is cosine similarity in [-1, 1] for semantic hits and absent
/// for lexical hits. Payload-derived fields degrade to empty strings when
/// a vector point was written without them.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchHit {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub url: String,
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub topic: String,
    pub summary: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub language: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub created_at: String,
}

/// The two record kinds the stores distinguish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Sources,
    Articles,
}

impl RecordKind {
    /// Collection / table family name, shared by both stores.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Sources => "sources",
            RecordKind::Articles => "articles",
        }
    }
}

/// Fetch a string field from a vector point payload, degrading to empty
/// when the field is missing or not a string.
pub fn payload_str(payload: &Map<String, Value>, key: &str) -> String {
    payload
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Fetch a string-list field from a vector point payload.
pub fn payload_str_list(payload: &Map<String, Value>, key: &str) -> Vec<String> {
    payload
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_str_degrades_gracefully() {
        let mut payload = Map::new();
        payload.insert("title".to_string(), json!("Quantum basics"));
        payload.insert("count".to_string(), json!(3));

        assert_eq!(payload_str(&payload, "title"), "Quantum basics");
        assert_eq!(payload_str(&payload, "missing"), "");
        assert_eq!(payload_str(&payload, "count"), "");
    }

    #[test]
    fn test_payload_str_list() {
        let mut payload = Map::new();
        payload.insert("tags".to_string(), json!(["physics", "intro"]));

        assert_eq!(payload_str_list(&payload, "tags"), vec!["physics", "intro"]);
        assert!(payload_str_list(&payload, "missing").is_empty());
    }
}
