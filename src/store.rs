//! SQLite store: the durable source of truth for sources and articles.
//!
//! Each record family has a main table and an FTS5 shadow table keyed by
//! the same id. The pair is always written inside one transaction, so a
//! record is either fully indexed for lexical search or not stored at all.
//! A small `db_info` key-value table carries process metadata such as the
//! content version.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;

use crate::error::{KbError, Result};
use crate::models::{Article, Source};

pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (or create) the database at `path` and apply the schema.
    /// Safe to call on every process start.
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| KbError::Storage(sqlx::Error::Io(e)))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.apply_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn apply_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                id TEXT PRIMARY KEY,
                url TEXT UNIQUE,
                title TEXT,
                topic TEXT,
                summary TEXT,
                language TEXT,
                model TEXT,
                created_at TEXT,
                tags TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id TEXT PRIMARY KEY,
                title TEXT,
                path TEXT UNIQUE,
                author TEXT,
                summary TEXT,
                tags TEXT,
                meta_json TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS db_info (
                key TEXT PRIMARY KEY,
                value TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // FTS5 CREATE is not idempotent natively, so check first.
        let source_fts_exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='source_fts'",
        )
        .fetch_one(&self.pool)
        .await?;

        if !source_fts_exists {
            sqlx::query(
                r#"
                CREATE VIRTUAL TABLE source_fts USING fts5(
                    summary,
                    title,
                    topic,
                    id UNINDEXED
                )
                "#,
            )
            .execute(&self.pool)
            .await?;
        }

        let article_fts_exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='article_fts'",
        )
        .fetch_one(&self.pool)
        .await?;

        if !article_fts_exists {
            sqlx::query(
                r#"
                CREATE VIRTUAL TABLE article_fts USING fts5(
                    content,
                    title,
                    summary,
                    tags,
                    id UNINDEXED
                )
                "#,
            )
            .execute(&self.pool)
            .await?;
        }

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sources_topic ON sources(topic)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sources_url ON sources(url)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_articles_path ON articles(path)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Insert or replace a source and its full-text shadow row as one unit.
    pub async fn upsert_source(&self, src: &Source) -> Result<()> {
        let tags_json = serde_json::to_string(&src.tags).unwrap_or_else(|_| "[]".to_string());

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO sources (id, url, title, topic, summary, language, model, created_at, tags)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&src.id)
        .bind(&src.url)
        .bind(&src.title)
        .bind(&src.topic)
        .bind(&src.summary)
        .bind(&src.language)
        .bind(&src.model)
        .bind(&src.created_at)
        .bind(&tags_json)
        .execute(&mut *tx)
        .await?;

        // FTS5 has no primary key, so replace means delete-then-insert.
        sqlx::query("DELETE FROM source_fts WHERE id = ?")
            .bind(&src.id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO source_fts (id, summary, title, topic) VALUES (?, ?, ?, ?)")
            .bind(&src.id)
            .bind(&src.summary)
            .bind(&src.title)
            .bind(&src.topic)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Insert or replace an article and its full-text shadow row as one unit.
    pub async fn upsert_article(&self, art: &Article) -> Result<()> {
        let tags_json = serde_json::to_string(&art.tags).unwrap_or_else(|_| "[]".to_string());
        let meta_json = serde_json::to_string(&art.meta).unwrap_or_else(|_| "{}".to_string());
        let tags_text = art.tags.join(" ");

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO articles (id, title, path, author, summary, tags, meta_json)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&art.id)
        .bind(&art.title)
        .bind(&art.path)
        .bind(&art.author)
        .bind(&art.summary)
        .bind(&tags_json)
        .bind(&meta_json)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM article_fts WHERE id = ?")
            .bind(&art.id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO article_fts (id, content, title, summary, tags) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&art.id)
        .bind(&art.content)
        .bind(&art.title)
        .bind(&art.summary)
        .bind(&tags_text)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_source(&self, id: &str) -> Result<Option<Source>> {
        let row = sqlx::query(
            "SELECT id, url, title, topic, summary, language, model, created_at, tags FROM sources WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| source_from_row(&r)))
    }

    pub async fn get_source_by_url(&self, url: &str) -> Result<Option<Source>> {
        let row = sqlx::query(
            "SELECT id, url, title, topic, summary, language, model, created_at, tags FROM sources WHERE url = ?",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| source_from_row(&r)))
    }

    pub async fn get_article(&self, id: &str) -> Result<Option<Article>> {
        let row = sqlx::query(
            "SELECT id, title, path, author, summary, tags, meta_json FROM articles WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| article_from_row(&r)))
    }

    /// Id of the article stored at `path`, if any. The ingestion pipelines
    /// use this to keep re-indexing idempotent: an existing row keeps its id.
    pub async fn get_article_id_by_path(&self, path: &str) -> Result<Option<String>> {
        let id: Option<String> = sqlx::query_scalar("SELECT id FROM articles WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    /// Ranked full-text search over source summaries, titles, and topics.
    ///
    /// Malformed FTS5 query syntax is the caller's fault and reported as a
    /// validation error, not a storage error.
    pub async fn search_sources(&self, query: &str, limit: i64) -> Result<Vec<Source>> {
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.url, s.title, s.topic, s.summary, s.language, s.model, s.created_at, s.tags
            FROM sources s
            JOIN source_fts f ON s.id = f.id
            WHERE source_fts MATCH ?
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(query)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(classify_match_error)?;

        Ok(rows.iter().map(source_from_row).collect())
    }

    /// Ranked full-text search over article bodies, titles, summaries, and tags.
    pub async fn search_articles(&self, query: &str, limit: i64) -> Result<Vec<Article>> {
        let rows = sqlx::query(
            r#"
            SELECT a.id, a.title, a.path, a.author, a.summary, a.tags, a.meta_json
            FROM articles a
            JOIN article_fts f ON a.id = f.id
            WHERE article_fts MATCH ?
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(query)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(classify_match_error)?;

        Ok(rows.iter().map(article_from_row).collect())
    }

    /// Sources with an exact topic match; all sources when `topic` is empty.
    pub async fn list_sources_by_topic(&self, topic: &str, limit: i64) -> Result<Vec<Source>> {
        let rows = if topic.is_empty() {
            sqlx::query(
                "SELECT id, url, title, topic, summary, language, model, created_at, tags FROM sources LIMIT ?",
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                "SELECT id, url, title, topic, summary, language, model, created_at, tags FROM sources WHERE topic = ? LIMIT ?",
            )
            .bind(topic)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        };

        Ok(rows.iter().map(source_from_row).collect())
    }

    /// Remove a source and its shadow row. Deleting an unknown id succeeds.
    pub async fn delete_source(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM sources WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM source_fts WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn count_sources(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sources")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn count_articles(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM articles")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn set_info(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO db_info (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_info(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM db_info WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }
}

fn source_from_row(row: &SqliteRow) -> Source {
    let tags_json: String = row.get("tags");
    Source {
        id: row.get("id"),
        url: row.get("url"),
        title: row.get("title"),
        topic: row.get("topic"),
        summary: row.get("summary"),
        language: row.get("language"),
        model: row.get("model"),
        created_at: row.get("created_at"),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
    }
}

fn article_from_row(row: &SqliteRow) -> Article {
    let tags_json: String = row.get("tags");
    let meta_json: String = row.get("meta_json");
    Article {
        id: row.get("id"),
        title: row.get("title"),
        path: row.get("path"),
        author: row.get("author"),
        summary: row.get("summary"),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        meta: serde_json::from_str(&meta_json).unwrap_or_default(),
        content: String::new(),
    }
}

/// FTS5 rejects malformed MATCH expressions with an SQL error; surface
/// those as caller errors and keep everything else a storage error.
fn classify_match_error(err: sqlx::Error) -> KbError {
    if let sqlx::Error::Database(ref db_err) = err {
        let msg = db_err.message();
        if msg.contains("fts5")
            || msg.contains("MATCH")
            || msg.contains("syntax error")
            || msg.contains("unterminated string")
        {
            return KbError::Validation(format!("bad search query: {}", msg));
        }
    }
    KbError::Storage(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_store() -> (TempDir, Store) {
        let tmp = TempDir::new().unwrap();
        let store = Store::connect(&tmp.path().join("kb.sqlite")).await.unwrap();
        (tmp, store)
    }

    fn sample_source(id: &str, url: &str) -> Source {
        Source {
            id: id.to_string(),
            url: url.to_string(),
            title: "Entanglement primer".to_string(),
            topic: "quantum-mechanics".to_string(),
            summary: "quantum entanglement basics".to_string(),
            language: "en".to_string(),
            model: "nomic-embed-text".to_string(),
            created_at: "2026-01-15T10:00:00Z".to_string(),
            tags: vec!["physics".to_string()],
        }
    }

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("kb.sqlite");
        let first = Store::connect(&path).await.unwrap();
        first.close().await;
        Store::connect(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_upsert_and_get_source() {
        let (_tmp, store) = open_store().await;
        let src = sample_source("01ARZ3NDEKTSV4RRFFQ69G5FAV", "https://x.test/a");

        store.upsert_source(&src).await.unwrap();
        let got = store.get_source(&src.id).await.unwrap().unwrap();
        assert_eq!(got.url, "https://x.test/a");
        assert_eq!(got.tags, vec!["physics"]);

        let by_url = store.get_source_by_url("https://x.test/a").await.unwrap();
        assert_eq!(by_url.unwrap().id, src.id);
    }

    #[tokio::test]
    async fn test_get_missing_is_none_not_error() {
        let (_tmp, store) = open_store().await;
        assert!(store.get_source("nope").await.unwrap().is_none());
        assert!(store.get_source_by_url("https://nope").await.unwrap().is_none());
        assert!(store.get_article("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_source_idempotent_no_duplicate_shadow_rows() {
        let (_tmp, store) = open_store().await;
        let src = sample_source("01ARZ3NDEKTSV4RRFFQ69G5FAV", "https://x.test/a");

        store.upsert_source(&src).await.unwrap();
        store.upsert_source(&src).await.unwrap();

        assert_eq!(store.count_sources().await.unwrap(), 1);

        let shadow_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM source_fts WHERE id = ?")
            .bind(&src.id)
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(shadow_rows, 1);

        let hits = store.search_sources("entanglement", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_lexical_search_matches_article_body_only_term() {
        let (_tmp, store) = open_store().await;
        let art = Article {
            id: "01BX5ZZKBKACTAV9WEVGEMMVRY".to_string(),
            title: "Gravity".to_string(),
            path: "physics/gravity.md".to_string(),
            summary: "Why things fall".to_string(),
            content: "A body-only term: chromodynamics appears nowhere else.".to_string(),
            ..Default::default()
        };
        store.upsert_article(&art).await.unwrap();

        let hits = store.search_articles("chromodynamics", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, art.id);
    }

    #[tokio::test]
    async fn test_malformed_match_is_validation_error() {
        let (_tmp, store) = open_store().await;
        let err = store.search_sources("(", 10).await.unwrap_err();
        assert!(matches!(err, KbError::Validation(_)), "got: {:?}", err);
    }

    #[tokio::test]
    async fn test_list_by_topic_exact_and_all() {
        let (_tmp, store) = open_store().await;
        let mut a = sample_source("01ARZ3NDEKTSV4RRFFQ69G5FAV", "https://x.test/a");
        a.topic = "quantum-mechanics".to_string();
        let mut b = sample_source("01BX5ZZKBKACTAV9WEVGEMMVRY", "https://x.test/b");
        b.topic = "relativity".to_string();
        store.upsert_source(&a).await.unwrap();
        store.upsert_source(&b).await.unwrap();

        let quantum = store
            .list_sources_by_topic("quantum-mechanics", 100)
            .await
            .unwrap();
        assert_eq!(quantum.len(), 1);
        assert_eq!(quantum[0].id, a.id);

        let all = store.list_sources_by_topic("", 100).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_source_removes_both_rows_and_missing_is_ok() {
        let (_tmp, store) = open_store().await;
        let src = sample_source("01ARZ3NDEKTSV4RRFFQ69G5FAV", "https://x.test/a");
        store.upsert_source(&src).await.unwrap();

        store.delete_source(&src.id).await.unwrap();
        assert!(store.get_source(&src.id).await.unwrap().is_none());
        assert!(store.search_sources("entanglement", 10).await.unwrap().is_empty());

        // Unknown id is a no-op success.
        store.delete_source("never-existed").await.unwrap();
    }

    #[tokio::test]
    async fn test_article_meta_roundtrip() {
        let (_tmp, store) = open_store().await;
        let mut meta = serde_json::Map::new();
        meta.insert("reviewed".to_string(), serde_json::json!(true));
        meta.insert("sources".to_string(), serde_json::json!(["a", "b"]));

        let art = Article {
            id: "01BX5ZZKBKACTAV9WEVGEMMVRY".to_string(),
            title: "Gravity".to_string(),
            path: "physics/gravity.md".to_string(),
            summary: "Why things fall".to_string(),
            tags: vec!["physics".to_string(), "classical".to_string()],
            meta,
            content: "body".to_string(),
            ..Default::default()
        };
        store.upsert_article(&art).await.unwrap();

        let got = store.get_article(&art.id).await.unwrap().unwrap();
        assert_eq!(got.meta.get("reviewed"), Some(&serde_json::json!(true)));
        assert_eq!(got.tags.len(), 2);
        // Content is index-only and never read back.
        assert!(got.content.is_empty());
    }

    #[tokio::test]
    async fn test_db_info_roundtrip() {
        let (_tmp, store) = open_store().await;
        assert!(store.get_info("version").await.unwrap().is_none());
        store.set_info("version", "2026.08").await.unwrap();
        assert_eq!(
            store.get_info("version").await.unwrap().as_deref(),
            Some("2026.08")
        );
    }
}
