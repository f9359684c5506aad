//! Article indexer.
//!
//! Walks the article tree (the "compendium"), parses each markdown file's
//! front matter plus body, and writes it through the coordinator. Unlike
//! source ingestion this path never deletes inputs, and embeddings are
//! optional: without `--embeddings` only the relational store is touched.

use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::context::AppContext;
use crate::error::KbError;
use crate::writer::{self, ArticleDraft, WriteOutcome};

#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub compendium_dir: PathBuf,
    pub with_embeddings: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexReport {
    pub indexed: u64,
    pub errored: u64,
    /// Articles whose embedding or vector write failed after the
    /// relational write committed.
    pub partial: u64,
}

/// Article front matter. Recognized keys map to columns; everything else
/// is preserved verbatim in the article's meta map.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ArticleFrontMatter {
    id: String,
    title: String,
    author: String,
    summary: String,
    tags: Vec<String>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

pub async fn run_index(ctx: &AppContext, opts: &IndexOptions) -> Result<IndexReport> {
    let root = &opts.compendium_dir;
    if !root.exists() {
        anyhow::bail!("compendium dir not found: {}", root.display());
    }

    let version = std::env::var("KB_VERSION").unwrap_or_else(|_| "unknown".to_string());
    if let Err(e) = ctx.store.set_info("version", &version).await {
        eprintln!("Warning: failed to set version info: {}", e);
    }

    let mut report = IndexReport::default();

    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        // Staging and scratch directories are not articles.
        !(entry.file_type().is_dir()
            && matches!(entry.file_name().to_str(), Some("_incoming") | Some("_debug")))
    });

    let mut files: Vec<PathBuf> = Vec::new();
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if !name.ends_with(".md") || name == "index.md" {
            continue;
        }
        files.push(entry.path().to_path_buf());
    }
    files.sort();

    for path in &files {
        match index_article(ctx, root, path, opts.with_embeddings).await {
            Ok(WriteOutcome::PartiallyStored { id, warning }) => {
                eprintln!("Warning: article {} stored without vector: {}", id, warning);
                report.indexed += 1;
                report.partial += 1;
            }
            Ok(_) => {
                report.indexed += 1;
            }
            Err(e) => {
                eprintln!(
                    "Error processing {}: {}",
                    path.file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default(),
                    e
                );
                report.errored += 1;
            }
        }
    }

    println!(
        "Indexing complete: {} articles indexed, {} errors",
        report.indexed, report.errored
    );

    let article_count = ctx.store.count_articles().await.unwrap_or(0);
    let source_count = ctx.store.count_sources().await.unwrap_or(0);
    println!(
        "Database stats: {} articles, {} sources",
        article_count, source_count
    );

    Ok(report)
}

async fn index_article(
    ctx: &AppContext,
    root: &Path,
    path: &Path,
    with_embeddings: bool,
) -> Result<WriteOutcome> {
    let content = std::fs::read_to_string(path)?;
    let (mut fm, body) = parse_article_file(&content)?;

    if fm.title.is_empty() {
        fm.title = fallback_title(&body, path);
    }

    let rel_path = path
        .strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/");

    let category = match rel_path.rsplit_once('/') {
        Some((dirs, _file)) => dirs.to_string(),
        None => String::new(),
    };

    let mut meta = Map::new();
    meta.insert("id".to_string(), json!(fm.id.clone()));
    meta.insert("title".to_string(), json!(fm.title.clone()));
    meta.insert("author".to_string(), json!(fm.author.clone()));
    meta.insert("summary".to_string(), json!(fm.summary.clone()));
    meta.insert("tags".to_string(), json!(fm.tags.clone()));
    meta.insert("category".to_string(), json!(category.clone()));
    for (key, value) in fm.rest {
        meta.insert(key, value);
    }

    let draft = ArticleDraft {
        id: if fm.id.is_empty() { None } else { Some(fm.id) },
        title: fm.title,
        path: rel_path,
        author: fm.author,
        summary: fm.summary,
        tags: fm.tags,
        meta,
        content: body,
        category,
    };

    Ok(writer::store_article(ctx, draft, with_embeddings).await?)
}

fn parse_article_file(content: &str) -> std::result::Result<(ArticleFrontMatter, String), KbError> {
    if !content.starts_with("---") {
        return Ok((ArticleFrontMatter::default(), content.to_string()));
    }

    let mut parts = content.splitn(3, "---");
    parts.next();
    let (header, body) = match (parts.next(), parts.next()) {
        (Some(header), Some(body)) => (header, body),
        _ => return Ok((ArticleFrontMatter::default(), content.to_string())),
    };

    let fm: ArticleFrontMatter = serde_yaml::from_str(header)
        .map_err(|e| KbError::Validation(format!("invalid front matter: {}", e)))?;

    Ok((fm, body.trim().to_string()))
}

/// Title fallback: first `# ` heading in the body, then the file stem.
fn fallback_title(body: &str, path: &Path) -> String {
    for line in body.lines() {
        if let Some(heading) = line.strip_prefix("# ") {
            return heading.trim().to_string();
        }
    }
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, EmbeddingConfig, VectorConfig};
    use crate::embedding::EmbeddingClient;
    use crate::store::Store;
    use crate::vectordb::VectorClient;
    use tempfile::TempDir;

    async fn offline_ctx() -> (TempDir, AppContext) {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.db.path = tmp.path().join("kb.sqlite");
        config.embedding = EmbeddingConfig {
            url: "http://127.0.0.1:1".to_string(),
            model: "nomic-embed-text".to_string(),
            dims: 4,
            timeout_secs: 1,
            max_retries: 0,
        };
        config.vector = VectorConfig {
            url: "http://127.0.0.1:1".to_string(),
            timeout_secs: 1,
        };

        let store = Store::connect(&config.db.path).await.unwrap();
        let embedder = EmbeddingClient::new(&config.embedding).unwrap();
        let vectors = VectorClient::new(&config.vector, 4).unwrap();

        (
            tmp,
            AppContext {
                config,
                store,
                vectors,
                embedder,
            },
        )
    }

    #[test]
    fn test_unrecognized_keys_land_in_meta() {
        let content = "---\ntitle: Gravity\nreviewed: true\nsources:\n  - a\n  - b\n---\nBody.";
        let (fm, _) = parse_article_file(content).unwrap();
        assert_eq!(fm.title, "Gravity");
        assert_eq!(fm.rest.get("reviewed"), Some(&json!(true)));
        assert_eq!(fm.rest.get("sources"), Some(&json!(["a", "b"])));
    }

    #[test]
    fn test_title_fallback_prefers_h1_then_stem() {
        assert_eq!(
            fallback_title("intro\n# Real Title\nmore", Path::new("a/b/file-name.md")),
            "Real Title"
        );
        assert_eq!(
            fallback_title("no heading here", Path::new("a/b/file-name.md")),
            "file-name"
        );
    }

    #[tokio::test]
    async fn test_index_walk_skips_staging_and_index_files() {
        let (_tmp, ctx) = offline_ctx().await;

        let root = TempDir::new().unwrap();
        let physics = root.path().join("physics");
        std::fs::create_dir_all(&physics).unwrap();
        std::fs::create_dir_all(root.path().join("_incoming/sources")).unwrap();

        std::fs::write(
            physics.join("gravity.md"),
            "---\ntitle: Gravity\ntags:\n  - physics\n---\nWhy things fall.",
        )
        .unwrap();
        std::fs::write(physics.join("index.md"), "# Index page").unwrap();
        std::fs::write(
            root.path().join("_incoming/sources/pending.md"),
            "---\nurl: https://x.test/a\n---\nsummary",
        )
        .unwrap();

        let report = run_index(
            &ctx,
            &IndexOptions {
                compendium_dir: root.path().to_path_buf(),
                with_embeddings: false,
            },
        )
        .await
        .unwrap();

        assert_eq!(report.indexed, 1);
        assert_eq!(report.errored, 0);
        assert_eq!(ctx.store.count_articles().await.unwrap(), 1);

        let hits = ctx.store.search_articles("fall", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "physics/gravity.md");
        assert_eq!(
            hits[0].meta.get("category"),
            Some(&serde_json::json!("physics"))
        );
    }
}
