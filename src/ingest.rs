//! Source ingestion pipeline.
//!
//! Walks a directory of incoming source files (YAML front matter + body),
//! runs each through the dual-store write coordinator, and optionally
//! deletes the inputs that made it in. Deletion is deferred until the
//! whole walk has finished and is best-effort per file.

use anyhow::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::context::AppContext;
use crate::error::KbError;
use crate::writer::{self, SkipReason, SourceDraft, WriteOutcome};

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub sources_dir: PathBuf,
    /// Delete successfully ingested (or already-ingested) inputs after
    /// the walk completes.
    pub delete_after: bool,
    /// Parse and validate only; touch neither store nor filesystem.
    pub dry_run: bool,
}

/// Aggregate counters for one ingestion run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub processed: u64,
    pub skipped: u64,
    pub errored: u64,
    /// Documents stored relationally whose vector index write failed.
    /// Subset of `processed`; operators watch this for index drift.
    pub partial: u64,
    pub deleted: u64,
}

/// YAML front matter of a source file. Unknown keys are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SourceFrontMatter {
    id: String,
    title: String,
    url: String,
    related_article: String,
    created: String,
    tags: Vec<String>,
    summary: String,
    model: String,
    language: String,
}

/// Run the pipeline. `ctx` may be `None` only for a dry run, which
/// parses and validates without touching either store or the filesystem.
pub async fn run_ingest(ctx: Option<&AppContext>, opts: &IngestOptions) -> Result<IngestReport> {
    let ctx = if opts.dry_run { None } else { ctx };
    if !opts.dry_run && ctx.is_none() {
        anyhow::bail!("ingestion requires connected stores unless dry_run is set");
    }

    let mut report = IngestReport::default();

    if !opts.sources_dir.exists() {
        println!(
            "Sources directory does not exist: {}",
            opts.sources_dir.display()
        );
        println!("No sources to ingest.");
        return Ok(report);
    }

    let files = collect_source_files(&opts.sources_dir)?;
    println!("Found {} source files", files.len());

    let mut to_delete: Vec<PathBuf> = Vec::new();

    for path in &files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        println!("Processing: {}", name);

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("  Error reading: {}", e);
                report.errored += 1;
                continue;
            }
        };

        let (fm, body) = match parse_source_file(&content) {
            Ok(parsed) => parsed,
            Err(e) => {
                eprintln!("  Error parsing: {}", e);
                report.errored += 1;
                continue;
            }
        };

        if fm.url.is_empty() {
            println!("  Skipping: no URL");
            report.skipped += 1;
            continue;
        }

        // The body stands in for a missing summary field.
        let summary = if fm.summary.is_empty() {
            body.trim().to_string()
        } else {
            fm.summary.clone()
        };
        if summary.is_empty() {
            println!("  Skipping: no summary content");
            report.skipped += 1;
            continue;
        }

        let topic = if fm.related_article.is_empty() {
            topic_from_filename(path)
        } else {
            fm.related_article.clone()
        };

        let Some(ctx) = ctx else {
            println!(
                "  Would ingest: id={} url={} topic={}",
                if fm.id.is_empty() { "(generated)" } else { &fm.id },
                fm.url,
                topic
            );
            report.processed += 1;
            continue;
        };

        let draft = SourceDraft {
            id: non_empty(fm.id),
            url: fm.url,
            title: fm.title,
            topic,
            summary,
            language: fm.language,
            model: fm.model,
            created_at: non_empty(fm.created),
            tags: fm.tags,
        };

        match writer::store_source(ctx, draft).await {
            Ok(WriteOutcome::Stored { id }) => {
                println!("  Ingested: id={}", id);
                report.processed += 1;
                if opts.delete_after {
                    to_delete.push(path.clone());
                }
            }
            Ok(WriteOutcome::PartiallyStored { id, warning }) => {
                println!("  Ingested: id={}", id);
                eprintln!("  Warning: vector index write failed: {}", warning);
                report.processed += 1;
                report.partial += 1;
                if opts.delete_after {
                    to_delete.push(path.clone());
                }
            }
            Ok(WriteOutcome::Skipped(SkipReason::Duplicate { existing_id })) => {
                println!("  Skipping: URL already exists (id={})", existing_id);
                report.skipped += 1;
                // Duplicates count as already ingested.
                if opts.delete_after {
                    to_delete.push(path.clone());
                }
            }
            Ok(WriteOutcome::Skipped(SkipReason::MissingField(field))) => {
                println!("  Skipping: missing {}", field);
                report.skipped += 1;
            }
            Err(e) => {
                eprintln!("  Error: {}", e);
                report.errored += 1;
            }
        }
    }

    if opts.delete_after && !to_delete.is_empty() {
        println!("Deleting {} processed source files...", to_delete.len());
        for path in &to_delete {
            match std::fs::remove_file(path) {
                Ok(()) => {
                    report.deleted += 1;
                }
                Err(e) => {
                    eprintln!(
                        "  Failed to delete {}: {}",
                        path.file_name()
                            .map(|n| n.to_string_lossy().to_string())
                            .unwrap_or_default(),
                        e
                    );
                }
            }
        }
    }

    println!(
        "Ingestion complete: {} processed, {} skipped, {} errors",
        report.processed, report.skipped, report.errored
    );
    if report.partial > 0 {
        println!(
            "  vector index misses: {} (relational store has the data)",
            report.partial
        );
    }

    Ok(report)
}

/// All `.md` files under the sources directory, sorted for deterministic
/// processing order.
fn collect_source_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let is_md = entry
            .path()
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("md"))
            .unwrap_or(false);
        if is_md {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

/// Split a source file into front matter and body.
///
/// Files without a leading `---` fence are all body. A present but
/// malformed header block is a validation error for this document.
fn parse_source_file(content: &str) -> std::result::Result<(SourceFrontMatter, String), KbError> {
    if !content.starts_with("---") {
        return Ok((SourceFrontMatter::default(), content.to_string()));
    }

    let mut parts = content.splitn(3, "---");
    parts.next(); // leading empty segment
    let (header, body) = match (parts.next(), parts.next()) {
        (Some(header), Some(body)) => (header, body),
        _ => return Ok((SourceFrontMatter::default(), content.to_string())),
    };

    let fm: SourceFrontMatter = serde_yaml::from_str(header)
        .map_err(|e| KbError::Validation(format!("invalid front matter: {}", e)))?;

    Ok((fm, body.trim().to_string()))
}

/// Derive a topic from a filename like `quantum-mechanics--example-com-1.md`.
fn topic_from_filename(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    stem.split("--").next().unwrap_or_default().to_string()
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}
