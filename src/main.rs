//! # Knowledge Base CLI (`kb`)
//!
//! One binary drives the whole system:
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kb serve` | Start the HTTP API server |
//! | `kb ingest [DIR]` | Ingest incoming source files (`--delete`, `--dry-run`) |
//! | `kb index [DIR]` | Index the article tree (`--embeddings`) |
//! | `kb search <QUERY>` | Search from the command line |
//! | `kb stats` | Record counts and content version |
//!
//! All commands accept a `--config` flag pointing to a TOML file; with no
//! file present the defaults target local Ollama, Qdrant, and a `data/`
//! SQLite database.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use knowledgebase::config::{self, Config};
use knowledgebase::context::AppContext;
use knowledgebase::indexer::{self, IndexOptions};
use knowledgebase::ingest::{self, IngestOptions};
use knowledgebase::models::RecordKind;
use knowledgebase::search::{self, SemanticQuery};
use knowledgebase::server;
use knowledgebase::store::Store;

#[derive(Parser)]
#[command(
    name = "kb",
    about = "Knowledge base with lexical and semantic search over articles and sources",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kb.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server.
    Serve,

    /// Ingest incoming source files.
    ///
    /// Parses front matter, embeds summaries, and writes each source to
    /// SQLite and the vector store. Duplicate URLs are skipped.
    Ingest {
        /// Directory of incoming source files. Falls back to
        /// `ingest.sources_dir` from the config.
        sources_dir: Option<PathBuf>,

        /// Delete source files after successful ingestion.
        #[arg(long)]
        delete: bool,

        /// Show what would be done without making changes.
        #[arg(long)]
        dry_run: bool,
    },

    /// Index the article tree into the searchable store.
    Index {
        /// Root of the article tree. Falls back to
        /// `ingest.compendium_dir` from the config.
        compendium_dir: Option<PathBuf>,

        /// Also generate embeddings and write article vectors.
        #[arg(long)]
        embeddings: bool,
    },

    /// Search from the command line.
    Search {
        /// The search query string.
        query: String,

        /// Search mode: `lexical` (FTS5), `semantic` (vector), or
        /// `browse` (exact topic match, the query is the topic).
        #[arg(long, default_value = "lexical")]
        mode: String,

        /// Record kind: `sources` or `articles`.
        #[arg(long, default_value = "sources")]
        kind: String,

        /// Topic filter (semantic source search only).
        #[arg(long)]
        topic: Option<String>,

        /// Maximum number of results.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Show record counts and the content version.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            let ctx = AppContext::init(cfg).await?;
            server::run_server(ctx).await?;
        }
        Commands::Ingest {
            sources_dir,
            delete,
            dry_run,
        } => {
            let dir = resolve_dir(
                sources_dir,
                cfg.ingest.sources_dir.clone(),
                "sources directory (pass it as an argument or set ingest.sources_dir)",
            )?;
            let opts = IngestOptions {
                sources_dir: dir,
                delete_after: delete,
                dry_run,
            };

            if dry_run {
                ingest::run_ingest(None, &opts).await?;
            } else {
                let ctx = AppContext::init(cfg).await?;
                ingest::run_ingest(Some(&ctx), &opts).await?;
            }
        }
        Commands::Index {
            compendium_dir,
            embeddings,
        } => {
            let dir = resolve_dir(
                compendium_dir,
                cfg.ingest.compendium_dir.clone(),
                "compendium directory (pass it as an argument or set ingest.compendium_dir)",
            )?;
            let ctx = AppContext::init(cfg).await?;
            indexer::run_index(
                &ctx,
                &IndexOptions {
                    compendium_dir: dir,
                    with_embeddings: embeddings,
                },
            )
            .await?;
        }
        Commands::Search {
            query,
            mode,
            kind,
            topic,
            limit,
        } => {
            run_search(cfg, &query, &mode, &kind, topic.as_deref(), limit).await?;
        }
        Commands::Stats => {
            run_stats(&cfg).await?;
        }
    }

    Ok(())
}

fn resolve_dir(
    arg: Option<PathBuf>,
    configured: Option<PathBuf>,
    what: &str,
) -> Result<PathBuf> {
    arg.or(configured)
        .ok_or_else(|| anyhow::anyhow!("No {}", what))
}

async fn run_search(
    cfg: Config,
    query: &str,
    mode: &str,
    kind: &str,
    topic: Option<&str>,
    limit: usize,
) -> Result<()> {
    let kind = match kind {
        "sources" => RecordKind::Sources,
        "articles" => RecordKind::Articles,
        other => anyhow::bail!("Unknown kind: {}. Use sources or articles.", other),
    };

    let ctx = AppContext::init(cfg).await?;

    let hits = match mode {
        "lexical" => search::search_lexical(&ctx, kind, query, limit as i64).await?,
        "semantic" => {
            search::search_semantic(
                &ctx,
                kind,
                SemanticQuery::Text(query.to_string()),
                topic,
                limit,
            )
            .await?
        }
        "browse" => search::browse_topic(&ctx, query, limit as i64).await?,
        other => anyhow::bail!(
            "Unknown search mode: {}. Use lexical, semantic, or browse.",
            other
        ),
    };

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        match hit.score {
            Some(score) => println!("{}. [{:.3}] {}", i + 1, score, hit.title),
            None => println!("{}. {}", i + 1, hit.title),
        }
        if !hit.url.is_empty() {
            println!("    url: {}", hit.url);
        }
        if !hit.topic.is_empty() {
            println!("    topic: {}", hit.topic);
        }
        if !hit.summary.is_empty() {
            let summary = hit.summary.replace('\n', " ");
            let excerpt: String = summary.chars().take(160).collect();
            println!("    summary: {}", excerpt);
        }
        println!("    id: {}", hit.id);
        println!();
    }

    Ok(())
}

async fn run_stats(cfg: &Config) -> Result<()> {
    let store = Store::connect(&cfg.db.path).await?;

    let sources = store.count_sources().await?;
    let articles = store.count_articles().await?;
    let version = store
        .get_info("version")
        .await?
        .unwrap_or_else(|| "unknown".to_string());
    let db_size = std::fs::metadata(&cfg.db.path).map(|m| m.len()).unwrap_or(0);

    println!("Knowledge Base Stats");
    println!("======================");
    println!();
    println!("  Database:  {}", cfg.db.path.display());
    println!("  Size:      {} KB", db_size / 1024);
    println!("  Sources:   {}", sources);
    println!("  Articles:  {}", articles);
    println!("  Version:   {}", version);

    store.close().await;
    Ok(())
}
