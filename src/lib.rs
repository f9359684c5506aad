//! # Knowledge Base
//!
//! A dual-store knowledge base for articles and source summaries,
//! searchable by exact keyword match and by semantic similarity.
//!
//! Every document lives in two places under one logical id:
//!
//! ```text
//! ┌───────────┐    ┌─────────────┐    ┌─────────────────┐
//! │ Ingestion │───▶│ Coordinator │───▶│ SQLite (FTS5)    │  source of truth
//! │ + HTTP API│    │ dedup/embed │    │ main + shadow    │
//! └───────────┘    └──────┬──────┘    └─────────────────┘
//!                         │ best-effort
//!                         ▼
//!                  ┌─────────────────┐
//!                  │ Qdrant (cosine) │  semantic index
//!                  └─────────────────┘
//! ```
//!
//! The SQLite write always happens first and is the only one that can
//! fail a document; a vector store failure degrades the document to
//! "stored without semantic search" and is reported, not raised.
//!
//! Ids are ULIDs in SQLite and the same 128 bits as UUID text in the
//! vector store; [`ids::to_vector_id`] is the bridge.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration |
//! | [`error`] | Domain error kinds |
//! | [`ids`] | ULID generation and ULID→UUID mapping |
//! | [`models`] | Record types and search projections |
//! | [`store`] | SQLite adapter (records + FTS5 shadows) |
//! | [`embedding`] | Ollama embedding gateway |
//! | [`vectordb`] | Qdrant REST adapter |
//! | [`writer`] | Dual-store write coordinator |
//! | [`search`] | Lexical / semantic / browse fan-out |
//! | [`ingest`] | Source ingestion pipeline |
//! | [`indexer`] | Article indexer |
//! | [`context`] | Shared handles, built once at startup |
//! | [`server`] | HTTP API |

pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod ids;
pub mod indexer;
pub mod ingest;
pub mod models;
pub mod search;
pub mod server;
pub mod store;
pub mod vectordb;
pub mod writer;
