//! Shared application context.
//!
//! All long-lived handles (the SQLite pool, the vector store client, and
//! the embedding client) are constructed once at startup and passed by
//! reference into every operation. There are no process-wide singletons.

use anyhow::Result;

use crate::config::Config;
use crate::embedding::EmbeddingClient;
use crate::store::Store;
use crate::vectordb::VectorClient;

pub struct AppContext {
    pub config: Config,
    pub store: Store,
    pub vectors: VectorClient,
    pub embedder: EmbeddingClient,
}

impl AppContext {
    /// Connect to the relational store, build the HTTP clients, and make
    /// sure the vector collections exist. An unreachable vector store is
    /// fatal at startup; it only becomes tolerable once the process is
    /// serving writes.
    pub async fn init(config: Config) -> Result<Self> {
        let store = Store::connect(&config.db.path).await?;
        let embedder = EmbeddingClient::new(&config.embedding)?;
        println!("Embedding model: {}", embedder.model());

        let vectors = VectorClient::new(&config.vector, config.embedding.dims)?;
        vectors.ensure_collections().await?;

        Ok(Self {
            config,
            store,
            vectors,
            embedder,
        })
    }
}
