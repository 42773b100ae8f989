//! Storage layer abstraction.
//!
//! Four project-scoped stores sit behind traits:
//! - **Documents/chunks** ([`DocumentStore`]): the relational side, with
//!   the scheduler's leased claim.
//! - **Graph** ([`GraphStore`]): per-project namespaces with MERGE/MATCH
//!   semantics for entities and relations.
//! - **Vector** ([`VectorStore`]): per-project embedding rows for chunks
//!   and entity summaries.
//! - **Extraction cache** ([`ExtractionCacheStore`]): persisted raw LLM
//!   outputs keyed by content hash.
//!
//! The shipped backend is SQLite ([`SqliteStore`]) implementing all four
//! on one database, which is what makes the cross-store all-or-nothing
//! transactions of the deletion and merge services possible. The backend
//! family is chosen once at process start by [`open_store`]; no
//! per-request dispatch.

pub mod namespace;
pub mod sqlite;
pub mod traits;

pub use sqlite::{SqliteStore, SqliteStoreOptions, StoreTx};
pub use traits::{
    ChunkEmbedding, DocumentCounts, DocumentStore, EntityEmbedding, ExtractionCacheStore,
    GraphStore, VectorFilter, VectorHit, VectorStore,
};

use crate::Result;
use crate::config::{GraphLoomConfig, StorageBackend};
use std::sync::Arc;

/// Builds the configured storage backend.
///
/// # Errors
///
/// Returns an error if the backend cannot be opened or initialized.
pub fn open_store(config: &GraphLoomConfig) -> Result<Arc<SqliteStore>> {
    let options = SqliteStoreOptions {
        max_source_ids: config.entity.max_source_ids,
        separator: config.description.separator.clone(),
        dimensions: config.embedding.dimensions,
    };
    let store = match config.storage.backend {
        StorageBackend::Sqlite => match &config.storage.path {
            Some(path) => SqliteStore::open(path, options)?,
            None => SqliteStore::in_memory(options)?,
        },
    };
    Ok(Arc::new(store))
}
