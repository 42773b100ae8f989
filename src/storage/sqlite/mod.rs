//! SQLite storage backend.
//!
//! One database file carries every project-scoped table: the relational
//! side (projects, documents, chunks, extraction cache), the vector rows,
//! and the graph namespaces with their vertices and edges. Sharing the
//! connection is what lets the deletion and merge services run a single
//! transaction spanning all of them.
//!
//! # Concurrency Model
//!
//! A `Mutex<Connection>` with WAL mode and a busy timeout. Connection-level
//! operations live in the `*_ops` modules; the trait impls lock per call,
//! while [`SqliteStore::transaction`] locks once and hands out a
//! [`StoreTx`] mirror for multi-store all-or-nothing sequences.

mod cache_ops;
mod document_ops;
mod graph_ops;
mod vector_ops;

use crate::models::{
    CacheType, CachedExtraction, Chunk, Document, DocumentStatus, Entity, GraphStats, ProjectId,
    Relation, RelationKey,
};
use crate::storage::traits::{
    ChunkEmbedding, DocumentCounts, DocumentStore, EntityEmbedding, ExtractionCacheStore,
    GraphStore, VectorFilter, VectorHit, VectorStore,
};
use crate::{Error, Result};
use rusqlite::Connection;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Helper to acquire a mutex lock with poison recovery.
fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("storage mutex was poisoned, recovering");
            metrics::counter!("storage_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        }
    }
}

/// Maps a rusqlite error onto the transient/fatal split.
fn map_sqlite_err(operation: &'static str, e: &rusqlite::Error) -> Error {
    let retryable = matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
    );
    if retryable {
        Error::StorageTransient {
            operation: operation.to_string(),
            cause: e.to_string(),
        }
    } else {
        Error::StorageFatal {
            operation: operation.to_string(),
            cause: e.to_string(),
        }
    }
}

/// Tuning knobs the store needs from configuration.
#[derive(Debug, Clone)]
pub struct SqliteStoreOptions {
    /// FIFO cap on entity/relation source lists.
    pub max_source_ids: usize,
    /// Separator for store-level description concatenation.
    pub separator: String,
    /// Expected embedding dimensionality (0 disables the check).
    pub dimensions: usize,
}

impl Default for SqliteStoreOptions {
    fn default() -> Self {
        Self {
            max_source_ids: 50,
            separator: " | ".to_string(),
            dimensions: 0,
        }
    }
}

/// SQLite-backed implementation of all four store traits.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    options: SqliteStoreOptions,
    db_path: Option<PathBuf>,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(path: impl Into<PathBuf>, options: SqliteStoreOptions) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::StorageFatal {
                operation: "open_store".to_string(),
                cause: format!("cannot create {}: {e}", parent.display()),
            })?;
        }
        let conn = Connection::open(&path).map_err(|e| map_sqlite_err("open_store", &e))?;
        let store = Self {
            conn: Mutex::new(conn),
            options,
            db_path: Some(path),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Creates an in-memory store (tests, ephemeral runs).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory(options: SqliteStoreOptions) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| map_sqlite_err("open_store", &e))?;
        let store = Self {
            conn: Mutex::new(conn),
            options,
            db_path: None,
        };
        store.initialize()?;
        Ok(store)
    }

    /// Returns the database path, when file-backed.
    #[must_use]
    pub fn db_path(&self) -> Option<&std::path::Path> {
        self.db_path.as_deref()
    }

    fn initialize(&self) -> Result<()> {
        let conn = acquire_lock(&self.conn);

        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        let _ = conn.pragma_update(None, "synchronous", "NORMAL");
        let _ = conn.pragma_update(None, "busy_timeout", "5000");
        let _ = conn.pragma_update(None, "foreign_keys", "ON");

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS projects (
                 id TEXT PRIMARY KEY,
                 created_at INTEGER NOT NULL
             );
             CREATE TABLE IF NOT EXISTS graph_namespaces (
                 project_id TEXT PRIMARY KEY REFERENCES projects(id) ON DELETE CASCADE,
                 graph_name TEXT NOT NULL UNIQUE,
                 created_at INTEGER NOT NULL
             );
             CREATE TABLE IF NOT EXISTS documents (
                 id TEXT PRIMARY KEY,
                 project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                 doc_type TEXT NOT NULL,
                 status TEXT NOT NULL,
                 file_name TEXT NOT NULL,
                 content TEXT NOT NULL,
                 metadata TEXT NOT NULL DEFAULT 'null',
                 created_at INTEGER NOT NULL,
                 updated_at INTEGER NOT NULL,
                 attempts INTEGER NOT NULL DEFAULT 0,
                 claimed_by TEXT
             );
             CREATE TABLE IF NOT EXISTS chunks (
                 id TEXT PRIMARY KEY,
                 document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                 project_id TEXT NOT NULL,
                 content TEXT NOT NULL,
                 order_index INTEGER NOT NULL,
                 tokens INTEGER NOT NULL,
                 code_meta TEXT,
                 cache_ids TEXT NOT NULL DEFAULT '[]'
             );
             CREATE TABLE IF NOT EXISTS vectors (
                 id TEXT PRIMARY KEY,
                 project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                 document_id TEXT,
                 chunk_id TEXT,
                 entity_name TEXT,
                 content TEXT NOT NULL,
                 embedding BLOB NOT NULL,
                 metadata TEXT NOT NULL DEFAULT '{}',
                 CHECK ((chunk_id IS NULL) != (entity_name IS NULL))
             );
             CREATE TABLE IF NOT EXISTS extraction_cache (
                 id TEXT PRIMARY KEY,
                 project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                 cache_type TEXT NOT NULL,
                 chunk_id TEXT,
                 content_hash TEXT NOT NULL,
                 result TEXT NOT NULL,
                 tokens_used INTEGER NOT NULL DEFAULT 0,
                 created_at INTEGER NOT NULL,
                 UNIQUE (project_id, cache_type, content_hash)
             );
             CREATE TABLE IF NOT EXISTS graph_entities (
                 project_id TEXT NOT NULL REFERENCES graph_namespaces(project_id) ON DELETE CASCADE,
                 name TEXT NOT NULL,
                 entity_type TEXT NOT NULL DEFAULT '',
                 description TEXT NOT NULL DEFAULT '',
                 source_chunk_ids TEXT NOT NULL DEFAULT '[]',
                 source_file_paths TEXT NOT NULL DEFAULT '[]',
                 PRIMARY KEY (project_id, name)
             );
             CREATE TABLE IF NOT EXISTS graph_relations (
                 project_id TEXT NOT NULL REFERENCES graph_namespaces(project_id) ON DELETE CASCADE,
                 src TEXT NOT NULL,
                 tgt TEXT NOT NULL,
                 keywords TEXT NOT NULL,
                 description TEXT NOT NULL DEFAULT '',
                 weight REAL NOT NULL DEFAULT 1.0,
                 source_chunk_ids TEXT NOT NULL DEFAULT '[]',
                 source_file_paths TEXT NOT NULL DEFAULT '[]',
                 PRIMARY KEY (project_id, src, tgt, keywords)
             );
             CREATE INDEX IF NOT EXISTS idx_documents_status
                 ON documents(status, created_at);
             CREATE INDEX IF NOT EXISTS idx_documents_project
                 ON documents(project_id);
             CREATE INDEX IF NOT EXISTS idx_chunks_document
                 ON chunks(document_id, order_index);
             CREATE INDEX IF NOT EXISTS idx_chunks_project
                 ON chunks(project_id);
             CREATE INDEX IF NOT EXISTS idx_vectors_project_doc
                 ON vectors(project_id, document_id);
             CREATE INDEX IF NOT EXISTS idx_vectors_project_entity
                 ON vectors(project_id, entity_name);
             CREATE INDEX IF NOT EXISTS idx_cache_chunk
                 ON extraction_cache(project_id, chunk_id);
             CREATE INDEX IF NOT EXISTS idx_relations_src
                 ON graph_relations(project_id, src);
             CREATE INDEX IF NOT EXISTS idx_relations_tgt
                 ON graph_relations(project_id, tgt);",
        )
        .map_err(|e| map_sqlite_err("initialize_schema", &e))?;
        Ok(())
    }

    /// Runs `f` inside a single `BEGIN IMMEDIATE` transaction. All
    /// operations issued through the [`StoreTx`] commit or roll back as a
    /// unit.
    ///
    /// # Errors
    ///
    /// Propagates the closure's error after rolling back, or a storage
    /// error from commit.
    pub fn transaction<T>(&self, f: impl FnOnce(&StoreTx<'_>) -> Result<T>) -> Result<T> {
        let conn = acquire_lock(&self.conn);
        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| map_sqlite_err("begin_transaction", &e))?;
        let tx = StoreTx {
            conn: &conn,
            options: &self.options,
        };
        match f(&tx) {
            Ok(value) => {
                conn.execute_batch("COMMIT")
                    .map_err(|e| map_sqlite_err("commit_transaction", &e))?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = conn.execute_batch("ROLLBACK") {
                    tracing::error!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}

/// Transactional mirror of the store operations used by the deletion and
/// merge services. Everything issued through a `StoreTx` belongs to one
/// `BEGIN IMMEDIATE` transaction.
pub struct StoreTx<'a> {
    conn: &'a Connection,
    options: &'a SqliteStoreOptions,
}

impl StoreTx<'_> {
    /// Fetches one entity by name.
    pub fn get_entity(&self, project: ProjectId, name: &str) -> Result<Option<Entity>> {
        graph_ops::get_entity(self.conn, project, name)
    }

    /// Merges an entity by `(project, name)`.
    pub fn upsert_entity(&self, project: ProjectId, entity: &Entity) -> Result<()> {
        graph_ops::upsert_entity(
            self.conn,
            project,
            entity,
            self.options.max_source_ids,
            &self.options.separator,
        )
    }

    /// Whole-entity replace (no merge-on-match).
    pub fn put_entity(&self, project: ProjectId, entity: &Entity) -> Result<()> {
        graph_ops::put_entity(self.conn, project, entity)
    }

    /// Merges a relation by `(project, src, tgt, keywords)`.
    pub fn upsert_relation(&self, project: ProjectId, relation: &Relation) -> Result<()> {
        graph_ops::upsert_relation(
            self.conn,
            project,
            relation,
            self.options.max_source_ids,
            &self.options.separator,
        )
    }

    /// Fetches relations incident to an entity.
    pub fn get_relations_for_entity(
        &self,
        project: ProjectId,
        name: &str,
    ) -> Result<Vec<Relation>> {
        graph_ops::get_relations_for_entity(self.conn, project, name)
    }

    /// Fetches a relation by key.
    pub fn get_relation(&self, project: ProjectId, key: &RelationKey) -> Result<Option<Relation>> {
        graph_ops::get_relation(self.conn, project, key)
    }

    /// Deletes entities (and their incident edges) by name.
    pub fn delete_entities(&self, project: ProjectId, names: &[String]) -> Result<usize> {
        graph_ops::delete_entities(self.conn, project, names)
    }

    /// Deletes relations by key.
    pub fn delete_relations(&self, project: ProjectId, keys: &[RelationKey]) -> Result<usize> {
        graph_ops::delete_relations(self.conn, project, keys)
    }

    /// Replaces an entity's description and source list.
    pub fn update_entity_description(
        &self,
        project: ProjectId,
        name: &str,
        description: &str,
        source_chunk_ids: &[Uuid],
    ) -> Result<()> {
        graph_ops::update_entity_description(self.conn, project, name, description, source_chunk_ids)
    }

    /// Replaces a relation's description and source list.
    pub fn update_relation(
        &self,
        project: ProjectId,
        key: &RelationKey,
        description: &str,
        source_chunk_ids: &[Uuid],
    ) -> Result<()> {
        graph_ops::update_relation(self.conn, project, key, description, source_chunk_ids)
    }

    /// Deletes entity embedding rows by name.
    pub fn delete_entity_embeddings(&self, project: ProjectId, names: &[String]) -> Result<usize> {
        vector_ops::delete_entity_embeddings(self.conn, project, names)
    }

    /// Deletes chunk embedding rows.
    pub fn delete_chunk_embeddings(&self, project: ProjectId, chunk_ids: &[Uuid]) -> Result<usize> {
        vector_ops::delete_chunk_embeddings(self.conn, project, chunk_ids)
    }

    /// Deletes all vector rows of a document.
    pub fn delete_document_vectors(&self, project: ProjectId, document_id: Uuid) -> Result<usize> {
        vector_ops::delete_by_document(self.conn, project, document_id)
    }

    /// Upserts entity embedding rows.
    pub fn upsert_entity_embeddings(
        &self,
        project: ProjectId,
        rows: &[EntityEmbedding],
    ) -> Result<()> {
        vector_ops::upsert_entities(self.conn, project, rows, self.options.dimensions)
    }

    /// Deletes chunks by id.
    pub fn delete_chunks(&self, project: ProjectId, chunk_ids: &[Uuid]) -> Result<usize> {
        document_ops::delete_chunks(self.conn, project, chunk_ids)
    }

    /// Deletes a document row.
    pub fn delete_document(&self, project: ProjectId, id: Uuid) -> Result<bool> {
        document_ops::delete_document(self.conn, project, id)
    }

    /// Nulls `chunk_id` on cache entries for the given chunks.
    pub fn detach_cache_chunks(&self, project: ProjectId, chunk_ids: &[Uuid]) -> Result<usize> {
        cache_ops::detach_chunks(self.conn, project, chunk_ids)
    }
}

impl GraphStore for SqliteStore {
    fn ensure_graph(&self, project: ProjectId) -> Result<()> {
        graph_ops::ensure_graph(&acquire_lock(&self.conn), project)
    }

    fn drop_graph(&self, project: ProjectId) -> Result<()> {
        graph_ops::drop_graph(&acquire_lock(&self.conn), project)
    }

    fn graph_exists(&self, project: ProjectId) -> Result<bool> {
        graph_ops::graph_exists(&acquire_lock(&self.conn), project)
    }

    fn upsert_entity(&self, project: ProjectId, entity: &Entity) -> Result<()> {
        graph_ops::upsert_entity(
            &acquire_lock(&self.conn),
            project,
            entity,
            self.options.max_source_ids,
            &self.options.separator,
        )
    }

    fn upsert_entities(&self, project: ProjectId, entities: &[Entity]) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        for entity in entities {
            graph_ops::upsert_entity(
                &conn,
                project,
                entity,
                self.options.max_source_ids,
                &self.options.separator,
            )?;
        }
        Ok(())
    }

    fn get_entity(&self, project: ProjectId, name: &str) -> Result<Option<Entity>> {
        graph_ops::get_entity(&acquire_lock(&self.conn), project, name)
    }

    fn get_entities_batch(
        &self,
        project: ProjectId,
        names: &[String],
        batch_size: usize,
    ) -> Result<HashMap<String, Entity>> {
        graph_ops::get_entities_batch(&acquire_lock(&self.conn), project, names, batch_size)
    }

    fn get_entities_page(
        &self,
        project: ProjectId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Entity>> {
        graph_ops::get_entities_page(&acquire_lock(&self.conn), project, offset, limit)
    }

    fn get_all_entities(&self, project: ProjectId) -> Result<Vec<Entity>> {
        graph_ops::get_entities_page(&acquire_lock(&self.conn), project, 0, i64::MAX as usize)
    }

    fn delete_entities(&self, project: ProjectId, names: &[String]) -> Result<usize> {
        graph_ops::delete_entities(&acquire_lock(&self.conn), project, names)
    }

    fn update_entity_description(
        &self,
        project: ProjectId,
        name: &str,
        description: &str,
        source_chunk_ids: &[Uuid],
    ) -> Result<()> {
        graph_ops::update_entity_description(
            &acquire_lock(&self.conn),
            project,
            name,
            description,
            source_chunk_ids,
        )
    }

    fn upsert_relation(&self, project: ProjectId, relation: &Relation) -> Result<()> {
        graph_ops::upsert_relation(
            &acquire_lock(&self.conn),
            project,
            relation,
            self.options.max_source_ids,
            &self.options.separator,
        )
    }

    fn upsert_relations(&self, project: ProjectId, relations: &[Relation]) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        for relation in relations {
            graph_ops::upsert_relation(
                &conn,
                project,
                relation,
                self.options.max_source_ids,
                &self.options.separator,
            )?;
        }
        Ok(())
    }

    fn get_relation(&self, project: ProjectId, key: &RelationKey) -> Result<Option<Relation>> {
        graph_ops::get_relation(&acquire_lock(&self.conn), project, key)
    }

    fn get_relations_page(
        &self,
        project: ProjectId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Relation>> {
        graph_ops::get_relations_page(&acquire_lock(&self.conn), project, offset, limit)
    }

    fn get_all_relations(&self, project: ProjectId) -> Result<Vec<Relation>> {
        graph_ops::get_relations_page(&acquire_lock(&self.conn), project, 0, i64::MAX as usize)
    }

    fn get_relations_for_entity(&self, project: ProjectId, name: &str) -> Result<Vec<Relation>> {
        graph_ops::get_relations_for_entity(&acquire_lock(&self.conn), project, name)
    }

    fn get_node_degrees_batch(
        &self,
        project: ProjectId,
        names: &[String],
        batch_size: usize,
    ) -> Result<HashMap<String, usize>> {
        graph_ops::get_node_degrees_batch(&acquire_lock(&self.conn), project, names, batch_size)
    }

    fn delete_relations(&self, project: ProjectId, keys: &[RelationKey]) -> Result<usize> {
        graph_ops::delete_relations(&acquire_lock(&self.conn), project, keys)
    }

    fn get_entities_by_source_chunks(
        &self,
        project: ProjectId,
        chunk_ids: &[Uuid],
    ) -> Result<BTreeSet<String>> {
        graph_ops::get_entities_by_source_chunks(&acquire_lock(&self.conn), project, chunk_ids)
    }

    fn get_relations_by_source_chunks(
        &self,
        project: ProjectId,
        chunk_ids: &[Uuid],
    ) -> Result<Vec<RelationKey>> {
        graph_ops::get_relations_by_source_chunks(&acquire_lock(&self.conn), project, chunk_ids)
    }

    fn get_stats(&self, project: ProjectId) -> Result<GraphStats> {
        graph_ops::get_stats(&acquire_lock(&self.conn), project)
    }
}

impl VectorStore for SqliteStore {
    fn upsert_chunks(&self, project: ProjectId, rows: &[ChunkEmbedding]) -> Result<()> {
        vector_ops::upsert_chunks(
            &acquire_lock(&self.conn),
            project,
            rows,
            self.options.dimensions,
        )
    }

    fn upsert_entities(&self, project: ProjectId, rows: &[EntityEmbedding]) -> Result<()> {
        vector_ops::upsert_entities(
            &acquire_lock(&self.conn),
            project,
            rows,
            self.options.dimensions,
        )
    }

    fn query(
        &self,
        project: ProjectId,
        embedding: &[f32],
        top_k: usize,
        filter: VectorFilter,
    ) -> Result<Vec<VectorHit>> {
        vector_ops::query(&acquire_lock(&self.conn), project, embedding, top_k, filter)
    }

    fn delete_by_document(&self, project: ProjectId, document_id: Uuid) -> Result<usize> {
        vector_ops::delete_by_document(&acquire_lock(&self.conn), project, document_id)
    }

    fn delete_entity_embeddings(&self, project: ProjectId, names: &[String]) -> Result<usize> {
        vector_ops::delete_entity_embeddings(&acquire_lock(&self.conn), project, names)
    }

    fn delete_chunk_embeddings(&self, project: ProjectId, chunk_ids: &[Uuid]) -> Result<usize> {
        vector_ops::delete_chunk_embeddings(&acquire_lock(&self.conn), project, chunk_ids)
    }

    fn has_document_vectors(&self, project: ProjectId, document_id: Uuid) -> Result<bool> {
        vector_ops::has_document_vectors(&acquire_lock(&self.conn), project, document_id)
    }
}

impl DocumentStore for SqliteStore {
    fn create_project(&self, project: ProjectId) -> Result<()> {
        document_ops::create_project(&acquire_lock(&self.conn), project)
    }

    fn project_exists(&self, project: ProjectId) -> Result<bool> {
        document_ops::project_exists(&acquire_lock(&self.conn), project)
    }

    fn delete_project(&self, project: ProjectId) -> Result<()> {
        self.transaction(|tx| document_ops::delete_project(tx.conn, project))
    }

    fn insert_document(&self, document: &Document) -> Result<()> {
        document_ops::insert_document(&acquire_lock(&self.conn), document)
    }

    fn get_document(&self, project: ProjectId, id: Uuid) -> Result<Option<Document>> {
        document_ops::get_document(&acquire_lock(&self.conn), project, id)
    }

    fn list_documents(&self, project: ProjectId) -> Result<Vec<Document>> {
        document_ops::list_documents(&acquire_lock(&self.conn), project)
    }

    fn claim_pending(
        &self,
        batch_size: usize,
        worker: &str,
        max_attempts: u32,
    ) -> Result<Vec<Document>> {
        // The lease claim must be exclusive: select + update as a unit.
        self.transaction(|tx| {
            document_ops::claim_pending(tx.conn, batch_size, worker, max_attempts)
        })
    }

    fn list_processing(&self, worker: Option<&str>) -> Result<Vec<Document>> {
        document_ops::list_processing(&acquire_lock(&self.conn), worker)
    }

    fn set_status(&self, id: Uuid, from: DocumentStatus, to: DocumentStatus) -> Result<bool> {
        document_ops::set_status(&acquire_lock(&self.conn), id, from, to)
    }

    fn record_failure(&self, id: Uuid) -> Result<()> {
        document_ops::record_failure(&acquire_lock(&self.conn), id)
    }

    fn delete_document(&self, project: ProjectId, id: Uuid) -> Result<bool> {
        document_ops::delete_document(&acquire_lock(&self.conn), project, id)
    }

    fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        document_ops::insert_chunks(&acquire_lock(&self.conn), chunks)
    }

    fn get_chunks_by_document(&self, project: ProjectId, document_id: Uuid) -> Result<Vec<Chunk>> {
        document_ops::get_chunks_by_document(&acquire_lock(&self.conn), project, document_id)
    }

    fn get_chunks_by_ids(&self, project: ProjectId, ids: &[Uuid]) -> Result<Vec<Chunk>> {
        document_ops::get_chunks_by_ids(&acquire_lock(&self.conn), project, ids)
    }

    fn attach_cache_id(&self, chunk_id: Uuid, cache_id: Uuid) -> Result<()> {
        document_ops::attach_cache_id(&acquire_lock(&self.conn), chunk_id, cache_id)
    }

    fn counts(&self, project: ProjectId) -> Result<DocumentCounts> {
        document_ops::counts(&acquire_lock(&self.conn), project)
    }
}

impl ExtractionCacheStore for SqliteStore {
    fn put(&self, entry: &CachedExtraction) -> Result<Uuid> {
        cache_ops::put(&acquire_lock(&self.conn), entry)
    }

    fn get(
        &self,
        project: ProjectId,
        cache_type: CacheType,
        content_hash: &str,
    ) -> Result<Option<CachedExtraction>> {
        cache_ops::get(&acquire_lock(&self.conn), project, cache_type, content_hash)
    }

    fn get_by_chunks(
        &self,
        project: ProjectId,
        cache_types: &[CacheType],
        chunk_ids: &[Uuid],
    ) -> Result<Vec<CachedExtraction>> {
        cache_ops::get_by_chunks(&acquire_lock(&self.conn), project, cache_types, chunk_ids)
    }

    fn detach_chunks(&self, project: ProjectId, chunk_ids: &[Uuid]) -> Result<usize> {
        cache_ops::detach_chunks(&acquire_lock(&self.conn), project, chunk_ids)
    }

    fn count(&self, project: ProjectId) -> Result<usize> {
        cache_ops::count(&acquire_lock(&self.conn), project)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Entity, Relation};

    fn store() -> SqliteStore {
        SqliteStore::in_memory(SqliteStoreOptions::default()).unwrap()
    }

    fn project_with_graph(store: &SqliteStore) -> ProjectId {
        let project = ProjectId::generate();
        store.create_project(project).unwrap();
        store.ensure_graph(project).unwrap();
        project
    }

    #[test]
    fn test_entity_ops_require_graph() {
        let store = store();
        let project = ProjectId::generate();
        store.create_project(project).unwrap();
        let err = store
            .upsert_entity(project, &Entity::new("A", "concept", "desc"))
            .unwrap_err();
        assert_eq!(err.kind(), "GRAPH_NOT_FOUND");
    }

    #[test]
    fn test_ensure_graph_idempotent() {
        let store = store();
        let project = ProjectId::generate();
        store.create_project(project).unwrap();
        store.ensure_graph(project).unwrap();
        store.ensure_graph(project).unwrap();
        assert!(store.graph_exists(project).unwrap());
    }

    #[test]
    fn test_entity_merge_on_upsert() {
        let store = store();
        let project = project_with_graph(&store);

        let mut first = Entity::new("Apple", "organization", "makes phones");
        first.source_chunk_ids.push(Uuid::now_v7());
        store.upsert_entity(project, &first).unwrap();

        let mut second = Entity::new("Apple", "organization", "invests in AI");
        second.source_chunk_ids.push(Uuid::now_v7());
        store.upsert_entity(project, &second).unwrap();

        let merged = store.get_entity(project, "Apple").unwrap().unwrap();
        assert!(merged.description.contains("makes phones"));
        assert!(merged.description.contains("invests in AI"));
        assert_eq!(merged.source_chunk_ids.len(), 2);
    }

    #[test]
    fn test_relation_self_loop_rejected() {
        let store = store();
        let project = project_with_graph(&store);
        store
            .upsert_entity(project, &Entity::new("A", "concept", "a"))
            .unwrap();
        let err = store
            .upsert_relation(project, &Relation::new("A", "A", "loops", "self", 1.0))
            .unwrap_err();
        assert_eq!(err.kind(), "SELF_LOOP_RELATION");
    }

    #[test]
    fn test_relation_requires_endpoints() {
        let store = store();
        let project = project_with_graph(&store);
        store
            .upsert_entity(project, &Entity::new("A", "concept", "a"))
            .unwrap();
        let err = store
            .upsert_relation(project, &Relation::new("A", "Missing", "links", "x", 1.0))
            .unwrap_err();
        assert_eq!(err.kind(), "INVALID_INPUT");
    }

    #[test]
    fn test_relation_merge_adds_weight() {
        let store = store();
        let project = project_with_graph(&store);
        store
            .upsert_entity(project, &Entity::new("A", "concept", "a"))
            .unwrap();
        store
            .upsert_entity(project, &Entity::new("B", "concept", "b"))
            .unwrap();
        store
            .upsert_relation(project, &Relation::new("A", "B", "links", "first", 1.0))
            .unwrap();
        store
            .upsert_relation(project, &Relation::new("A", "B", "links", "second", 2.0))
            .unwrap();

        let relations = store.get_relations_for_entity(project, "A").unwrap();
        assert_eq!(relations.len(), 1);
        assert!((relations[0].weight - 3.0).abs() < f64::EPSILON);
        assert!(relations[0].description.contains("first"));
        assert!(relations[0].description.contains("second"));
    }

    #[test]
    fn test_cross_project_isolation() {
        let store = store();
        let p1 = project_with_graph(&store);
        let p2 = project_with_graph(&store);

        store
            .upsert_entity(p1, &Entity::new("Apple", "organization", "AI research"))
            .unwrap();
        store
            .upsert_entity(p2, &Entity::new("Apple", "organization", "fruit grower"))
            .unwrap();

        let e1 = store.get_entity(p1, "Apple").unwrap().unwrap();
        let e2 = store.get_entity(p2, "Apple").unwrap().unwrap();
        assert_eq!(e1.description, "AI research");
        assert_eq!(e2.description, "fruit grower");

        store.delete_entities(p1, &["Apple".to_string()]).unwrap();
        assert!(store.get_entity(p1, "Apple").unwrap().is_none());
        assert!(store.get_entity(p2, "Apple").unwrap().is_some());
    }

    #[test]
    fn test_transaction_rolls_back() {
        let store = store();
        let project = project_with_graph(&store);
        store
            .upsert_entity(project, &Entity::new("Keep", "concept", "stays"))
            .unwrap();

        let result: Result<()> = store.transaction(|tx| {
            tx.delete_entities(project, &["Keep".to_string()])?;
            Err(Error::InvalidInput("forced failure".to_string()))
        });
        assert!(result.is_err());
        assert!(store.get_entity(project, "Keep").unwrap().is_some());
    }

    #[test]
    fn test_source_chunk_lookup() {
        let store = store();
        let project = project_with_graph(&store);
        let chunk_a = Uuid::now_v7();
        let chunk_b = Uuid::now_v7();

        let mut entity = Entity::new("Turing", "person", "mathematician");
        entity.source_chunk_ids = vec![chunk_a, chunk_b];
        store.upsert_entity(project, &entity).unwrap();

        let hits = store
            .get_entities_by_source_chunks(project, &[chunk_a])
            .unwrap();
        assert!(hits.contains("Turing"));
        let misses = store
            .get_entities_by_source_chunks(project, &[Uuid::now_v7()])
            .unwrap();
        assert!(misses.is_empty());
    }

    #[test]
    fn test_degrees_batch() {
        let store = store();
        let project = project_with_graph(&store);
        for name in ["A", "B", "C"] {
            store
                .upsert_entity(project, &Entity::new(name, "concept", name))
                .unwrap();
        }
        store
            .upsert_relation(project, &Relation::new("A", "B", "x", "", 1.0))
            .unwrap();
        store
            .upsert_relation(project, &Relation::new("A", "C", "y", "", 1.0))
            .unwrap();

        let degrees = store
            .get_node_degrees_batch(
                project,
                &["A".to_string(), "B".to_string(), "Z".to_string()],
                500,
            )
            .unwrap();
        assert_eq!(degrees["A"], 2);
        assert_eq!(degrees["B"], 1);
        assert_eq!(degrees["Z"], 0);
    }
}
