//! Document and chunk store trait.
//!
//! Also carries the project lifecycle (projects own everything) and the
//! leased claim used by the ingestion scheduler: `claim_pending` selects
//! pending documents under a row-level lease so each document is handled
//! by exactly one processor at a time.

use crate::Result;
use crate::models::{Chunk, Document, DocumentStatus, ProjectId};
use uuid::Uuid;

/// Per-project document/chunk counts for observability.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct DocumentCounts {
    /// Documents awaiting processing.
    pub not_processed: usize,
    /// Documents currently claimed.
    pub processing: usize,
    /// Fully ingested documents.
    pub processed: usize,
    /// Stored chunks.
    pub chunks: usize,
}

/// Trait for the relational document/chunk backend.
pub trait DocumentStore: Send + Sync {
    // ========================================================================
    // Project lifecycle
    // ========================================================================

    /// Registers a project. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn create_project(&self, project: ProjectId) -> Result<()>;

    /// Whether the project exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn project_exists(&self, project: ProjectId) -> Result<bool>;

    /// Cascade-deletes the project and every row it owns (documents,
    /// chunks, vectors, cache entries, graph rows).
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion fails.
    fn delete_project(&self, project: ProjectId) -> Result<()>;

    // ========================================================================
    // Documents
    // ========================================================================

    /// Persists a new document in `NOT_PROCESSED` state.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn insert_document(&self, document: &Document) -> Result<()>;

    /// Fetches one document.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn get_document(&self, project: ProjectId, id: Uuid) -> Result<Option<Document>>;

    /// Lists all documents of a project, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn list_documents(&self, project: ProjectId) -> Result<Vec<Document>>;

    /// Marker step: atomically claims up to `batch_size` `NOT_PROCESSED`
    /// documents (ordered by creation time, skipping those past
    /// `max_attempts`), transitions them to `PROCESSING`, and stamps the
    /// claiming worker. Returns the claimed documents.
    ///
    /// # Errors
    ///
    /// Returns an error if the claim fails.
    fn claim_pending(
        &self,
        batch_size: usize,
        worker: &str,
        max_attempts: u32,
    ) -> Result<Vec<Document>>;

    /// Lists documents in `PROCESSING` state, optionally only those
    /// claimed by `worker`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn list_processing(&self, worker: Option<&str>) -> Result<Vec<Document>>;

    /// Guarded status transition; returns false when the document was not
    /// in `from` (lost lease, concurrent transition).
    ///
    /// # Errors
    ///
    /// Returns an error on an illegal transition or a failed write.
    fn set_status(&self, id: Uuid, from: DocumentStatus, to: DocumentStatus) -> Result<bool>;

    /// Records a processing failure: increments the attempt counter and
    /// reverts the document to `NOT_PROCESSED` so the marker can retry it.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn record_failure(&self, id: Uuid) -> Result<()>;

    /// Deletes a document row. Chunks cascade. Returns false when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion fails.
    fn delete_document(&self, project: ProjectId, id: Uuid) -> Result<bool>;

    // ========================================================================
    // Chunks
    // ========================================================================

    /// Persists a batch of chunks.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()>;

    /// Fetches a document's chunks ordered by `order_index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn get_chunks_by_document(&self, project: ProjectId, document_id: Uuid) -> Result<Vec<Chunk>>;

    /// Fetches chunks by id; missing ids are absent from the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn get_chunks_by_ids(&self, project: ProjectId, ids: &[Uuid]) -> Result<Vec<Chunk>>;

    /// Associates an extraction-cache entry with a chunk.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn attach_cache_id(&self, chunk_id: Uuid, cache_id: Uuid) -> Result<()>;

    // ========================================================================
    // Observability
    // ========================================================================

    /// Per-project counts.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn counts(&self, project: ProjectId) -> Result<DocumentCounts>;
}
