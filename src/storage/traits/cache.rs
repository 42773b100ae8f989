//! Extraction-cache store trait.
//!
//! Persisted raw LLM outputs keyed by `(project, cache_type,
//! content_hash)`. The unique key makes concurrent inserts idempotent.
//! Entries are cascade-deleted with the project; when a chunk is deleted
//! its entries are retained with `chunk_id` nulled so rebuilds never need
//! new extraction calls.

use crate::Result;
use crate::models::{CacheType, CachedExtraction, ProjectId};
use uuid::Uuid;

/// Trait for the extraction-cache backend.
pub trait ExtractionCacheStore: Send + Sync {
    /// Inserts an entry, or returns the existing row id when the
    /// `(project, type, hash)` key is already present.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn put(&self, entry: &CachedExtraction) -> Result<Uuid>;

    /// Looks up an entry by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn get(
        &self,
        project: ProjectId,
        cache_type: CacheType,
        content_hash: &str,
    ) -> Result<Option<CachedExtraction>>;

    /// Fetches entries of the given types whose `chunk_id` is in `chunk_ids`.
    /// Used by the rebuild path.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn get_by_chunks(
        &self,
        project: ProjectId,
        cache_types: &[CacheType],
        chunk_ids: &[Uuid],
    ) -> Result<Vec<CachedExtraction>>;

    /// Nulls `chunk_id` on entries referencing the given chunks, retaining
    /// the entries for rebuild. Returns the number detached.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn detach_chunks(&self, project: ProjectId, chunk_ids: &[Uuid]) -> Result<usize>;

    /// Number of entries for the project.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn count(&self, project: ProjectId) -> Result<usize>;
}
