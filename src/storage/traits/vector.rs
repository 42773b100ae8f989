//! Vector store trait: project-scoped embedding rows.
//!
//! Each row carries exactly one of `chunk_id` (chunk embeddings) or
//! `entity_name` (entity summary embeddings, used by LOCAL mode).
//! Results are ranked by ascending distance with ties broken by row id;
//! callers mixing vector and graph evidence map distance to a relevance
//! score in `[0, 1]` via [`VectorHit::relevance`].

use crate::Result;
use crate::models::ProjectId;
use uuid::Uuid;

/// Which embedding population a query searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorFilter {
    /// Chunk embeddings only.
    Chunks,
    /// Entity embeddings only.
    Entities,
    /// Both populations.
    Both,
}

/// A chunk embedding row to upsert.
#[derive(Debug, Clone)]
pub struct ChunkEmbedding {
    /// Chunk id; the row key.
    pub chunk_id: Uuid,
    /// Owning document.
    pub document_id: Uuid,
    /// The embedded text.
    pub content: String,
    /// Embedding vector.
    pub embedding: Vec<f32>,
    /// Opaque metadata stored with the row.
    pub metadata: serde_json::Value,
}

/// An entity embedding row to upsert.
#[derive(Debug, Clone)]
pub struct EntityEmbedding {
    /// Entity name; the row key within the project.
    pub entity_name: String,
    /// The embedded text (name plus description).
    pub content: String,
    /// Embedding vector.
    pub embedding: Vec<f32>,
}

/// One ranked result from a vector query.
#[derive(Debug, Clone)]
pub struct VectorHit {
    /// Chunk id, for chunk rows.
    pub chunk_id: Option<Uuid>,
    /// Owning document, for chunk rows.
    pub document_id: Option<Uuid>,
    /// Entity name, for entity rows.
    pub entity_name: Option<String>,
    /// The stored text.
    pub content: String,
    /// Cosine distance (`1 - cosine similarity`), ascending is better.
    pub distance: f64,
}

impl VectorHit {
    /// Maps distance to a relevance score in `[0, 1]`.
    #[must_use]
    pub fn relevance(&self) -> f64 {
        (1.0 - self.distance / 2.0).clamp(0.0, 1.0)
    }
}

/// Trait for project-scoped vector backends.
pub trait VectorStore: Send + Sync {
    /// Upserts chunk embedding rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or a vector has the wrong
    /// dimensionality.
    fn upsert_chunks(&self, project: ProjectId, rows: &[ChunkEmbedding]) -> Result<()>;

    /// Upserts entity embedding rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn upsert_entities(&self, project: ProjectId, rows: &[EntityEmbedding]) -> Result<()>;

    /// Nearest-neighbor query over the project's slice.
    ///
    /// Results are ranked by ascending distance; ties broken by row id.
    ///
    /// # Errors
    ///
    /// Returns an error if the search fails.
    fn query(
        &self,
        project: ProjectId,
        embedding: &[f32],
        top_k: usize,
        filter: VectorFilter,
    ) -> Result<Vec<VectorHit>>;

    /// Deletes all rows of a document. Returns the number deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion fails.
    fn delete_by_document(&self, project: ProjectId, document_id: Uuid) -> Result<usize>;

    /// Deletes entity embedding rows by name. Returns the number deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion fails.
    fn delete_entity_embeddings(&self, project: ProjectId, names: &[String]) -> Result<usize>;

    /// Deletes chunk embedding rows by chunk id. Returns the number
    /// deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion fails.
    fn delete_chunk_embeddings(&self, project: ProjectId, chunk_ids: &[Uuid]) -> Result<usize>;

    /// Whether any rows exist for the document (ingestion recovery
    /// pre-check).
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn has_document_vectors(&self, project: ProjectId, document_id: Uuid) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relevance_mapping() {
        let hit = |distance| VectorHit {
            chunk_id: None,
            document_id: None,
            entity_name: None,
            content: String::new(),
            distance,
        };
        assert!((hit(0.0).relevance() - 1.0).abs() < f64::EPSILON);
        assert!((hit(2.0).relevance()).abs() < f64::EPSILON);
        assert!(hit(0.5).relevance() > hit(1.0).relevance());
    }
}
