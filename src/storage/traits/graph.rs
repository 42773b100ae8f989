//! Graph store trait: project-scoped entity and relation storage.
//!
//! Every operation takes the project as its first parameter and executes
//! inside that project's graph namespace exclusively. No operation may
//! touch another project's namespace; isolation is enforced by the
//! namespace registry plus mandatory project-scoped filters on every
//! MERGE/MATCH-equivalent statement.
//!
//! # Error Modes
//!
//! | Condition | Error |
//! |-----------|-------|
//! | Namespace missing for the project | `GRAPH_NOT_FOUND` |
//! | Relation with identical endpoints | `SELF_LOOP_RELATION` |
//! | Relation endpoint not present | `INVALID_INPUT` |
//! | Engine busy/locked | `STORAGE_TRANSIENT` (retryable) |
//! | Schema violation | `STORAGE_FATAL` (not retried) |
//!
//! # Merge Semantics
//!
//! `upsert_entity` merges by `(project, name)`: on match the new
//! description is concatenated onto the existing one (deduplicated) and
//! the new provenance is appended to the FIFO-capped source lists.
//! `upsert_relation` merges by `(project, src, tgt, keywords)`: a second
//! extraction of the same triple merges descriptions and adds weights
//! rather than duplicating the edge.

use crate::Result;
use crate::models::{Entity, GraphStats, ProjectId, Relation, RelationKey};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// Trait for project-scoped graph backends.
///
/// # Implementor Notes
///
/// - Methods use `&self` to enable sharing via `Arc<dyn GraphStore>`;
///   use interior mutability for connection state.
/// - `ensure_graph` must pre-check existence: the underlying engine may
///   error on duplicate creation.
/// - Batched reads chunk their IN-clauses by the configured batch size.
pub trait GraphStore: Send + Sync {
    // ========================================================================
    // Namespace lifecycle (C4)
    // ========================================================================

    /// Creates the project's graph namespace if absent. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if namespace creation fails.
    fn ensure_graph(&self, project: ProjectId) -> Result<()>;

    /// Cascade-deletes all vertices and edges in the project's namespace,
    /// then the namespace itself. Succeeds when the namespace is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion fails.
    fn drop_graph(&self, project: ProjectId) -> Result<()>;

    /// Whether the project's namespace exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn graph_exists(&self, project: ProjectId) -> Result<bool>;

    // ========================================================================
    // Entity operations
    // ========================================================================

    /// Merges an entity by `(project, name)`.
    ///
    /// # Errors
    ///
    /// Returns `GRAPH_NOT_FOUND` when the namespace is missing.
    fn upsert_entity(&self, project: ProjectId, entity: &Entity) -> Result<()>;

    /// Batched entity merge preserving per-entity semantics.
    ///
    /// # Errors
    ///
    /// Returns `GRAPH_NOT_FOUND` when the namespace is missing.
    fn upsert_entities(&self, project: ProjectId, entities: &[Entity]) -> Result<()>;

    /// Fetches one entity by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn get_entity(&self, project: ProjectId, name: &str) -> Result<Option<Entity>>;

    /// Fetches entities by name, IN-clause batched. Missing names are
    /// absent from the result map.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn get_entities_batch(
        &self,
        project: ProjectId,
        names: &[String],
        batch_size: usize,
    ) -> Result<HashMap<String, Entity>>;

    /// Pages through all entities, ordered by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn get_entities_page(
        &self,
        project: ProjectId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Entity>>;

    /// Fetches every entity of the project.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn get_all_entities(&self, project: ProjectId) -> Result<Vec<Entity>>;

    /// Deletes entities by name; relations referencing them are removed
    /// too. Returns the number of entities deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion fails.
    fn delete_entities(&self, project: ProjectId, names: &[String]) -> Result<usize>;

    /// Rebuild-time repair: replaces an entity's description and source
    /// chunk list in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity does not exist or the write fails.
    fn update_entity_description(
        &self,
        project: ProjectId,
        name: &str,
        description: &str,
        source_chunk_ids: &[Uuid],
    ) -> Result<()>;

    // ========================================================================
    // Relation operations
    // ========================================================================

    /// Merges a relation by `(project, src, tgt, keywords)`.
    ///
    /// # Errors
    ///
    /// Refuses `src == tgt` with `SELF_LOOP_RELATION` and endpoints not
    /// present with `INVALID_INPUT`.
    fn upsert_relation(&self, project: ProjectId, relation: &Relation) -> Result<()>;

    /// Batched relation merge.
    ///
    /// # Errors
    ///
    /// Same per-relation semantics as [`GraphStore::upsert_relation`].
    fn upsert_relations(&self, project: ProjectId, relations: &[Relation]) -> Result<()>;

    /// Fetches one relation by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn get_relation(&self, project: ProjectId, key: &RelationKey) -> Result<Option<Relation>>;

    /// Pages through all relations, ordered by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn get_relations_page(
        &self,
        project: ProjectId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Relation>>;

    /// Fetches every relation of the project.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn get_all_relations(&self, project: ProjectId) -> Result<Vec<Relation>>;

    /// Fetches relations incident to an entity (either direction).
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn get_relations_for_entity(&self, project: ProjectId, name: &str) -> Result<Vec<Relation>>;

    /// Incident-edge counts per name, IN-clause batched.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn get_node_degrees_batch(
        &self,
        project: ProjectId,
        names: &[String],
        batch_size: usize,
    ) -> Result<HashMap<String, usize>>;

    /// Deletes relations by key. Returns the number deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion fails.
    fn delete_relations(&self, project: ProjectId, keys: &[RelationKey]) -> Result<usize>;

    // ========================================================================
    // Provenance queries (used by deletion/rebuild)
    // ========================================================================

    /// Names of entities whose source lists reference any of the chunks.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn get_entities_by_source_chunks(
        &self,
        project: ProjectId,
        chunk_ids: &[Uuid],
    ) -> Result<BTreeSet<String>>;

    /// Keys of relations whose source lists reference any of the chunks.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn get_relations_by_source_chunks(
        &self,
        project: ProjectId,
        chunk_ids: &[Uuid],
    ) -> Result<Vec<RelationKey>>;

    // ========================================================================
    // Observability
    // ========================================================================

    /// Entity/relation counts for the project.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn get_stats(&self, project: ProjectId) -> Result<GraphStats>;
}
