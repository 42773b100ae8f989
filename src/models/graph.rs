//! Knowledge-graph vertex and edge types.
//!
//! Entity identity is `(project, name)`: the same name in two different
//! projects names two independent vertices. Relations are directed edges
//! keyed by `(project, src, tgt, keywords)`; a second extraction of the
//! same triple merges descriptions rather than duplicating the edge.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A named vertex in a project's graph with accumulated description and
/// source provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Entity name, unique within the project.
    pub name: String,
    /// Free-form entity type as produced by extraction (e.g.
    /// `organization`, `person`, `concept`).
    pub entity_type: String,
    /// Accumulated description (separator-joined or summarized).
    pub description: String,
    /// Contributing chunk ids, oldest first, FIFO-capped.
    pub source_chunk_ids: Vec<Uuid>,
    /// Contributing file paths, oldest first, FIFO-capped.
    pub source_file_paths: Vec<String>,
}

impl Entity {
    /// Creates an entity with a single provenance source.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        entity_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            description: description.into(),
            source_chunk_ids: Vec::new(),
            source_file_paths: Vec::new(),
        }
    }

    /// Appends a provenance source, trimming from the head when `cap` is
    /// exceeded.
    pub fn push_source(&mut self, chunk_id: Uuid, file_path: &str, cap: usize) {
        push_capped(&mut self.source_chunk_ids, chunk_id, cap);
        if !self.source_file_paths.iter().any(|p| p == file_path) {
            push_capped(&mut self.source_file_paths, file_path.to_string(), cap);
        }
    }
}

/// Appends to a FIFO-capped list, evicting the oldest entries.
pub(crate) fn push_capped<T: PartialEq>(list: &mut Vec<T>, item: T, cap: usize) {
    if list.contains(&item) {
        return;
    }
    list.push(item);
    if cap > 0 && list.len() > cap {
        let excess = list.len() - cap;
        list.drain(..excess);
    }
}

/// Identity key of a relation within a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationKey {
    /// Source entity name.
    pub src: String,
    /// Target entity name.
    pub tgt: String,
    /// Keyword label on the edge.
    pub keywords: String,
}

impl fmt::Display for RelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -[{}]-> {}", self.src, self.keywords, self.tgt)
    }
}

/// A directed, keyed edge between two entities of the same project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    /// Source entity name. Never equal to `tgt`.
    pub src: String,
    /// Target entity name.
    pub tgt: String,
    /// Keyword label on the edge; part of the identity key.
    pub keywords: String,
    /// Accumulated description.
    pub description: String,
    /// Edge weight; merged by addition on repeated extraction.
    pub weight: f64,
    /// Contributing chunk ids, oldest first, FIFO-capped.
    pub source_chunk_ids: Vec<Uuid>,
    /// Contributing file paths, oldest first, FIFO-capped.
    pub source_file_paths: Vec<String>,
}

impl Relation {
    /// Creates a relation with the given endpoints and key.
    #[must_use]
    pub fn new(
        src: impl Into<String>,
        tgt: impl Into<String>,
        keywords: impl Into<String>,
        description: impl Into<String>,
        weight: f64,
    ) -> Self {
        Self {
            src: src.into(),
            tgt: tgt.into(),
            keywords: keywords.into(),
            description: description.into(),
            weight,
            source_chunk_ids: Vec::new(),
            source_file_paths: Vec::new(),
        }
    }

    /// Returns the identity key of this relation.
    #[must_use]
    pub fn key(&self) -> RelationKey {
        RelationKey {
            src: self.src.clone(),
            tgt: self.tgt.clone(),
            keywords: self.keywords.clone(),
        }
    }

    /// Appends a provenance source, trimming from the head when `cap` is
    /// exceeded.
    pub fn push_source(&mut self, chunk_id: Uuid, file_path: &str, cap: usize) {
        push_capped(&mut self.source_chunk_ids, chunk_id, cap);
        if !self.source_file_paths.iter().any(|p| p == file_path) {
            push_capped(&mut self.source_file_paths, file_path.to_string(), cap);
        }
    }
}

/// Per-project graph counts for observability.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GraphStats {
    /// Total vertices in the namespace.
    pub entity_count: usize,
    /// Total edges in the namespace.
    pub relation_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_capped_evicts_oldest() {
        let mut list: Vec<u32> = (0..5).collect();
        push_capped(&mut list, 5, 5);
        assert_eq!(list, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_push_capped_dedups() {
        let mut list = vec![1, 2, 3];
        push_capped(&mut list, 2, 10);
        assert_eq!(list, vec![1, 2, 3]);
    }

    #[test]
    fn test_entity_source_cap() {
        let mut entity = Entity::new("Turing", "person", "mathematician");
        for i in 0..60 {
            let id = Uuid::now_v7();
            entity.push_source(id, &format!("doc-{i}.txt"), 50);
        }
        assert_eq!(entity.source_chunk_ids.len(), 50);
        assert_eq!(entity.source_file_paths.len(), 50);
    }

    #[test]
    fn test_relation_key_display() {
        let rel = Relation::new("A", "B", "funds", "A funds B", 1.0);
        assert_eq!(rel.key().to_string(), "A -[funds]-> B");
    }
}
