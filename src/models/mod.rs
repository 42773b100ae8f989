//! Domain model types.
//!
//! A [`ProjectId`] is the tenant boundary: it owns one physical graph
//! namespace and one logical slice of the vector index. Everything else in
//! this module is scoped under a project.

mod document;
pub(crate) mod graph;
mod query;

pub use document::{
    CacheType, CachedExtraction, Chunk, ChunkKind, CodeChunkMeta, Document, DocumentStatus,
    DocumentType, ScopeType,
};
pub use graph::{Entity, GraphStats, Relation, RelationKey};
pub use query::{KeywordResult, QueryMode, QueryResponse, SourceChunk};

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque 128-bit, time-ordered project identifier.
///
/// The root of tenant isolation. Two distinct projects never share graph
/// vertices, vector rows, documents, or cache entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectId(Uuid);

impl ProjectId {
    /// Generates a new time-ordered project id (UUID v7).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Returns the 32 lowercase hex characters of the id, separators
    /// removed. This is the suffix of the physical graph namespace name.
    #[must_use]
    pub fn as_simple_hex(&self) -> String {
        self.0.simple().to_string()
    }

    /// Parses a project id from its canonical hyphenated or simple form.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] if the string is not a UUID.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidInput(format!("invalid project id '{s}': {e}")))
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_id_hex_is_32_chars() {
        let id = ProjectId::generate();
        let hex = id.as_simple_hex();
        assert_eq!(hex.len(), 32);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(!hex.contains('-'));
    }

    #[test]
    fn test_project_id_roundtrip() {
        let id = ProjectId::generate();
        let parsed = ProjectId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_project_ids_are_time_ordered() {
        let a = ProjectId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = ProjectId::generate();
        assert!(a.as_uuid() < b.as_uuid());
    }
}
