//! Query-path types: modes, keyword results, and responses.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Retrieval mode for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryMode {
    /// Entity-centric: vector-search entity embeddings, expand to incident
    /// relations and source chunks.
    Local,
    /// Relation-centric: vector-search chunks, build context around
    /// relation descriptions and one-hop neighbors.
    Global,
    /// LOCAL and GLOBAL interleaved round-robin, plus top chunks.
    Hybrid,
    /// Vector chunk search plus one-hop graph expansion from keyword
    /// matched entities.
    Mix,
    /// Vector-only over chunks; no graph access.
    Naive,
}

impl QueryMode {
    /// Returns the mode as its wire string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "LOCAL",
            Self::Global => "GLOBAL",
            Self::Hybrid => "HYBRID",
            Self::Mix => "MIX",
            Self::Naive => "NAIVE",
        }
    }

    /// Parses a mode from its wire string (case-insensitive).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "LOCAL" => Some(Self::Local),
            "GLOBAL" => Some(Self::Global),
            "HYBRID" => Some(Self::Hybrid),
            "MIX" => Some(Self::Mix),
            "NAIVE" => Some(Self::Naive),
            _ => None,
        }
    }

    /// Whether this mode consults the knowledge graph.
    #[must_use]
    pub const fn uses_graph(&self) -> bool {
        !matches!(self, Self::Naive)
    }
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown query mode: {s}"))
    }
}

/// High/low-level keywords extracted from a query.
///
/// High-level keywords are abstract concepts/themes biasing relation
/// retrieval; low-level keywords are named entities biasing entity
/// retrieval.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeywordResult {
    /// Abstract concepts, themes, relationships.
    pub high_level: Vec<String>,
    /// Named entities.
    pub low_level: Vec<String>,
    /// SHA-256 of the query, lowercase hex; the cache key.
    pub query_hash: String,
    /// Whether the parse failed and the whole query was used as a single
    /// low-level keyword.
    pub fallback: bool,
}

impl KeywordResult {
    /// Whether both keyword lists are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.high_level.is_empty() && self.low_level.is_empty()
    }
}

/// One evidence chunk returned with an answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceChunk {
    /// Chunk id, when the source is a stored chunk.
    pub chunk_id: Option<Uuid>,
    /// Owning document, when known.
    pub document_id: Option<Uuid>,
    /// The evidence text.
    pub content: String,
    /// Position of the chunk within its document.
    pub chunk_index: Option<usize>,
    /// Which retrieval source produced this item (`entities`, `relations`,
    /// `chunks`).
    pub source_label: String,
    /// Relevance score in `[0, 1]`, when the source was ranked.
    pub relevance_score: Option<f64>,
}

/// Answer plus citations for a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    /// Synthesized answer. `None` when the deadline tripped before
    /// synthesis.
    pub answer: Option<String>,
    /// Evidence chunks in citation order; `[k]` in the answer refers to
    /// `sources[k - 1]`.
    pub sources: Vec<SourceChunk>,
    /// The mode that produced this response.
    pub mode: QueryMode,
    /// True when the query was cancelled before synthesis; `sources` then
    /// carries the partial context.
    pub cancelled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse_case_insensitive() {
        assert_eq!(QueryMode::parse("local"), Some(QueryMode::Local));
        assert_eq!(QueryMode::parse("HYBRID"), Some(QueryMode::Hybrid));
        assert_eq!(QueryMode::parse("Mix"), Some(QueryMode::Mix));
        assert_eq!(QueryMode::parse("bogus"), None);
    }

    #[test]
    fn test_naive_mode_skips_graph() {
        assert!(!QueryMode::Naive.uses_graph());
        assert!(QueryMode::Local.uses_graph());
        assert!(QueryMode::Global.uses_graph());
    }
}
