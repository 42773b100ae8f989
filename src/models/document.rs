//! Document, chunk, and extraction-cache types.

use super::ProjectId;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of a submitted document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DocumentType {
    /// Uploaded file.
    File,
    /// Raw text submitted inline.
    Text,
    /// Scraped website content.
    Website,
    /// Source-code file (chunked scope-aware).
    Code,
}

impl DocumentType {
    /// Returns the type as its wire string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::File => "FILE",
            Self::Text => "TEXT",
            Self::Website => "WEBSITE",
            Self::Code => "CODE",
        }
    }

    /// Parses a document type from its wire string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "FILE" => Some(Self::File),
            "TEXT" => Some(Self::Text),
            "WEBSITE" => Some(Self::Website),
            "CODE" => Some(Self::Code),
            _ => None,
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing status of a document.
///
/// Transitions strictly `NotProcessed → Processing → Processed`, with
/// `Processing → NotProcessed` only on retry after failure. A document is
/// terminal only on `Processed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    /// Awaiting a marker claim.
    NotProcessed,
    /// Claimed by a processor under lease.
    Processing,
    /// Fully ingested: chunks, vectors, and graph rows exist.
    Processed,
}

impl DocumentStatus {
    /// Returns the status as its wire string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotProcessed => "NOT_PROCESSED",
            Self::Processing => "PROCESSING",
            Self::Processed => "PROCESSED",
        }
    }

    /// Parses a status from its wire string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NOT_PROCESSED" => Some(Self::NotProcessed),
            "PROCESSING" => Some(Self::Processing),
            "PROCESSED" => Some(Self::Processed),
            _ => None,
        }
    }

    /// Whether transitioning from `self` to `next` is legal.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::NotProcessed, Self::Processing)
                | (Self::Processing, Self::Processed)
                // retry after failure
                | (Self::Processing, Self::NotProcessed)
        )
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A submitted document owned by a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// 128-bit document id.
    pub id: Uuid,
    /// Owning project.
    pub project_id: ProjectId,
    /// Kind of document.
    pub doc_type: DocumentType,
    /// Processing status.
    pub status: DocumentStatus,
    /// Original file name (or a synthetic label for inline text).
    pub file_name: String,
    /// Full decoded text content.
    pub content: String,
    /// Opaque caller-supplied metadata.
    pub metadata: serde_json::Value,
    /// Unix seconds at creation.
    pub created_at: i64,
    /// Unix seconds at last status change.
    pub updated_at: i64,
    /// Number of failed processing attempts so far.
    pub attempts: u32,
}

/// Scope kind carried on code chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScopeType {
    /// Class, struct, interface, or enum body.
    Class,
    /// Function or method body.
    Function,
    /// Module-level code.
    Module,
    /// Whole-file scope (no narrower boundary detected).
    File,
}

impl ScopeType {
    /// Returns the scope type as its wire string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Class => "CLASS",
            Self::Function => "FUNCTION",
            Self::Module => "MODULE",
            Self::File => "FILE",
        }
    }

    /// Parses a scope type from its wire string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CLASS" => Some(Self::Class),
            "FUNCTION" => Some(Self::Function),
            "MODULE" => Some(Self::Module),
            "FILE" => Some(Self::File),
            _ => None,
        }
    }
}

/// What a chunk contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    /// Prose text split on sentence/whitespace boundaries.
    Prose,
    /// Source code split on scope boundaries.
    Code,
    /// A contiguous import/include block at file head.
    ImportBlock,
}

impl ChunkKind {
    /// Returns the kind as its wire string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Prose => "prose",
            Self::Code => "code",
            Self::ImportBlock => "import_block",
        }
    }

    /// Parses a kind from its wire string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "prose" => Some(Self::Prose),
            "code" => Some(Self::Code),
            "import_block" => Some(Self::ImportBlock),
            _ => None,
        }
    }
}

/// Code-specific metadata carried on chunks of `CODE` documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeChunkMeta {
    /// Detected language identifier (e.g. `rust`, `python`).
    pub language: String,
    /// 1-based first line covered by the chunk.
    pub start_line: usize,
    /// 1-based last line covered by the chunk.
    pub end_line: usize,
    /// Name of the containing scope, if any.
    pub scope_name: Option<String>,
    /// Kind of the containing scope.
    pub scope_type: ScopeType,
    /// What the chunk contains.
    pub chunk_type: ChunkKind,
}

/// An ordered contiguous segment of a document's content.
///
/// Chunks of a document form a consecutive `0..N` sequence under
/// `order_index` at end of ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// 128-bit chunk id.
    pub id: Uuid,
    /// Owning document.
    pub document_id: Uuid,
    /// Owning project.
    pub project_id: ProjectId,
    /// Chunk text.
    pub content: String,
    /// Position within the document, `0..N`.
    pub order_index: usize,
    /// Token count of `content`.
    pub tokens: usize,
    /// Code metadata, present for `CODE` documents.
    pub code_meta: Option<CodeChunkMeta>,
    /// Extraction-cache entries associated with this chunk.
    pub cache_ids: Vec<Uuid>,
}

/// Kind of a persisted LLM output in the extraction cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheType {
    /// First-pass entity/relation extraction.
    EntityExtraction,
    /// A follow-up "missed entities" pass.
    Gleaning,
    /// Description summarization output.
    Summarization,
    /// Query keyword extraction output.
    KeywordExtraction,
}

impl CacheType {
    /// Returns the cache type as its wire string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::EntityExtraction => "ENTITY_EXTRACTION",
            Self::Gleaning => "GLEANING",
            Self::Summarization => "SUMMARIZATION",
            Self::KeywordExtraction => "KEYWORD_EXTRACTION",
        }
    }

    /// Parses a cache type from its wire string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ENTITY_EXTRACTION" => Some(Self::EntityExtraction),
            "GLEANING" => Some(Self::Gleaning),
            "SUMMARIZATION" => Some(Self::Summarization),
            "KEYWORD_EXTRACTION" => Some(Self::KeywordExtraction),
            _ => None,
        }
    }
}

impl fmt::Display for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted raw LLM output, keyed by `(project, type, content_hash)`.
///
/// Cache entries survive chunk deletion (`chunk_id` is nulled) so that
/// shared entities can be rebuilt without new extraction calls; they are
/// cascade-deleted with the project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedExtraction {
    /// Cache row id.
    pub id: Uuid,
    /// Owning project.
    pub project_id: ProjectId,
    /// What kind of LLM output this is.
    pub cache_type: CacheType,
    /// Source chunk, if it still exists.
    pub chunk_id: Option<Uuid>,
    /// SHA-256 of the prompt-versioned input, lowercase hex.
    pub content_hash: String,
    /// Raw LLM response.
    pub result: String,
    /// Tokens spent producing the response.
    pub tokens_used: u64,
    /// Unix seconds at creation.
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        use DocumentStatus::{NotProcessed, Processed, Processing};
        assert!(NotProcessed.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Processed));
        assert!(Processing.can_transition_to(NotProcessed));

        assert!(!NotProcessed.can_transition_to(Processed));
        assert!(!Processed.can_transition_to(Processing));
        assert!(!Processed.can_transition_to(NotProcessed));
    }

    #[test]
    fn test_wire_strings_roundtrip() {
        for status in [
            DocumentStatus::NotProcessed,
            DocumentStatus::Processing,
            DocumentStatus::Processed,
        ] {
            assert_eq!(DocumentStatus::parse(status.as_str()), Some(status));
        }
        for cache_type in [
            CacheType::EntityExtraction,
            CacheType::Gleaning,
            CacheType::Summarization,
            CacheType::KeywordExtraction,
        ] {
            assert_eq!(CacheType::parse(cache_type.as_str()), Some(cache_type));
        }
    }
}
