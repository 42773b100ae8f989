//! # GraphLoom
//!
//! A multi-tenant GraphRAG engine.
//!
//! GraphLoom ingests text and source-code documents per tenant ("project"),
//! extracts an entity/relation knowledge graph with an external LLM,
//! co-indexes content in a vector store, and answers natural-language
//! queries by retrieving and synthesizing evidence from both stores.
//!
//! ## Features
//!
//! - Per-project graph isolation (namespace allocation, lifecycle, routing)
//! - Chunking for prose and source code (scope-aware, line-range metadata)
//! - LLM entity/relation extraction with iterative gleaning and a persisted
//!   extraction cache keyed by content hash
//! - Five retrieval modes (LOCAL / GLOBAL / HYBRID / MIX / NAIVE) with
//!   token-budgeted round-robin context assembly
//! - Document deletion with knowledge rebuild from cached extractions
//! - Entity merge with edge redirection and deduplication
//!
//! ## Example
//!
//! ```rust,ignore
//! use graphloom::{Engine, GraphLoomConfig, QueryMode};
//!
//! let engine = Engine::open(GraphLoomConfig::default())?;
//! let project = engine.create_project()?;
//! engine.submit_text(project, "notes.md", "Apple Inc. invests in AI research.")?;
//! engine.process_pending()?;
//! let answer = engine.query(Some(project), "What is Apple Inc.?", QueryMode::Local, None)?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

use thiserror::Error as ThisError;

// Module declarations
pub mod cli;
pub mod config;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod query;
pub mod services;
pub mod storage;
pub mod text;

// Re-exports for convenience
pub use config::GraphLoomConfig;
pub use llm::{EmbeddingClient, LlmClient};
pub use models::{
    CacheType, Chunk, Document, DocumentStatus, DocumentType, Entity, ProjectId, QueryMode,
    Relation,
};
pub use services::{Engine, TokenTracker};
pub use storage::{DocumentStore, ExtractionCacheStore, GraphStore, VectorStore};

/// Error type for graphloom operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait
/// implementations. Variants map one-to-one onto the machine-readable error
/// kinds surfaced to callers; [`Error::kind`] returns the wire string.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Malformed parameters at an API boundary |
/// | `BinaryFileRejected` | Document admission detects a binary payload |
/// | `EncodingError` | Text decoding failed after the lossy fallback |
/// | `GraphNotFound` | A graph operation referenced a project without a namespace |
/// | `MissingProjectId` | A query executor was invoked without a project id |
/// | `LlmTransient` / `LlmFatal` | LLM endpoint timeout/rate-limit, then retry exhaustion |
/// | `LlmParse` | LLM response could not be parsed into entities/keywords |
/// | `StorageTransient` / `StorageFatal` | Retryable storage error, then retry exhaustion or schema violation |
/// | `CircularMerge` | Merge target appears in the source set |
/// | `SelfLoopRelation` | Relation upsert with identical endpoints |
/// | `Cancelled` | Query deadline tripped before synthesis |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided at an API boundary.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Document admission rejected a binary payload.
    ///
    /// The document is never persisted; no chunks or entities exist for it.
    #[error("binary file rejected: {file_name} ({reason})")]
    BinaryFileRejected {
        /// Name of the offending file.
        file_name: String,
        /// What tripped the detector (extension, magic bytes, NUL density).
        reason: String,
    },

    /// Text decoding failed after the fallback decoder.
    #[error("encoding error in {file_name}: {cause}")]
    EncodingError {
        /// Name of the offending file.
        file_name: String,
        /// Decoder diagnostics.
        cause: String,
    },

    /// An operation referenced a project whose graph namespace does not
    /// exist. The caller must create the graph first.
    #[error("graph not found for project {project_id}")]
    GraphNotFound {
        /// The project whose namespace is missing.
        project_id: String,
    },

    /// A query executor was invoked without a project id.
    #[error("missing project id")]
    MissingProjectId,

    /// A retryable LLM failure (timeout, 5xx, rate limit).
    ///
    /// The resilience layer retries these with exponential backoff; after
    /// the retry budget is exhausted the error is promoted to
    /// [`Error::LlmFatal`].
    #[error("llm transient failure in '{operation}': {cause}")]
    LlmTransient {
        /// The LLM operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A non-retryable LLM failure, or a transient one past the retry budget.
    #[error("llm failure in '{operation}': {cause}")]
    LlmFatal {
        /// The LLM operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// The LLM response could not be parsed.
    ///
    /// For extraction the raw response is still cached and the chunk
    /// contributes no entities; for keyword extraction the fallback path
    /// applies.
    #[error("llm response unparseable in '{operation}': {cause}")]
    LlmParse {
        /// The parsing operation that failed.
        operation: String,
        /// Parser diagnostics.
        cause: String,
    },

    /// A retryable storage failure.
    #[error("storage transient failure in '{operation}': {cause}")]
    StorageTransient {
        /// The storage operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A fatal storage failure (schema violation, retry exhaustion).
    #[error("storage failure in '{operation}': {cause}")]
    StorageFatal {
        /// The storage operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// The merge target appears in its own source set.
    #[error("circular merge rejected: target '{target}' is also a source")]
    CircularMerge {
        /// The offending target entity name.
        target: String,
    },

    /// A relation upsert had identical endpoints.
    #[error("self-loop relation rejected for entity '{name}'")]
    SelfLoopRelation {
        /// The entity name appearing on both ends.
        name: String,
    },

    /// The query deadline tripped before synthesis was reached.
    ///
    /// The executor returns the partial context alongside this kind.
    #[error("cancelled during '{stage}'")]
    Cancelled {
        /// The pipeline stage that was in flight.
        stage: String,
    },
}

impl Error {
    /// Returns the machine-readable error kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::BinaryFileRejected { .. } => "BINARY_FILE_REJECTED",
            Self::EncodingError { .. } => "ENCODING_ERROR",
            Self::GraphNotFound { .. } => "GRAPH_NOT_FOUND",
            Self::MissingProjectId => "MISSING_PROJECT_ID",
            Self::LlmTransient { .. } => "LLM_TRANSIENT",
            Self::LlmFatal { .. } => "LLM_FATAL",
            Self::LlmParse { .. } => "LLM_PARSE_ERROR",
            Self::StorageTransient { .. } => "STORAGE_TRANSIENT",
            Self::StorageFatal { .. } => "STORAGE_FATAL",
            Self::CircularMerge { .. } => "CIRCULAR_MERGE",
            Self::SelfLoopRelation { .. } => "SELF_LOOP_RELATION",
            Self::Cancelled { .. } => "CANCELLED",
        }
    }

    /// Whether the resilience layer should retry this error.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::LlmTransient { .. } | Self::StorageTransient { .. }
        )
    }

    /// Promotes a transient error to its fatal counterpart after the retry
    /// budget is exhausted. Non-transient errors pass through unchanged.
    #[must_use]
    pub fn into_fatal(self) -> Self {
        match self {
            Self::LlmTransient { operation, cause } => Self::LlmFatal {
                operation,
                cause: format!("retries exhausted: {cause}"),
            },
            Self::StorageTransient { operation, cause } => Self::StorageFatal {
                operation,
                cause: format!("retries exhausted: {cause}"),
            },
            other => other,
        }
    }
}

/// Result type alias for graphloom operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in seconds.
///
/// Centralized to avoid duplicate implementations across the codebase.
/// Uses `SystemTime::now()` with fallback to 0 if the system clock is
/// before the Unix epoch.
#[must_use]
pub fn current_timestamp() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = Error::MissingProjectId;
        assert_eq!(err.kind(), "MISSING_PROJECT_ID");

        let err = Error::BinaryFileRejected {
            file_name: "payload.java".to_string(),
            reason: "magic bytes".to_string(),
        };
        assert_eq!(err.kind(), "BINARY_FILE_REJECTED");
        assert!(err.to_string().contains("payload.java"));
    }

    #[test]
    fn test_transient_promotion() {
        let err = Error::LlmTransient {
            operation: "generate".to_string(),
            cause: "timeout".to_string(),
        };
        assert!(err.is_transient());

        let fatal = err.into_fatal();
        assert_eq!(fatal.kind(), "LLM_FATAL");
        assert!(!fatal.is_transient());
    }

    #[test]
    fn test_into_fatal_passthrough() {
        let err = Error::CircularMerge {
            target: "AI".to_string(),
        };
        assert_eq!(err.into_fatal().kind(), "CIRCULAR_MERGE");
    }
}
