//! Query pipeline: keyword extraction, five retrieval modes, budgeted
//! context assembly, optional reranking, and synthesis.
//!
//! Data flow:
//!
//! ```text
//! query → keywords (C10, cached) → mode executor (C11)
//!       → {graph store, vector store} → context merger (C12)
//!       → reranker? (C13, identity fallback) → synthesizer (C18)
//!       → answer + citations
//! ```

pub mod context;
pub mod executor;
pub mod keywords;
pub mod rerank;
pub mod synthesize;

pub use context::{BudgetedSection, ContextItem, ContextSource, MergedContext, assemble, merge};
pub use executor::{QueryExecutor, QueryRequest};
pub use keywords::KeywordExtractor;
pub use rerank::{HttpRerankProvider, RerankOutcome, RerankProvider, RerankedItem, Reranker};
pub use synthesize::Synthesizer;
