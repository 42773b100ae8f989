//! Backend traits for the four project-scoped stores.

pub mod cache;
pub mod documents;
pub mod graph;
pub mod vector;

pub use cache::ExtractionCacheStore;
pub use documents::{DocumentCounts, DocumentStore};
pub use graph::GraphStore;
pub use vector::{ChunkEmbedding, EntityEmbedding, VectorFilter, VectorHit, VectorStore};
