//! Ingestion pipeline: admission, chunking, extraction, summarization,
//! and the leased scheduler.
//!
//! Data flow per document:
//!
//! ```text
//! submit → [admission: binary/encoding checks] → NOT_PROCESSED
//!   marker → PROCESSING (leased)
//!   processor → chunk → embed → extract (gleaning loop) → summarize
//!             → graph + vector + cache co-storage → PROCESSED
//!   failure → NOT_PROCESSED (attempt counter) → marker retries
//! ```

pub mod extractor;
pub mod ingest;
pub mod scheduler;
pub mod summarizer;

pub use extractor::{ChunkExtraction, DocumentGraph, EntityExtractor, content_hash};
pub use ingest::{admit_document, chunk_document};
pub use scheduler::{IngestionPipeline, ProcessorReport, SchedulerHandle, start_scheduler};
pub use summarizer::DescriptionSummarizer;
