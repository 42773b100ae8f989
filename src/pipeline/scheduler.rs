//! Leased ingestion scheduling (C14).
//!
//! Two cooperating jobs:
//!
//! 1. **Marker**: claims up to `batch_size` pending documents under a
//!    row-level lease (`NOT_PROCESSED → PROCESSING`, ordered by creation
//!    time).
//! 2. **Processor**: drives each claimed document through chunking,
//!    embedding, extraction, summarization, and co-storage. Success ends
//!    in `PROCESSED`; any failure reverts the document to `NOT_PROCESSED`
//!    with an incremented attempt counter so the marker retries it.
//!
//! Each job runs on its own single thread, so an instance never overlaps
//! itself; horizontal parallelism comes from running more processors,
//! each claiming distinct documents via the lease.

use crate::config::{ChunkingConfig, ScheduleConfig};
use crate::llm::EmbeddingClient;
use crate::models::{Document, DocumentStatus, Entity, Relation};
use crate::pipeline::extractor::{DocumentGraph, EntityExtractor};
use crate::pipeline::ingest::chunk_document;
use crate::pipeline::summarizer::DescriptionSummarizer;
use crate::services::{TokenOp, TokenTracker};
use crate::storage::{
    ChunkEmbedding, DocumentStore, EntityEmbedding, GraphStore, SqliteStore, VectorStore,
};
use crate::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Outcome of one processor pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessorReport {
    /// Documents fully ingested this pass.
    pub processed: usize,
    /// Documents reverted for retry.
    pub failed: usize,
    /// Documents recovered via the vector pre-check.
    pub recovered: usize,
}

/// The ingestion pipeline: everything a processor needs to take one
/// document from `PROCESSING` to `PROCESSED`.
pub struct IngestionPipeline {
    store: Arc<SqliteStore>,
    embedder: Arc<dyn EmbeddingClient>,
    extractor: EntityExtractor,
    summarizer: DescriptionSummarizer,
    chunking: ChunkingConfig,
    schedule: ScheduleConfig,
    embedding_batch: usize,
    worker_id: String,
}

impl IngestionPipeline {
    /// Creates a pipeline bound to one worker identity.
    #[must_use]
    pub fn new(
        store: Arc<SqliteStore>,
        embedder: Arc<dyn EmbeddingClient>,
        extractor: EntityExtractor,
        summarizer: DescriptionSummarizer,
        chunking: ChunkingConfig,
        schedule: ScheduleConfig,
        embedding_batch: usize,
    ) -> Self {
        let worker_id = format!("worker-{}-{}", std::process::id(), uuid::Uuid::now_v7());
        Self {
            store,
            embedder,
            extractor,
            summarizer,
            chunking,
            schedule,
            embedding_batch: embedding_batch.max(1),
            worker_id,
        }
    }

    /// Marker pass: leases a batch of pending documents.
    ///
    /// # Errors
    ///
    /// Returns an error if the claim fails.
    pub fn mark_pending(&self) -> Result<Vec<Document>> {
        let claimed = self.store.claim_pending(
            self.schedule.batch_size,
            &self.worker_id,
            self.schedule.max_attempts,
        )?;
        if !claimed.is_empty() {
            tracing::info!(count = claimed.len(), worker = %self.worker_id, "documents claimed");
            metrics::counter!("ingestion_documents_claimed_total").increment(claimed.len() as u64);
        }
        Ok(claimed)
    }

    /// Processor pass: runs every document this worker has claimed.
    ///
    /// # Errors
    ///
    /// Returns an error if the claimed-document listing fails; per-document
    /// failures are absorbed into the report.
    pub fn process_claimed(&self) -> Result<ProcessorReport> {
        let documents = self.store.list_processing(Some(&self.worker_id))?;
        let mut report = ProcessorReport::default();

        for document in documents {
            let span = tracing::info_span!(
                "ingest.document",
                document = %document.id,
                project = %document.project_id
            );
            let _enter = span.enter();

            match self.process_document(&document) {
                Ok(recovered) => {
                    if recovered {
                        report.recovered += 1;
                    } else {
                        report.processed += 1;
                    }
                    metrics::counter!("ingestion_documents_processed_total").increment(1);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "document processing failed, reverting for retry");
                    metrics::counter!("ingestion_documents_failed_total").increment(1);
                    report.failed += 1;
                    if let Err(revert_err) = self.store.record_failure(document.id) {
                        tracing::error!(error = %revert_err, "failed to revert document status");
                    }
                }
            }
        }
        Ok(report)
    }

    /// One-shot convenience: mark, then process. Used by the CLI and by
    /// tests that do not want background threads.
    ///
    /// # Errors
    ///
    /// Returns an error if marking or listing fails.
    pub fn run_pending(&self) -> Result<ProcessorReport> {
        self.mark_pending()?;
        self.process_claimed()
    }

    /// Drives one claimed document to `PROCESSED`. Returns true when the
    /// vector pre-check short-circuited (recovery).
    fn process_document(&self, document: &Document) -> Result<bool> {
        let project = document.project_id;

        // Recovery pre-check: vectors already present means a previous run
        // finished the heavy work but died before flipping the status.
        if self.store.has_document_vectors(project, document.id)? {
            tracing::info!("vectors already present, marking processed (recovery)");
            self.store
                .set_status(document.id, DocumentStatus::Processing, DocumentStatus::Processed)?;
            return Ok(true);
        }

        self.store.ensure_graph(project)?;

        let tracker = TokenTracker::new();
        let chunks = chunk_document(document, &self.chunking);
        if chunks.is_empty() {
            tracing::warn!("document produced no chunks");
            self.store
                .set_status(document.id, DocumentStatus::Processing, DocumentStatus::Processed)?;
            return Ok(false);
        }
        self.store.insert_chunks(&chunks)?;

        // Embed chunk contents in endpoint-sized batches.
        let mut rows = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.embedding_batch) {
            let inputs: Vec<&str> = batch.iter().map(|c| c.content.as_str()).collect();
            let embedded = self.embedder.embed(&inputs)?;
            tracker.record(TokenOp::Embedding, "embedding", embedded.usage);
            for (chunk, embedding) in batch.iter().zip(embedded.vectors) {
                rows.push(ChunkEmbedding {
                    chunk_id: chunk.id,
                    document_id: document.id,
                    content: chunk.content.clone(),
                    embedding,
                    metadata: serde_json::json!({
                        "file_name": document.file_name,
                        "chunk_index": chunk.order_index,
                    }),
                });
            }
        }
        self.store.upsert_chunks(project, &rows)?;

        // Extract entities/relations per chunk, in order, accumulating
        // over the document.
        let mut graph = DocumentGraph::new();
        for chunk in &chunks {
            let extraction =
                self.extractor
                    .extract_chunk(project, chunk, &document.file_name, &tracker)?;
            for warning in &extraction.warnings {
                tracing::debug!(chunk = %chunk.id, warning, "extraction warning");
            }
            for cache_id in &extraction.cache_ids {
                self.store.attach_cache_id(chunk.id, *cache_id)?;
            }
            graph.absorb(extraction);
        }

        if graph.is_empty() {
            tracing::info!("no entities extracted");
            self.store
                .set_status(document.id, DocumentStatus::Processing, DocumentStatus::Processed)?;
            return Ok(false);
        }

        // Summarize accumulated descriptions and upsert the document's
        // subgraph in one batch each.
        let mut entities = Vec::new();
        for accumulated in graph.entities() {
            let description = self.summarizer.summarize(
                project,
                &accumulated.name,
                &accumulated.descriptions,
                &tracker,
            )?;
            let mut entity = Entity::new(
                accumulated.name.clone(),
                accumulated.entity_type.clone(),
                description,
            );
            entity.source_chunk_ids = accumulated.chunk_ids.clone();
            entity.source_file_paths = accumulated.file_paths.clone();
            entities.push(entity);
        }
        GraphStore::upsert_entities(self.store.as_ref(), project, &entities)?;

        let mut relations = Vec::new();
        for accumulated in graph.relations() {
            let description = self.summarizer.summarize(
                project,
                &format!("{} -> {}", accumulated.src, accumulated.tgt),
                &accumulated.descriptions,
                &tracker,
            )?;
            let mut relation = Relation::new(
                accumulated.src.clone(),
                accumulated.tgt.clone(),
                accumulated.keywords.clone(),
                description,
                accumulated.weight,
            );
            relation.source_chunk_ids = accumulated.chunk_ids.clone();
            relation.source_file_paths = accumulated.file_paths.clone();
            relations.push(relation);
        }
        self.store.upsert_relations(project, &relations)?;

        // Entity-summary embeddings power LOCAL mode retrieval.
        let mut entity_rows = Vec::with_capacity(entities.len());
        for batch in entities.chunks(self.embedding_batch) {
            let contents: Vec<String> = batch
                .iter()
                .map(|e| format!("{}\n{}", e.name, e.description))
                .collect();
            let inputs: Vec<&str> = contents.iter().map(String::as_str).collect();
            let embedded = self.embedder.embed(&inputs)?;
            tracker.record(TokenOp::Embedding, "embedding", embedded.usage);
            for ((entity, content), embedding) in
                batch.iter().zip(&contents).zip(embedded.vectors)
            {
                entity_rows.push(EntityEmbedding {
                    entity_name: entity.name.clone(),
                    content: content.clone(),
                    embedding,
                });
            }
        }
        VectorStore::upsert_entities(self.store.as_ref(), project, &entity_rows)?;

        self.store
            .set_status(document.id, DocumentStatus::Processing, DocumentStatus::Processed)?;

        let usage = tracker.summary();
        tracing::info!(
            chunks = chunks.len(),
            entities = entities.len(),
            relations = relations.len(),
            tokens = usage.total(),
            "document processed"
        );
        Ok(false)
    }

}

/// Handle for the background scheduler threads.
pub struct SchedulerHandle {
    shutdown: Arc<AtomicBool>,
    threads: Vec<std::thread::JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Signals shutdown and joins both jobs.
    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }

    /// Returns the shutdown flag for signal handlers.
    #[must_use]
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }
}

/// Starts the marker and processor jobs on background threads.
#[must_use]
pub fn start_scheduler(pipeline: Arc<IngestionPipeline>) -> SchedulerHandle {
    let shutdown = Arc::new(AtomicBool::new(false));
    let marking = Duration::from_secs(pipeline.schedule.marking_secs.max(1));
    let processing = Duration::from_secs(pipeline.schedule.processing_secs.max(1));

    let marker = {
        let pipeline = Arc::clone(&pipeline);
        let shutdown = Arc::clone(&shutdown);
        std::thread::spawn(move || {
            while !shutdown.load(Ordering::SeqCst) {
                if let Err(err) = pipeline.mark_pending() {
                    tracing::warn!(error = %err, "marker pass failed");
                }
                sleep_with_shutdown(marking, &shutdown);
            }
        })
    };

    let processor = {
        let pipeline = Arc::clone(&pipeline);
        let shutdown = Arc::clone(&shutdown);
        std::thread::spawn(move || {
            while !shutdown.load(Ordering::SeqCst) {
                match pipeline.process_claimed() {
                    Ok(report) if report.processed + report.failed + report.recovered > 0 => {
                        tracing::info!(
                            processed = report.processed,
                            failed = report.failed,
                            recovered = report.recovered,
                            "processor pass complete"
                        );
                    }
                    Ok(_) => {}
                    Err(err) => tracing::warn!(error = %err, "processor pass failed"),
                }
                sleep_with_shutdown(processing, &shutdown);
            }
        })
    };

    SchedulerHandle {
        shutdown,
        threads: vec![marker, processor],
    }
}

/// Sleeps in short slices so shutdown stays responsive.
fn sleep_with_shutdown(total: Duration, shutdown: &AtomicBool) {
    let slice = Duration::from_millis(100);
    let mut remaining = total;
    while remaining > Duration::ZERO && !shutdown.load(Ordering::SeqCst) {
        let nap = remaining.min(slice);
        std::thread::sleep(nap);
        remaining = remaining.saturating_sub(nap);
    }
}
