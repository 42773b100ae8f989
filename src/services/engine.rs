//! The engine facade: the public API external collaborators consume.
//!
//! Wires the configured storage backend, LLM/embedding clients (behind
//! the resilience wrapper), the ingestion pipeline, the query executor,
//! and the deletion/merge/export services into one handle. Every
//! LLM-touching call returns token counters alongside its result.

use crate::config::GraphLoomConfig;
use crate::llm::{
    EmbeddingClient, LlmClient, LlmResilienceConfig, OpenAiChatClient, OpenAiEmbeddingClient,
    ResilientLlmClient,
};
use crate::models::{
    DocumentStatus, DocumentType, GraphStats, ProjectId, QueryMode, QueryResponse,
};
use crate::pipeline::{
    DescriptionSummarizer, EntityExtractor, IngestionPipeline, ProcessorReport, SchedulerHandle,
    admit_document, start_scheduler,
};
use crate::query::{
    KeywordExtractor, QueryExecutor, QueryRequest, Reranker, Synthesizer,
};
use crate::services::deletion::{DeletionReport, DeletionService};
use crate::services::export::{ExportFormat, ExportService, ExportStats};
use crate::services::merge::{
    MergeReport, MergeService, MergeStrategy, TargetOverrides, target_embedding_content,
};
use crate::services::tokens::{TokenOp, TokenTracker, TokenUsageSummary};
use crate::storage::{
    DocumentCounts, DocumentStore, EntityEmbedding, ExtractionCacheStore, GraphStore, SqliteStore,
    VectorStore, open_store,
};
use crate::text::Tokenizer;
use crate::Result;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Per-project observability counters.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectStats {
    /// Document and chunk counts.
    pub documents: DocumentCounts,
    /// Graph vertex/edge counts.
    pub graph: GraphStats,
    /// Extraction-cache entries.
    pub cache_entries: usize,
}

/// The multi-tenant GraphRAG engine.
pub struct Engine {
    config: GraphLoomConfig,
    store: Arc<SqliteStore>,
    embedder: Arc<dyn EmbeddingClient>,
    pipeline: Arc<IngestionPipeline>,
    executor: QueryExecutor,
    deletion: DeletionService,
    merge: MergeService,
    export: ExportService,
}

impl Engine {
    /// Opens the engine against real LLM/embedding endpoints from the
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage backend cannot be opened.
    pub fn open(config: GraphLoomConfig) -> Result<Self> {
        let chat = OpenAiChatClient::from_config(&config.llm);
        let resilient = ResilientLlmClient::new(chat, LlmResilienceConfig::from_config(&config.llm));
        let llm: Arc<dyn LlmClient> = Arc::new(resilient);
        let embedder: Arc<dyn EmbeddingClient> =
            Arc::new(OpenAiEmbeddingClient::from_config(&config.embedding, &config.llm));
        Self::with_clients(config, llm, embedder)
    }

    /// Opens the engine with injected clients (tests, alternative
    /// providers).
    ///
    /// # Errors
    ///
    /// Returns an error if the storage backend cannot be opened.
    pub fn with_clients(
        config: GraphLoomConfig,
        llm: Arc<dyn LlmClient>,
        embedder: Arc<dyn EmbeddingClient>,
    ) -> Result<Self> {
        let store = open_store(&config)?;
        let cache: Arc<dyn ExtractionCacheStore> = store.clone();
        let tokenizer = Tokenizer::new(config.chunking.chars_per_token);

        let summarizer = Arc::new(DescriptionSummarizer::new(
            Arc::clone(&llm),
            Arc::clone(&cache),
            tokenizer,
            config.description.clone(),
        ));
        let extractor = EntityExtractor::new(
            Arc::clone(&llm),
            Arc::clone(&cache),
            config.extraction.gleaning_max_passes,
            config.llm.max_tokens,
        );
        let pipeline = Arc::new(IngestionPipeline::new(
            Arc::clone(&store),
            Arc::clone(&embedder),
            extractor,
            DescriptionSummarizer::new(
                Arc::clone(&llm),
                Arc::clone(&cache),
                tokenizer,
                config.description.clone(),
            ),
            config.chunking,
            config.schedule,
            config.embedding.batch_size,
        ));

        let keywords = KeywordExtractor::new(Arc::clone(&llm), Arc::clone(&cache), &config.query);
        let reranker = Reranker::from_config(&config.rerank);
        let synthesizer = Synthesizer::new(Arc::clone(&llm), config.llm.max_tokens);
        let executor = QueryExecutor::new(
            Arc::clone(&store),
            Arc::clone(&embedder),
            keywords,
            reranker,
            synthesizer,
            &config,
        );

        let deletion = DeletionService::new(
            Arc::clone(&store),
            Arc::clone(&summarizer),
            config.description.separator.clone(),
        );
        let merge = MergeService::new(
            Arc::clone(&store),
            summarizer,
            config.description.separator.clone(),
            config.entity.max_source_ids,
        );
        let export = ExportService::new(Arc::clone(&store), config.graph.batch_size);

        Ok(Self {
            config,
            store,
            embedder,
            pipeline,
            executor,
            deletion,
            merge,
            export,
        })
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &GraphLoomConfig {
        &self.config
    }

    /// Direct store access (exports, maintenance tooling).
    #[must_use]
    pub fn store(&self) -> Arc<SqliteStore> {
        Arc::clone(&self.store)
    }

    // ========================================================================
    // Project lifecycle
    // ========================================================================

    /// Creates a fresh project with its graph namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage writes fail.
    pub fn create_project(&self) -> Result<ProjectId> {
        let project = ProjectId::generate();
        self.store.create_project(project)?;
        self.store.ensure_graph(project)?;
        tracing::info!(%project, "project created");
        Ok(project)
    }

    /// Registers an externally assigned project id. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage writes fail.
    pub fn ensure_project(&self, project: ProjectId) -> Result<()> {
        self.store.create_project(project)?;
        self.store.ensure_graph(project)
    }

    /// Destroys a project and everything it owns.
    ///
    /// # Errors
    ///
    /// Returns an error if the cascade fails.
    pub fn drop_project(&self, project: ProjectId) -> Result<()> {
        self.store.delete_project(project)?;
        tracing::info!(%project, "project dropped");
        Ok(())
    }

    // ========================================================================
    // Ingestion API
    // ========================================================================

    /// Submits a document for ingestion. Admission rejects binary
    /// payloads and undecodable text before anything is persisted.
    ///
    /// # Errors
    ///
    /// `BINARY_FILE_REJECTED`, `ENCODING_ERROR`, `INVALID_INPUT`, or a
    /// storage failure.
    pub fn submit_document(
        &self,
        project: ProjectId,
        file_name: &str,
        bytes: &[u8],
        declared: Option<DocumentType>,
        metadata: serde_json::Value,
    ) -> Result<Uuid> {
        if !self.store.project_exists(project)? {
            return Err(crate::Error::InvalidInput(format!(
                "project {project} does not exist"
            )));
        }
        let document = admit_document(project, file_name, bytes, declared, metadata)?;
        let id = document.id;
        self.store.insert_document(&document)?;
        tracing::info!(%project, document = %id, file = file_name, "document submitted");
        Ok(id)
    }

    /// Submits inline text as a `TEXT` document.
    ///
    /// # Errors
    ///
    /// Same as [`Engine::submit_document`].
    pub fn submit_text(&self, project: ProjectId, label: &str, text: &str) -> Result<Uuid> {
        self.submit_document(
            project,
            label,
            text.as_bytes(),
            Some(DocumentType::Text),
            serde_json::Value::Null,
        )
    }

    /// Current status of a document.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    pub fn document_status(
        &self,
        project: ProjectId,
        document_id: Uuid,
    ) -> Result<Option<DocumentStatus>> {
        Ok(self
            .store
            .get_document(project, document_id)?
            .map(|d| d.status))
    }

    /// Runs one mark+process cycle synchronously.
    ///
    /// # Errors
    ///
    /// Returns an error if marking or listing fails.
    pub fn process_pending(&self) -> Result<ProcessorReport> {
        self.pipeline.run_pending()
    }

    /// Starts the background marker/processor scheduler.
    #[must_use]
    pub fn start_scheduler(&self) -> SchedulerHandle {
        start_scheduler(Arc::clone(&self.pipeline))
    }

    // ========================================================================
    // Query API
    // ========================================================================

    /// Answers a query; returns the response and the request's token
    /// counters.
    ///
    /// # Errors
    ///
    /// `MISSING_PROJECT_ID`, `GRAPH_NOT_FOUND`, or LLM/storage failures.
    pub fn query(
        &self,
        project: Option<ProjectId>,
        query: &str,
        mode: QueryMode,
        enable_rerank: Option<bool>,
    ) -> Result<(QueryResponse, TokenUsageSummary)> {
        let tracker = TokenTracker::new();
        let request = QueryRequest {
            project,
            query: query.to_string(),
            mode,
            enable_rerank,
        };
        let response = self.executor.execute(&request, &tracker)?;
        Ok((response, tracker.summary()))
    }

    // ========================================================================
    // Deletion API
    // ========================================================================

    /// Deletes a document, rebuilding shared knowledge from cache unless
    /// `skip_rebuild` is set. Returns the rebuild report and token
    /// counters (summarization only).
    ///
    /// # Errors
    ///
    /// `INVALID_INPUT` for a missing document; storage failures roll
    /// back.
    pub fn delete_document(
        &self,
        project: ProjectId,
        document_id: Uuid,
        skip_rebuild: bool,
    ) -> Result<(DeletionReport, TokenUsageSummary)> {
        let tracker = TokenTracker::new();
        let report = self
            .deletion
            .delete_document(project, document_id, skip_rebuild, &tracker)?;
        Ok((report, tracker.summary()))
    }

    // ========================================================================
    // Merge API
    // ========================================================================

    /// Merges entities, then refreshes the target's embedding
    /// (best-effort).
    ///
    /// # Errors
    ///
    /// `CIRCULAR_MERGE`, `INVALID_INPUT`, or storage/LLM failures.
    pub fn merge_entities(
        &self,
        project: ProjectId,
        sources: &[String],
        target: &str,
        strategy: MergeStrategy,
        overrides: &TargetOverrides,
    ) -> Result<(MergeReport, TokenUsageSummary)> {
        let tracker = TokenTracker::new();
        let report = self
            .merge
            .merge_entities(project, sources, target, strategy, overrides, &tracker)?;

        // Refresh the target's entity embedding so LOCAL retrieval sees
        // the merged description. Failure here never undoes the merge.
        if let Ok(Some(entity)) = self.store.get_entity(project, target) {
            let content = target_embedding_content(&entity);
            match self.embedder.embed(&[content.as_str()]) {
                Ok(batch) => {
                    tracker.record(TokenOp::Embedding, "embedding", batch.usage);
                    if let Some(embedding) = batch.vectors.into_iter().next()
                        && let Err(err) = VectorStore::upsert_entities(
                            self.store.as_ref(),
                            project,
                            &[EntityEmbedding {
                                entity_name: entity.name.clone(),
                                content,
                                embedding,
                            }],
                        )
                    {
                        tracing::warn!(error = %err, "target embedding refresh failed");
                    }
                }
                Err(err) => tracing::warn!(error = %err, "target embedding refresh failed"),
            }
        }

        Ok((report, tracker.summary()))
    }

    // ========================================================================
    // Export API
    // ========================================================================

    /// Streams the project's graph to `writer`.
    ///
    /// # Errors
    ///
    /// Returns an error on storage or I/O failure.
    pub fn export(
        &self,
        project: ProjectId,
        format: ExportFormat,
        writer: &mut dyn std::io::Write,
    ) -> Result<ExportStats> {
        self.export.export(project, format, writer)
    }

    // ========================================================================
    // Observability
    // ========================================================================

    /// Per-project counters.
    ///
    /// # Errors
    ///
    /// Returns an error if a count read fails.
    pub fn stats(&self, project: ProjectId) -> Result<ProjectStats> {
        Ok(ProjectStats {
            documents: self.store.counts(project)?,
            graph: self.store.get_stats(project)?,
            cache_entries: ExtractionCacheStore::count(self.store.as_ref(), project)?,
        })
    }
}
