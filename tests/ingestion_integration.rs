//! Ingestion pipeline end-to-end: admission, chunking, extraction with
//! gleaning, caching, and co-storage.

#![allow(clippy::unwrap_used)]

mod common;

use common::{MockLlm, PromptKind, entity_json, test_engine};
use graphloom::models::DocumentStatus;
use graphloom::storage::{DocumentStore, GraphStore};
use std::sync::Arc;
use std::sync::atomic::Ordering;

#[test]
fn ingests_text_into_graph_and_vectors() {
    let llm = Arc::new(MockLlm::new());
    llm.on(
        PromptKind::Extraction,
        "Apple Inc. invests in AI research.",
        r#"{"entities": [
            {"name": "Apple Inc.", "type": "organization", "description": "invests in AI research"},
            {"name": "AI research", "type": "concept", "description": "research field funded by Apple"}
        ], "relations": [
            {"source": "Apple Inc.", "target": "AI research", "keywords": "invests in", "description": "Apple Inc. invests in AI research", "weight": 2.0}
        ]}"#,
    );

    let engine = test_engine(Arc::clone(&llm));
    let project = engine.create_project().unwrap();
    let document = engine
        .submit_text(project, "notes.txt", "Apple Inc. invests in AI research.")
        .unwrap();

    assert_eq!(
        engine.document_status(project, document).unwrap(),
        Some(DocumentStatus::NotProcessed)
    );

    let report = engine.process_pending().unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(
        engine.document_status(project, document).unwrap(),
        Some(DocumentStatus::Processed)
    );

    let store = engine.store();
    let entity = store.get_entity(project, "Apple Inc.").unwrap().unwrap();
    assert!(entity.description.contains("invests in AI research"));
    assert!(!entity.source_chunk_ids.is_empty());
    assert_eq!(entity.source_file_paths, vec!["notes.txt".to_string()]);

    let relations = store
        .get_relations_for_entity(project, "Apple Inc.")
        .unwrap();
    assert_eq!(relations.len(), 1);
    assert_eq!(relations[0].tgt, "AI research");

    // Chunks form a contiguous 0..N sequence.
    let chunks = store.get_chunks_by_document(project, document).unwrap();
    assert!(!chunks.is_empty());
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.order_index, i);
        assert!(!chunk.cache_ids.is_empty());
    }

    let stats = engine.stats(project).unwrap();
    assert_eq!(stats.documents.processed, 1);
    assert!(stats.graph.entity_count >= 2);
    assert!(stats.cache_entries >= 1);
}

#[test]
fn reingesting_identical_content_replays_from_cache() {
    let llm = Arc::new(MockLlm::new());
    llm.on(
        PromptKind::Extraction,
        "Turing founded computer science.",
        &entity_json("Turing", "person", "founded computer science"),
    );

    let engine = test_engine(Arc::clone(&llm));
    let project = engine.create_project().unwrap();

    engine
        .submit_text(project, "d1.txt", "Turing founded computer science.")
        .unwrap();
    engine.process_pending().unwrap();
    let calls_after_first = llm.extraction_calls.load(Ordering::SeqCst);
    assert!(calls_after_first >= 1);

    // Same content in a second document: the extraction cache answers,
    // no new extraction calls are made.
    engine
        .submit_text(project, "d2.txt", "Turing founded computer science.")
        .unwrap();
    engine.process_pending().unwrap();
    assert_eq!(llm.extraction_calls.load(Ordering::SeqCst), calls_after_first);

    // Both documents contribute provenance to the merged entity.
    let entity = engine
        .store()
        .get_entity(project, "Turing")
        .unwrap()
        .unwrap();
    assert_eq!(entity.source_chunk_ids.len(), 2);
    assert_eq!(entity.source_file_paths.len(), 2);
}

#[test]
fn gleaning_adds_missed_entity() {
    let text = "Charlie visited the laboratory where Dr. Strauss conducted the experiment. \
                The facility was funded by the Welberg Foundation.";
    let llm = Arc::new(MockLlm::new());
    llm.on(
        PromptKind::Extraction,
        "Charlie visited the laboratory",
        r#"{"entities": [
            {"name": "Charlie", "type": "person", "description": "visited the laboratory"},
            {"name": "Dr. Strauss", "type": "person", "description": "conducted the experiment"}
        ], "relations": []}"#,
    );
    llm.on(
        PromptKind::Gleaning,
        "Charlie visited the laboratory",
        r#"{"entities": [
            {"name": "Welberg Foundation", "type": "organization", "description": "funded the facility"}
        ], "relations": []}"#,
    );

    let engine = test_engine(Arc::clone(&llm));
    let project = engine.create_project().unwrap();
    engine.submit_text(project, "story.txt", text).unwrap();
    engine.process_pending().unwrap();

    let store = engine.store();
    assert!(store.get_entity(project, "Charlie").unwrap().is_some());
    assert!(store.get_entity(project, "Dr. Strauss").unwrap().is_some());
    // The gleaning pass surfaced the implicit funder.
    assert!(
        store
            .get_entity(project, "Welberg Foundation")
            .unwrap()
            .is_some()
    );
    assert!(llm.gleaning_calls.load(Ordering::SeqCst) >= 1);
}

#[test]
fn binary_upload_is_rejected_without_persisting_anything() {
    let llm = Arc::new(MockLlm::new());
    let engine = test_engine(Arc::clone(&llm));
    let project = engine.create_project().unwrap();

    // CA FE BA BE magic named like a Java source file.
    let payload = [0xca, 0xfe, 0xba, 0xbe, 0x00, 0x00, 0x00, 0x34];
    let err = engine
        .submit_document(project, "payload.java", &payload, None, serde_json::Value::Null)
        .unwrap_err();
    assert_eq!(err.kind(), "BINARY_FILE_REJECTED");

    // No document row, no chunks, no entities were persisted.
    let stats = engine.stats(project).unwrap();
    assert_eq!(stats.documents.not_processed, 0);
    assert_eq!(stats.documents.processed, 0);
    assert_eq!(stats.documents.chunks, 0);
    assert_eq!(stats.graph.entity_count, 0);
    assert!(engine.store().list_documents(project).unwrap().is_empty());
}

#[test]
fn failed_document_reverts_for_retry() {
    struct FailingLlm;
    impl graphloom::llm::LlmClient for FailingLlm {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn generate(
            &self,
            _prompt: &str,
            _max_tokens: u32,
        ) -> graphloom::Result<graphloom::llm::Completion> {
            Err(graphloom::Error::LlmFatal {
                operation: "generate".to_string(),
                cause: "endpoint down".to_string(),
            })
        }
    }

    let engine = graphloom::services::Engine::with_clients(
        common::test_config(),
        Arc::new(FailingLlm),
        Arc::new(common::HashEmbedder),
    )
    .unwrap();
    let project = engine.create_project().unwrap();
    let document = engine
        .submit_text(project, "doomed.txt", "Some content that will fail extraction.")
        .unwrap();

    let report = engine.process_pending().unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.processed, 0);

    // Reverted to NOT_PROCESSED with the attempt recorded.
    let stored = engine
        .store()
        .get_document(project, document)
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, DocumentStatus::NotProcessed);
    assert_eq!(stored.attempts, 1);
}

#[test]
fn code_document_chunks_carry_scope_metadata() {
    let source = "import os\n\ndef handler(event):\n    return process(event)\n";
    let llm = Arc::new(MockLlm::new());
    let engine = test_engine(Arc::clone(&llm));
    let project = engine.create_project().unwrap();

    let document = engine
        .submit_document(project, "handler.py", source.as_bytes(), None, serde_json::Value::Null)
        .unwrap();
    engine.process_pending().unwrap();

    let chunks = engine
        .store()
        .get_chunks_by_document(project, document)
        .unwrap();
    assert!(!chunks.is_empty());
    let meta = chunks[0].code_meta.as_ref().unwrap();
    assert_eq!(meta.language, "python");
    assert!(meta.start_line >= 1);
}
