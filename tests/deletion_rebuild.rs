//! Document deletion and knowledge rebuild from the extraction cache.

#![allow(clippy::unwrap_used)]

mod common;

use common::{MockLlm, PromptKind, test_engine};
use graphloom::storage::{DocumentStore, GraphStore};
use std::sync::Arc;
use std::sync::atomic::Ordering;

const D1_TEXT: &str = "Turing broke the Enigma cipher at Bletchley Park.";
const D2_TEXT: &str = "Turing proposed the imitation game in 1950.";

fn llm_with_turing_rules() -> Arc<MockLlm> {
    let llm = Arc::new(MockLlm::new());
    llm.on(
        PromptKind::Extraction,
        "broke the Enigma cipher",
        r#"{"entities": [
            {"name": "Turing", "type": "person", "description": "broke the Enigma cipher"},
            {"name": "Bletchley Park", "type": "location", "description": "wartime codebreaking site"}
        ], "relations": [
            {"source": "Turing", "target": "Bletchley Park", "keywords": "worked at", "description": "Turing worked at Bletchley Park", "weight": 1.0}
        ]}"#,
    );
    llm.on(
        PromptKind::Extraction,
        "imitation game",
        r#"{"entities": [
            {"name": "Turing", "type": "person", "description": "proposed the imitation game"}
        ], "relations": []}"#,
    );
    llm
}

#[test]
fn deleting_one_document_rebuilds_the_shared_entity() {
    let llm = llm_with_turing_rules();
    let engine = test_engine(Arc::clone(&llm));
    let project = engine.create_project().unwrap();

    let d1 = engine.submit_text(project, "war.txt", D1_TEXT).unwrap();
    let d2 = engine.submit_text(project, "paper.txt", D2_TEXT).unwrap();
    engine.process_pending().unwrap();

    let store = engine.store();
    let before = store.get_entity(project, "Turing").unwrap().unwrap();
    assert_eq!(before.source_chunk_ids.len(), 2);

    let d2_chunks: Vec<uuid::Uuid> = store
        .get_chunks_by_document(project, d2)
        .unwrap()
        .iter()
        .map(|c| c.id)
        .collect();

    let extraction_calls_before = llm.extraction_calls.load(Ordering::SeqCst);
    let cache_before = engine.stats(project).unwrap().cache_entries;

    let (report, _usage) = engine.delete_document(project, d1, false).unwrap();
    assert!(report.entities_rebuilt.contains(&"Turing".to_string()));
    // Bletchley Park had only D1 as a source: fully deleted, along with
    // its relation.
    assert!(report.entities_deleted.contains(&"Bletchley Park".to_string()));
    assert!(report.relations_deleted >= 1);
    assert!(report.chunks_deleted >= 1);

    // Turing survives, sourced only from D2's chunks.
    let after = store.get_entity(project, "Turing").unwrap().unwrap();
    assert_eq!(after.source_chunk_ids, d2_chunks);
    assert!(after.description.contains("imitation game"));
    assert!(!after.description.contains("Enigma"));

    // Rebuild issued no new extraction calls and created no new
    // extraction cache rows.
    assert_eq!(
        llm.extraction_calls.load(Ordering::SeqCst),
        extraction_calls_before
    );
    assert!(engine.stats(project).unwrap().cache_entries <= cache_before);

    // The document and its chunks are gone.
    assert!(store.get_document(project, d1).unwrap().is_none());
    assert!(store.get_chunks_by_document(project, d1).unwrap().is_empty());
}

#[test]
fn skip_rebuild_deletes_everything_the_document_touched() {
    let llm = llm_with_turing_rules();
    let engine = test_engine(Arc::clone(&llm));
    let project = engine.create_project().unwrap();

    let d1 = engine.submit_text(project, "war.txt", D1_TEXT).unwrap();
    engine.submit_text(project, "paper.txt", D2_TEXT).unwrap();
    engine.process_pending().unwrap();

    let store = engine.store();
    let d1_chunks: Vec<uuid::Uuid> = store
        .get_chunks_by_document(project, d1)
        .unwrap()
        .iter()
        .map(|c| c.id)
        .collect();

    let (report, _usage) = engine.delete_document(project, d1, true).unwrap();
    assert!(report.entities_deleted.contains(&"Turing".to_string()));
    assert!(report.entities_rebuilt.is_empty());

    // No surviving entity or relation references any deleted chunk.
    for entity in store.get_all_entities(project).unwrap() {
        for chunk_id in &entity.source_chunk_ids {
            assert!(!d1_chunks.contains(chunk_id));
        }
    }
    for relation in store.get_all_relations(project).unwrap() {
        for chunk_id in &relation.source_chunk_ids {
            assert!(!d1_chunks.contains(chunk_id));
        }
    }
}

#[test]
fn deleting_sole_document_empties_the_graph() {
    let llm = llm_with_turing_rules();
    let engine = test_engine(Arc::clone(&llm));
    let project = engine.create_project().unwrap();

    let d1 = engine.submit_text(project, "war.txt", D1_TEXT).unwrap();
    engine.process_pending().unwrap();
    assert!(engine.stats(project).unwrap().graph.entity_count >= 2);

    engine.delete_document(project, d1, false).unwrap();

    let stats = engine.stats(project).unwrap();
    assert_eq!(stats.graph.entity_count, 0);
    assert_eq!(stats.graph.relation_count, 0);
    assert_eq!(stats.documents.chunks, 0);
    // Cache entries survive chunk deletion with their chunk link nulled.
    assert!(stats.cache_entries >= 1);
}

#[test]
fn deleting_missing_document_is_rejected_cleanly() {
    let llm = Arc::new(MockLlm::new());
    let engine = test_engine(Arc::clone(&llm));
    let project = engine.create_project().unwrap();
    let err = engine
        .delete_document(project, uuid::Uuid::now_v7(), false)
        .unwrap_err();
    assert_eq!(err.kind(), "INVALID_INPUT");
}
