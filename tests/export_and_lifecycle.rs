//! Project lifecycle, export, and the background scheduler.

#![allow(clippy::unwrap_used)]

mod common;

use common::{MockLlm, PromptKind, entity_json, test_engine};
use graphloom::models::DocumentStatus;
use graphloom::services::ExportFormat;
use graphloom::storage::{DocumentStore, GraphStore};
use std::sync::Arc;

#[test]
fn export_streams_entities_and_relations() {
    let llm = Arc::new(MockLlm::new());
    llm.on(
        PromptKind::Extraction,
        "Ada wrote the first program for the Analytical Engine.",
        r#"{"entities": [
            {"name": "Ada", "type": "person", "description": "wrote the first program"},
            {"name": "Analytical Engine", "type": "technology", "description": "early mechanical computer"}
        ], "relations": [
            {"source": "Ada", "target": "Analytical Engine", "keywords": "programmed", "description": "Ada programmed the Analytical Engine", "weight": 1.0}
        ]}"#,
    );

    let engine = test_engine(Arc::clone(&llm));
    let project = engine.create_project().unwrap();
    engine
        .submit_text(
            project,
            "ada.txt",
            "Ada wrote the first program for the Analytical Engine.",
        )
        .unwrap();
    engine.process_pending().unwrap();

    let mut json_out = Vec::new();
    let stats = engine
        .export(project, ExportFormat::Json, &mut json_out)
        .unwrap();
    assert_eq!(stats.entities, 2);
    assert_eq!(stats.relations, 1);

    let parsed: serde_json::Value = serde_json::from_slice(&json_out).unwrap();
    assert_eq!(parsed["entities"].as_array().unwrap().len(), 2);
    assert_eq!(parsed["relations"].as_array().unwrap().len(), 1);
    assert_eq!(parsed["relations"][0]["src"], "Ada");

    let mut csv_out = Vec::new();
    engine
        .export(project, ExportFormat::Csv, &mut csv_out)
        .unwrap();
    let csv_text = String::from_utf8(csv_out).unwrap();
    assert!(csv_text.lines().count() >= 4); // header + 2 entities + 1 relation
    assert!(csv_text.contains("entity,Ada"));
    assert!(csv_text.contains("relation,Ada,Analytical Engine"));

    assert_eq!(ExportFormat::Json.content_type(), "application/json");
    assert_eq!(ExportFormat::Csv.content_type(), "text/csv");
}

#[test]
fn dropping_a_project_cascades_over_everything_it_owns() {
    let llm = Arc::new(MockLlm::new());
    llm.on(
        PromptKind::Extraction,
        "Hopper invented the compiler.",
        &entity_json("Hopper", "person", "invented the compiler"),
    );

    let engine = test_engine(Arc::clone(&llm));
    let doomed = engine.create_project().unwrap();
    let survivor = engine.create_project().unwrap();

    engine
        .submit_text(doomed, "h.txt", "Hopper invented the compiler.")
        .unwrap();
    engine
        .submit_text(survivor, "h.txt", "Hopper invented the compiler.")
        .unwrap();
    engine.process_pending().unwrap();

    engine.drop_project(doomed).unwrap();

    let store = engine.store();
    assert!(!store.project_exists(doomed).unwrap());
    assert!(!store.graph_exists(doomed).unwrap());
    assert!(store.list_documents(doomed).unwrap().is_empty());
    let stats = engine.stats(doomed).unwrap();
    assert_eq!(stats.graph.entity_count, 0);
    assert_eq!(stats.cache_entries, 0);

    // The other tenant is untouched.
    assert!(store.get_entity(survivor, "Hopper").unwrap().is_some());
    assert_eq!(engine.stats(survivor).unwrap().documents.processed, 1);
}

#[test]
fn file_backed_store_survives_reopen() {
    let llm = Arc::new(MockLlm::new());
    llm.on(
        PromptKind::Extraction,
        "Lovelace annotated the translation.",
        &entity_json("Lovelace", "person", "annotated the translation"),
    );

    let dir = tempfile::TempDir::new().unwrap();
    let db_path = dir.path().join("graphloom.db");
    let mut config = common::test_config();
    config.storage.path = Some(db_path.clone());

    let project;
    {
        let engine = graphloom::services::Engine::with_clients(
            config.clone(),
            Arc::clone(&llm) as Arc<dyn graphloom::llm::LlmClient>,
            Arc::new(common::HashEmbedder),
        )
        .unwrap();
        project = engine.create_project().unwrap();
        engine
            .submit_text(project, "notes.txt", "Lovelace annotated the translation.")
            .unwrap();
        engine.process_pending().unwrap();
    }

    // A fresh engine over the same file sees the persisted graph.
    let reopened = graphloom::services::Engine::with_clients(
        config,
        Arc::clone(&llm) as Arc<dyn graphloom::llm::LlmClient>,
        Arc::new(common::HashEmbedder),
    )
    .unwrap();
    assert!(
        reopened
            .store()
            .get_entity(project, "Lovelace")
            .unwrap()
            .is_some()
    );
    assert_eq!(reopened.stats(project).unwrap().documents.processed, 1);
}

#[test]
fn background_scheduler_processes_submissions() {
    let llm = Arc::new(MockLlm::new());
    llm.on(
        PromptKind::Extraction,
        "Shannon founded information theory.",
        &entity_json("Shannon", "person", "founded information theory"),
    );

    let mut config = common::test_config();
    config.schedule.marking_secs = 1;
    config.schedule.processing_secs = 1;
    let engine = graphloom::services::Engine::with_clients(
        config,
        Arc::clone(&llm) as Arc<dyn graphloom::llm::LlmClient>,
        Arc::new(common::HashEmbedder),
    )
    .unwrap();

    let project = engine.create_project().unwrap();
    let document = engine
        .submit_text(project, "it.txt", "Shannon founded information theory.")
        .unwrap();

    let handle = engine.start_scheduler();
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(15);
    let mut status = engine.document_status(project, document).unwrap();
    while status != Some(DocumentStatus::Processed) && std::time::Instant::now() < deadline {
        std::thread::sleep(std::time::Duration::from_millis(100));
        status = engine.document_status(project, document).unwrap();
    }
    handle.stop();

    assert_eq!(status, Some(DocumentStatus::Processed));
    assert!(
        engine
            .store()
            .get_entity(project, "Shannon")
            .unwrap()
            .is_some()
    );
}
