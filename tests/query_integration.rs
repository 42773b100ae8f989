//! Query pipeline end-to-end: mode retrieval, project isolation, and
//! reranker fallback.

#![allow(clippy::unwrap_used)]

mod common;

use common::{MockLlm, PromptKind, test_engine};
use graphloom::models::{ProjectId, QueryMode};
use std::sync::Arc;

fn seeded_engine() -> (graphloom::services::Engine, Arc<MockLlm>, ProjectId, ProjectId) {
    let llm = Arc::new(MockLlm::new());
    llm.on(
        PromptKind::Extraction,
        "Apple Inc. invests in AI research.",
        r#"{"entities": [
            {"name": "Apple Inc.", "type": "organization", "description": "invests in AI research"},
            {"name": "AI research", "type": "concept", "description": "field Apple funds"}
        ], "relations": [
            {"source": "Apple Inc.", "target": "AI research", "keywords": "invests in", "description": "Apple Inc. invests in AI research", "weight": 2.0}
        ]}"#,
    );
    llm.on(
        PromptKind::Extraction,
        "Apple Inc. is a fruit grower.",
        r#"{"entities": [
            {"name": "Apple Inc.", "type": "organization", "description": "is a fruit grower"}
        ], "relations": []}"#,
    );
    llm.on(
        PromptKind::Keywords,
        "What is Apple Inc.?",
        "HIGH_LEVEL: corporate activity\nLOW_LEVEL: Apple Inc.",
    );

    let engine = test_engine(Arc::clone(&llm));
    let p1 = engine.create_project().unwrap();
    let p2 = engine.create_project().unwrap();
    engine
        .submit_text(p1, "tech.txt", "Apple Inc. invests in AI research.")
        .unwrap();
    engine
        .submit_text(p2, "fruit.txt", "Apple Inc. is a fruit grower.")
        .unwrap();
    engine.process_pending().unwrap();
    (engine, llm, p1, p2)
}

#[test]
fn same_entity_name_in_two_projects_never_leaks() {
    let (engine, _llm, p1, p2) = seeded_engine();

    for mode in [
        QueryMode::Local,
        QueryMode::Global,
        QueryMode::Hybrid,
        QueryMode::Mix,
        QueryMode::Naive,
    ] {
        let (r1, _) = engine
            .query(Some(p1), "What is Apple Inc.?", mode, Some(false))
            .unwrap();
        let answer = r1.answer.unwrap();
        assert!(
            answer.contains("AI research") || mode == QueryMode::Mix,
            "{mode}: P1 answer missing its own evidence: {answer}"
        );
        assert!(
            !answer.contains("fruit grower"),
            "{mode}: P1 answer leaked P2 content: {answer}"
        );

        let (r2, _) = engine
            .query(Some(p2), "What is Apple Inc.?", mode, Some(false))
            .unwrap();
        let answer = r2.answer.unwrap();
        assert!(
            !answer.contains("AI research"),
            "{mode}: P2 answer leaked P1 content: {answer}"
        );
    }
}

#[test]
fn local_mode_returns_entity_relation_and_chunk_sources() {
    let (engine, _llm, p1, _p2) = seeded_engine();
    let (response, usage) = engine
        .query(Some(p1), "What is Apple Inc.?", QueryMode::Local, Some(false))
        .unwrap();

    assert!(!response.cancelled);
    let labels: std::collections::BTreeSet<&str> = response
        .sources
        .iter()
        .map(|s| s.source_label.as_str())
        .collect();
    assert!(labels.contains("entities"), "labels: {labels:?}");
    assert!(labels.contains("relations"), "labels: {labels:?}");
    assert!(labels.contains("chunks"), "labels: {labels:?}");

    // Chunk sources point back at stored chunks.
    assert!(
        response
            .sources
            .iter()
            .any(|s| s.source_label == "chunks" && s.chunk_id.is_some())
    );
    assert!(usage.calls >= 1);
}

#[test]
fn naive_mode_skips_graph_and_keywords() {
    let (engine, llm, p1, _p2) = seeded_engine();
    let before = llm
        .keyword_calls
        .load(std::sync::atomic::Ordering::SeqCst);
    let (response, _) = engine
        .query(Some(p1), "What is Apple Inc.?", QueryMode::Naive, Some(false))
        .unwrap();
    assert_eq!(
        llm.keyword_calls.load(std::sync::atomic::Ordering::SeqCst),
        before
    );
    assert!(response.sources.iter().all(|s| s.source_label == "chunks"));
}

#[test]
fn missing_project_id_fails_fast() {
    let (engine, _llm, _p1, _p2) = seeded_engine();
    let err = engine
        .query(None, "anything", QueryMode::Local, None)
        .unwrap_err();
    assert_eq!(err.kind(), "MISSING_PROJECT_ID");
}

#[test]
fn graph_mode_without_namespace_reports_graph_not_found() {
    let llm = Arc::new(MockLlm::new());
    let engine = test_engine(Arc::clone(&llm));
    // A project id that was never created has no namespace.
    let ghost = ProjectId::generate();
    let err = engine
        .query(Some(ghost), "anything", QueryMode::Local, None)
        .unwrap_err();
    assert_eq!(err.kind(), "GRAPH_NOT_FOUND");
}

#[test]
fn unreachable_reranker_falls_back_to_original_order() {
    let llm = Arc::new(MockLlm::new());
    llm.on(
        PromptKind::Extraction,
        "The solar probe measured coronal temperatures.",
        r#"{"entities": [
            {"name": "solar probe", "type": "technology", "description": "measures coronal temperatures"}
        ], "relations": []}"#,
    );

    // Reranker enabled but pointing at a dead endpoint with a short
    // fallback timeout: every call must fall back to the original order.
    let mut config = common::test_config();
    config.rerank.enabled = true;
    config.rerank.provider = "http".to_string();
    config.rerank.endpoint = Some("http://127.0.0.1:59998/rerank".to_string());
    config.rerank.api_key = Some("test-key-for-rerank".to_string());
    config.rerank.fallback_timeout_ms = 300;

    let engine = graphloom::services::Engine::with_clients(
        config,
        Arc::clone(&llm) as Arc<dyn graphloom::llm::LlmClient>,
        Arc::new(common::HashEmbedder),
    )
    .unwrap();
    let project = engine.create_project().unwrap();
    engine
        .submit_text(
            project,
            "probe.txt",
            "The solar probe measured coronal temperatures.",
        )
        .unwrap();
    engine.process_pending().unwrap();

    let question = "What did the solar probe measure?";
    let started = std::time::Instant::now();
    let (with_rerank, _) = engine
        .query(Some(project), question, QueryMode::Naive, Some(true))
        .unwrap();
    // Bounded by the fallback timeout plus local work.
    assert!(started.elapsed() < std::time::Duration::from_secs(3));

    let (without_rerank, _) = engine
        .query(Some(project), question, QueryMode::Naive, Some(false))
        .unwrap();

    let order_a: Vec<_> = with_rerank.sources.iter().map(|s| s.chunk_id).collect();
    let order_b: Vec<_> = without_rerank.sources.iter().map(|s| s.chunk_id).collect();
    assert_eq!(order_a, order_b, "fallback must preserve original order");
}
