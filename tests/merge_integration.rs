//! Entity merge: edge redirection, deduplication, and cleanup.

#![allow(clippy::unwrap_used)]

mod common;

use common::{HashEmbedder, MockLlm, test_engine};
use graphloom::models::{Entity, ProjectId, Relation};
use graphloom::services::{Engine, MergeStrategy, TargetOverrides};
use graphloom::storage::{EntityEmbedding, GraphStore, VectorFilter, VectorStore};
use std::sync::Arc;

/// Seeds a small alias graph directly through the stores:
/// `A -> X`, `AI -> X`, `Artificial Intelligence -> Y`.
fn seed_merge_graph(engine: &Engine) -> ProjectId {
    let project = engine.create_project().unwrap();
    let store = engine.store();

    for (name, description) in [
        ("A", "abbreviation for artificial intelligence"),
        ("AI", "machine intelligence"),
        ("Artificial Intelligence", "the field of machine intelligence"),
        ("X", "a research lab"),
        ("Y", "an application domain"),
    ] {
        store
            .upsert_entity(project, &Entity::new(name, "concept", description))
            .unwrap();
    }
    store
        .upsert_relation(project, &Relation::new("A", "X", "studied at", "A studied at X", 1.0))
        .unwrap();
    store
        .upsert_relation(project, &Relation::new("AI", "X", "studied at", "AI studied at X", 2.0))
        .unwrap();
    store
        .upsert_relation(
            project,
            &Relation::new(
                "Artificial Intelligence",
                "Y",
                "applied in",
                "applied in Y",
                1.0,
            ),
        )
        .unwrap();

    // Entity embeddings for the names being merged away.
    let rows: Vec<EntityEmbedding> = ["A", "AI"]
        .iter()
        .map(|name| EntityEmbedding {
            entity_name: (*name).to_string(),
            content: (*name).to_string(),
            embedding: vec![0.1; common::TEST_DIMENSIONS],
        })
        .collect();
    VectorStore::upsert_entities(store.as_ref(), project, &rows).unwrap();

    project
}

#[test]
fn merge_redirects_dedupes_and_removes_sources() {
    let llm = Arc::new(MockLlm::new());
    let engine = test_engine(Arc::clone(&llm));
    let project = seed_merge_graph(&engine);
    let store = engine.store();

    let (report, _usage) = engine
        .merge_entities(
            project,
            &["A".to_string(), "AI".to_string()],
            "Artificial Intelligence",
            MergeStrategy::LlmSummarize,
            &TargetOverrides::default(),
        )
        .unwrap();

    assert_eq!(report.target, "Artificial Intelligence");
    assert_eq!(report.source_entities_deleted, 2);
    // A->X redirected; AI->X collapsed into the redirected edge.
    assert_eq!(report.relations_redirected, 1);
    assert_eq!(report.relations_deduped, 1);

    // Source vertices gone.
    assert!(store.get_entity(project, "A").unwrap().is_none());
    assert!(store.get_entity(project, "AI").unwrap().is_none());

    // Their embeddings gone too.
    let hits = store
        .query(
            project,
            &vec![0.1; common::TEST_DIMENSIONS],
            10,
            VectorFilter::Entities,
        )
        .unwrap();
    assert!(
        hits.iter()
            .all(|h| h.entity_name.as_deref() != Some("A")
                && h.entity_name.as_deref() != Some("AI"))
    );

    // Exactly one edge to X, with merged weight, plus the original edge
    // to Y.
    let relations = store
        .get_relations_for_entity(project, "Artificial Intelligence")
        .unwrap();
    let to_x: Vec<_> = relations.iter().filter(|r| r.tgt == "X").collect();
    assert_eq!(to_x.len(), 1);
    assert!((to_x[0].weight - 3.0).abs() < f64::EPSILON);
    assert!(relations.iter().any(|r| r.tgt == "Y"));

    // Summarize strategy folded the source descriptions into the target.
    let target = store
        .get_entity(project, "Artificial Intelligence")
        .unwrap()
        .unwrap();
    assert!(target.description.contains("machine intelligence"));
}

#[test]
fn merge_between_sources_drops_would_be_self_loops() {
    let llm = Arc::new(MockLlm::new());
    let engine = test_engine(Arc::clone(&llm));
    let project = engine.create_project().unwrap();
    let store = engine.store();

    for name in ["A", "B", "Target"] {
        store
            .upsert_entity(project, &Entity::new(name, "concept", name))
            .unwrap();
    }
    // An edge between two merged sources becomes a self-loop and must be
    // dropped, not created.
    store
        .upsert_relation(project, &Relation::new("A", "B", "aliases", "same thing", 1.0))
        .unwrap();

    let (report, _usage) = engine
        .merge_entities(
            project,
            &["A".to_string(), "B".to_string()],
            "Target",
            MergeStrategy::Concatenate,
            &TargetOverrides::default(),
        )
        .unwrap();

    assert!(report.self_loops_dropped >= 1);
    let relations = store.get_relations_for_entity(project, "Target").unwrap();
    assert!(relations.iter().all(|r| r.src != r.tgt));
}

#[test]
fn circular_merge_is_rejected() {
    let llm = Arc::new(MockLlm::new());
    let engine = test_engine(Arc::clone(&llm));
    let project = engine.create_project().unwrap();
    engine
        .store()
        .upsert_entity(project, &Entity::new("Solo", "concept", "alone"))
        .unwrap();

    let err = engine
        .merge_entities(
            project,
            &["Solo".to_string()],
            "Solo",
            MergeStrategy::Concatenate,
            &TargetOverrides::default(),
        )
        .unwrap_err();
    assert_eq!(err.kind(), "CIRCULAR_MERGE");
}

#[test]
fn merge_with_missing_source_is_rejected_without_changes() {
    let llm = Arc::new(MockLlm::new());
    let engine = test_engine(Arc::clone(&llm));
    let project = engine.create_project().unwrap();
    let store = engine.store();
    store
        .upsert_entity(project, &Entity::new("Real", "concept", "exists"))
        .unwrap();

    let err = engine
        .merge_entities(
            project,
            &["Real".to_string(), "Ghost".to_string()],
            "Target",
            MergeStrategy::Concatenate,
            &TargetOverrides::default(),
        )
        .unwrap_err();
    assert_eq!(err.kind(), "INVALID_INPUT");
    // Nothing was touched.
    assert!(store.get_entity(project, "Real").unwrap().is_some());
    assert!(store.get_entity(project, "Target").unwrap().is_none());
}

#[test]
fn overrides_apply_to_the_target() {
    let llm = Arc::new(MockLlm::new());
    let engine = Engine::with_clients(
        common::test_config(),
        Arc::clone(&llm) as Arc<dyn graphloom::llm::LlmClient>,
        Arc::new(HashEmbedder),
    )
    .unwrap();
    let project = engine.create_project().unwrap();
    let store = engine.store();
    for name in ["ML", "Machine Learning"] {
        store
            .upsert_entity(project, &Entity::new(name, "concept", name))
            .unwrap();
    }

    let overrides = TargetOverrides {
        entity_type: Some("field".to_string()),
        description_seed: Some("canonical name for the discipline".to_string()),
    };
    engine
        .merge_entities(
            project,
            &["ML".to_string()],
            "Machine Learning",
            MergeStrategy::Concatenate,
            &overrides,
        )
        .unwrap();

    let target = store
        .get_entity(project, "Machine Learning")
        .unwrap()
        .unwrap();
    assert_eq!(target.entity_type, "field");
    assert!(target.description.starts_with("canonical name for the discipline"));
}
