//! The five retrieval modes (C11).
//!
//! Every mode composes vector and graph retrieval under the shared token
//! budget, then hands the assembled context to the synthesizer:
//!
//! | Mode | Shape |
//! |------|-------|
//! | LOCAL | entity-centric: entity embeddings → entities → incident relations → source chunks |
//! | GLOBAL | relation-centric: chunk embeddings → mentioned entities → relations + one-hop neighbors |
//! | HYBRID | LOCAL and GLOBAL interleaved round-robin, plus top chunks |
//! | MIX | chunk embeddings + one-hop expansion from LOW_LEVEL keyword entities |
//! | NAIVE | chunk embeddings only; no graph access |
//!
//! All modes except NAIVE run keyword extraction first: LOW_LEVEL
//! keywords bias entity retrieval, HIGH_LEVEL keywords bias relation
//! retrieval. Executors fail fast with `MISSING_PROJECT_ID` when no
//! project is given, and honor the hard query deadline by returning the
//! partial context as cancelled when synthesis was not reached.

use crate::config::{GraphLoomConfig, QueryConfig};
use crate::llm::EmbeddingClient;
use crate::models::{
    Entity, KeywordResult, ProjectId, QueryMode, QueryResponse, Relation, SourceChunk,
};
use crate::query::context::{
    BudgetedSection, ContextItem, ContextSource, MergedContext, assemble, merge,
};
use crate::query::keywords::KeywordExtractor;
use crate::query::rerank::Reranker;
use crate::storage::traits::documents::DocumentStore;
use crate::query::synthesize::Synthesizer;
use crate::services::{TokenOp, TokenTracker};
use crate::storage::{GraphStore, SqliteStore, VectorFilter, VectorStore};
use crate::text::Tokenizer;
use crate::{Error, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Incident relations considered per entity in LOCAL mode.
const RELATIONS_PER_ENTITY: usize = 5;

/// A query to execute.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    /// Tenant; executors fail fast when absent.
    pub project: Option<ProjectId>,
    /// The natural-language question.
    pub query: String,
    /// Retrieval mode.
    pub mode: QueryMode,
    /// Per-request reranker override; `None` uses the configured default.
    pub enable_rerank: Option<bool>,
}

/// Intermediate retrieval result shared by the modes.
#[derive(Debug, Default)]
struct Retrieval {
    entities: Vec<ContextItem>,
    relations: Vec<ContextItem>,
    chunks: Vec<ContextItem>,
}

/// Query executor over the project-scoped stores.
pub struct QueryExecutor {
    store: Arc<SqliteStore>,
    embedder: Arc<dyn EmbeddingClient>,
    keywords: KeywordExtractor,
    reranker: Reranker,
    synthesizer: Synthesizer,
    tokenizer: Tokenizer,
    config: QueryConfig,
    graph_batch: usize,
    rerank_default: bool,
}

impl QueryExecutor {
    /// Wires an executor from configuration and shared components.
    #[must_use]
    pub fn new(
        store: Arc<SqliteStore>,
        embedder: Arc<dyn EmbeddingClient>,
        keywords: KeywordExtractor,
        reranker: Reranker,
        synthesizer: Synthesizer,
        config: &GraphLoomConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            keywords,
            reranker,
            synthesizer,
            tokenizer: Tokenizer::new(config.chunking.chars_per_token),
            config: config.query,
            graph_batch: config.graph.batch_size,
            rerank_default: config.rerank.enabled,
        }
    }

    /// Executes a query end to end.
    ///
    /// # Errors
    ///
    /// `MISSING_PROJECT_ID` without a project; `GRAPH_NOT_FOUND` for
    /// graph modes against a project with no namespace; LLM/storage
    /// errors from the underlying calls.
    pub fn execute(&self, request: &QueryRequest, tracker: &TokenTracker) -> Result<QueryResponse> {
        let project = request.project.ok_or(Error::MissingProjectId)?;
        if request.query.trim().is_empty() {
            return Err(Error::InvalidInput("query is empty".to_string()));
        }
        let deadline = Instant::now() + Duration::from_millis(self.config.hard_timeout_ms.max(1));

        let span = tracing::info_span!("query", %project, mode = %request.mode);
        let _enter = span.enter();

        if request.mode.uses_graph() && !self.store.graph_exists(project)? {
            return Err(Error::GraphNotFound {
                project_id: project.to_string(),
            });
        }

        // Keyword extraction first for every graph-aware mode.
        let keywords = if request.mode.uses_graph() {
            self.keywords.extract(project, &request.query, tracker)?
        } else {
            KeywordResult::default()
        };

        let query_embedding = self.embed_query(&request.query, tracker)?;

        let mut retrieval = match request.mode {
            QueryMode::Local => self.retrieve_local(project, &query_embedding, &keywords)?,
            QueryMode::Global => self.retrieve_global(project, &query_embedding, &keywords)?,
            QueryMode::Hybrid => {
                let local = self.retrieve_local(project, &query_embedding, &keywords)?;
                let global = self.retrieve_global(project, &query_embedding, &keywords)?;
                interleave(local, global, &self.tokenizer, self.config.context_max_tokens)
            }
            QueryMode::Mix => self.retrieve_mix(project, &query_embedding, &keywords)?,
            QueryMode::Naive => Retrieval {
                chunks: self.vector_chunks(project, &query_embedding)?,
                ..Retrieval::default()
            },
        };

        // Optional rerank of the chunk source; any provider trouble
        // preserves the original retrieval order.
        let use_rerank = request.enable_rerank.unwrap_or(self.rerank_default);
        if use_rerank && !retrieval.chunks.is_empty() {
            retrieval.chunks = self.rerank_chunks(&request.query, retrieval.chunks);
        }

        let merged = self.assemble_context(&retrieval, request.mode);
        let sources = to_source_chunks(&merged);

        // Deadline check: past it, return the partial context instead of
        // starting synthesis.
        if Instant::now() >= deadline {
            tracing::warn!("query deadline tripped before synthesis");
            metrics::counter!("query_cancelled_total").increment(1);
            return Ok(QueryResponse {
                answer: None,
                sources,
                mode: request.mode,
                cancelled: true,
            });
        }

        let answer = self
            .synthesizer
            .synthesize(&request.query, &merged.render(), tracker)?;

        Ok(QueryResponse {
            answer: Some(answer),
            sources,
            mode: request.mode,
            cancelled: false,
        })
    }

    fn embed_query(&self, query: &str, tracker: &TokenTracker) -> Result<Vec<f32>> {
        let batch = self.embedder.embed(&[query])?;
        tracker.record(TokenOp::Embedding, "embedding", batch.usage);
        batch
            .vectors
            .into_iter()
            .next()
            .ok_or_else(|| Error::LlmFatal {
                operation: "embed_query".to_string(),
                cause: "endpoint returned no vectors".to_string(),
            })
    }

    fn vector_chunks(&self, project: ProjectId, embedding: &[f32]) -> Result<Vec<ContextItem>> {
        let hits = self
            .store
            .query(project, embedding, self.config.top_k, VectorFilter::Chunks)?;
        Ok(hits
            .into_iter()
            .map(|hit| {
                let relevance = hit.relevance();
                ContextItem {
                    content: hit.content,
                    chunk_id: hit.chunk_id,
                    document_id: hit.document_id,
                    chunk_index: None,
                    relevance: Some(relevance),
                }
            })
            .collect())
    }

    /// LOCAL: entity embeddings seed the entity set; LOW_LEVEL keywords
    /// add direct name matches; incident relations and source chunks
    /// follow.
    fn retrieve_local(
        &self,
        project: ProjectId,
        embedding: &[f32],
        keywords: &KeywordResult,
    ) -> Result<Retrieval> {
        let hits = self.store.query(
            project,
            embedding,
            self.config.top_k,
            VectorFilter::Entities,
        )?;

        let mut names: Vec<String> = hits
            .into_iter()
            .filter_map(|hit| hit.entity_name)
            .collect();
        for keyword in &keywords.low_level {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(keyword)) {
                names.push(keyword.clone());
            }
        }

        let found = self
            .store
            .get_entities_batch(project, &names, self.graph_batch)?;
        let entities: Vec<&Entity> = names.iter().filter_map(|n| found.get(n)).collect();

        let mut relation_items = Vec::new();
        let mut seen_relations = BTreeSet::new();
        let mut chunk_ids = Vec::new();
        for entity in &entities {
            let incident = self.store.get_relations_for_entity(project, &entity.name)?;
            for relation in incident.into_iter().take(RELATIONS_PER_ENTITY) {
                if seen_relations.insert(relation.key().to_string()) {
                    relation_items.push(render_relation(&relation));
                }
            }
            for chunk_id in &entity.source_chunk_ids {
                if !chunk_ids.contains(chunk_id) {
                    chunk_ids.push(*chunk_id);
                }
            }
        }
        chunk_ids.truncate(self.config.top_k);

        let chunks = self
            .store
            .get_chunks_by_ids(project, &chunk_ids)?
            .into_iter()
            .map(|chunk| ContextItem {
                content: chunk.content,
                chunk_id: Some(chunk.id),
                document_id: Some(chunk.document_id),
                chunk_index: Some(chunk.order_index),
                relevance: None,
            })
            .collect();

        Ok(Retrieval {
            entities: entities.iter().map(|e| render_entity(e)).collect(),
            relations: relation_items,
            chunks,
        })
    }

    /// GLOBAL: chunk embeddings seed the chunk set; entities mentioned in
    /// the top chunks pull their relations (HIGH_LEVEL keywords boost) and
    /// one-hop neighbors.
    fn retrieve_global(
        &self,
        project: ProjectId,
        embedding: &[f32],
        keywords: &KeywordResult,
    ) -> Result<Retrieval> {
        let chunks = self.vector_chunks(project, embedding)?;
        let chunk_ids: Vec<uuid::Uuid> = chunks.iter().filter_map(|c| c.chunk_id).collect();

        let mentioned = self
            .store
            .get_entities_by_source_chunks(project, &chunk_ids)?;
        let names: Vec<String> = mentioned.into_iter().take(self.config.top_k).collect();
        let found = self
            .store
            .get_entities_batch(project, &names, self.graph_batch)?;

        // Relations around the mentioned entities, boosted by HIGH_LEVEL
        // keyword matches, then by weight.
        let mut relations: Vec<Relation> = Vec::new();
        let mut seen = BTreeSet::new();
        for name in &names {
            for relation in self.store.get_relations_for_entity(project, name)? {
                if seen.insert(relation.key().to_string()) {
                    relations.push(relation);
                }
            }
        }
        relations.sort_by(|a, b| {
            let boost_a = high_level_boost(a, &keywords.high_level);
            let boost_b = high_level_boost(b, &keywords.high_level);
            boost_b
                .cmp(&boost_a)
                .then_with(|| {
                    b.weight
                        .partial_cmp(&a.weight)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.key().to_string().cmp(&b.key().to_string()))
        });
        relations.truncate(self.config.top_k);

        // One-hop neighbors reached through the kept relations.
        let mut neighbor_names: Vec<String> = Vec::new();
        for relation in &relations {
            for endpoint in [&relation.src, &relation.tgt] {
                if !names.iter().any(|n| n == endpoint)
                    && !neighbor_names.iter().any(|n| n == endpoint)
                {
                    neighbor_names.push(endpoint.clone());
                }
            }
        }
        let neighbors = self
            .store
            .get_entities_batch(project, &neighbor_names, self.graph_batch)?;

        let mut entity_items: Vec<ContextItem> = names
            .iter()
            .filter_map(|n| found.get(n))
            .map(render_entity)
            .collect();
        entity_items.extend(
            neighbor_names
                .iter()
                .filter_map(|n| neighbors.get(n))
                .map(render_entity),
        );

        Ok(Retrieval {
            entities: entity_items,
            relations: relations.iter().map(render_relation).collect(),
            chunks,
        })
    }

    /// MIX: chunk embeddings plus one-hop graph expansion from entities
    /// named by LOW_LEVEL keywords.
    fn retrieve_mix(
        &self,
        project: ProjectId,
        embedding: &[f32],
        keywords: &KeywordResult,
    ) -> Result<Retrieval> {
        let chunks = self.vector_chunks(project, embedding)?;

        let found = self
            .store
            .get_entities_batch(project, &keywords.low_level, self.graph_batch)?;
        let mut entity_items = Vec::new();
        let mut relation_items = Vec::new();
        let mut seen_relations = BTreeSet::new();
        let mut neighbor_names: Vec<String> = Vec::new();

        for keyword in &keywords.low_level {
            let Some(entity) = found.get(keyword) else {
                continue;
            };
            entity_items.push(render_entity(entity));
            for relation in self.store.get_relations_for_entity(project, &entity.name)? {
                for endpoint in [&relation.src, &relation.tgt] {
                    if endpoint != &entity.name && !neighbor_names.contains(endpoint) {
                        neighbor_names.push(endpoint.clone());
                    }
                }
                if seen_relations.insert(relation.key().to_string()) {
                    relation_items.push(render_relation(&relation));
                }
            }
        }

        let neighbors = self
            .store
            .get_entities_batch(project, &neighbor_names, self.graph_batch)?;
        entity_items.extend(
            neighbor_names
                .iter()
                .filter_map(|n| neighbors.get(n))
                .map(render_entity),
        );

        Ok(Retrieval {
            entities: entity_items,
            relations: relation_items,
            chunks,
        })
    }

    fn rerank_chunks(&self, query: &str, chunks: Vec<ContextItem>) -> Vec<ContextItem> {
        let passages: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        let outcome = self.reranker.rerank(query, &passages, self.config.top_k);
        if outcome.fallback {
            // Identity order, truncated to top_k; scores untouched.
            return chunks.into_iter().take(self.config.top_k).collect();
        }
        outcome
            .items
            .into_iter()
            .filter_map(|item| {
                chunks.get(item.index).map(|chunk| {
                    let mut chunk = chunk.clone();
                    if let Some(score) = item.score {
                        chunk.relevance = Some(score);
                    }
                    chunk
                })
            })
            .collect()
    }

    fn assemble_context(&self, retrieval: &Retrieval, mode: QueryMode) -> MergedContext {
        if mode == QueryMode::Naive {
            return merge(
                &[ContextSource::new("chunks", retrieval.chunks.clone())],
                self.config.context_max_tokens,
                &self.tokenizer,
            );
        }
        assemble(
            vec![
                BudgetedSection {
                    source: ContextSource::new("entities", retrieval.entities.clone()),
                    ratio: self.config.entity_ratio,
                },
                BudgetedSection {
                    source: ContextSource::new("relations", retrieval.relations.clone()),
                    ratio: self.config.relation_ratio,
                },
                BudgetedSection {
                    source: ContextSource::new("chunks", retrieval.chunks.clone()),
                    ratio: self.config.chunk_ratio,
                },
            ],
            self.config.context_max_tokens,
            &self.tokenizer,
        )
    }
}

fn render_entity(entity: &Entity) -> ContextItem {
    ContextItem::text(format!(
        "{} ({}): {}",
        entity.name, entity.entity_type, entity.description
    ))
}

fn render_relation(relation: &Relation) -> ContextItem {
    ContextItem::text(format!(
        "{} -[{}]-> {}: {}",
        relation.src, relation.keywords, relation.tgt, relation.description
    ))
}

fn high_level_boost(relation: &Relation, high_level: &[String]) -> usize {
    high_level
        .iter()
        .filter(|keyword| {
            let k = keyword.to_lowercase();
            relation.keywords.to_lowercase().contains(&k)
                || relation.description.to_lowercase().contains(&k)
        })
        .count()
}

/// HYBRID helper: interleaves the entity and relation sources of the two
/// retrievals round-robin (via the context merger), keeping the chunk
/// sets concatenated with vector-ranked chunks first.
fn interleave(
    local: Retrieval,
    global: Retrieval,
    tokenizer: &Tokenizer,
    max_tokens: usize,
) -> Retrieval {
    let entities = merge(
        &[
            ContextSource::new("local", local.entities),
            ContextSource::new("global", global.entities),
        ],
        max_tokens,
        tokenizer,
    );
    let relations = merge(
        &[
            ContextSource::new("local", local.relations),
            ContextSource::new("global", global.relations),
        ],
        max_tokens,
        tokenizer,
    );

    let mut seen = BTreeSet::new();
    let dedup = |items: Vec<crate::query::context::MergedItem>,
                 seen: &mut BTreeSet<String>|
     -> Vec<ContextItem> {
        items
            .into_iter()
            .filter(|m| seen.insert(m.item.content.clone()))
            .map(|m| m.item)
            .collect()
    };

    let entity_items = dedup(entities.items, &mut seen);
    let relation_items = dedup(relations.items, &mut seen);

    // Vector-ranked chunks (global) lead; entity-derived chunks follow.
    let mut chunk_seen = BTreeSet::new();
    let mut chunks = Vec::new();
    for chunk in global.chunks.into_iter().chain(local.chunks) {
        let key = chunk
            .chunk_id
            .map_or_else(|| chunk.content.clone(), |id| id.to_string());
        if chunk_seen.insert(key) {
            chunks.push(chunk);
        }
    }

    Retrieval {
        entities: entity_items,
        relations: relation_items,
        chunks,
    }
}

fn to_source_chunks(merged: &MergedContext) -> Vec<SourceChunk> {
    merged
        .items
        .iter()
        .map(|m| SourceChunk {
            chunk_id: m.item.chunk_id,
            document_id: m.item.document_id,
            content: m.item.content.clone(),
            chunk_index: m.item.chunk_index,
            source_label: m.source_label.clone(),
            relevance_score: m.item.relevance,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_project_id_fails_fast() {
        let request = QueryRequest {
            project: None,
            query: "anything".to_string(),
            mode: QueryMode::Local,
            enable_rerank: None,
        };
        assert!(request.project.ok_or(Error::MissingProjectId).is_err());
    }

    #[test]
    fn test_high_level_boost_counts_matches() {
        let relation = Relation::new("A", "B", "funds research", "A funds research at B", 1.0);
        let boost = high_level_boost(
            &relation,
            &["research".to_string(), "unrelated".to_string()],
        );
        assert_eq!(boost, 1);
    }
}
