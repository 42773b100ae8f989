//! Entity merge service (C16).
//!
//! Merges N source entities into a target: every edge touching a source
//! is redirected to the target, self-loops are dropped, duplicate edges
//! merge their descriptions/weights/sources, and the source vertices and
//! their embeddings are removed. Descriptions combine by concatenation or
//! by LLM summarization (cached). The write phase is a single
//! transaction.

use crate::models::{Entity, ProjectId};
use crate::pipeline::summarizer::DescriptionSummarizer;
use crate::services::TokenTracker;
use crate::storage::{GraphStore, SqliteStore};
use crate::{Error, Result};
use serde::Serialize;
use std::sync::Arc;

/// How the merged description is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergeStrategy {
    /// Separator-join of the accumulated fragments; no LLM.
    Concatenate,
    /// LLM summarization via the description summarizer (cached).
    LlmSummarize,
}

impl MergeStrategy {
    /// Parses a strategy from its wire string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "CONCATENATE" => Some(Self::Concatenate),
            "LLM_SUMMARIZE" => Some(Self::LlmSummarize),
            _ => None,
        }
    }
}

/// Optional attribute overrides applied to the merge target.
#[derive(Debug, Clone, Default)]
pub struct TargetOverrides {
    /// Replacement entity type.
    pub entity_type: Option<String>,
    /// Description seed prepended to the accumulated fragments.
    pub description_seed: Option<String>,
}

/// Outcome of an entity merge.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeReport {
    /// The surviving entity name.
    pub target: String,
    /// Edges rewritten to point at the target.
    pub relations_redirected: usize,
    /// Source vertices removed.
    pub source_entities_deleted: usize,
    /// Redirected edges that collapsed into an existing target edge.
    pub relations_deduped: usize,
    /// Redirected edges dropped because they became self-loops.
    pub self_loops_dropped: usize,
}

/// Entity merge service.
pub struct MergeService {
    store: Arc<SqliteStore>,
    summarizer: Arc<DescriptionSummarizer>,
    separator: String,
    max_source_ids: usize,
}

impl MergeService {
    /// Creates the service.
    #[must_use]
    pub fn new(
        store: Arc<SqliteStore>,
        summarizer: Arc<DescriptionSummarizer>,
        separator: String,
        max_source_ids: usize,
    ) -> Self {
        Self {
            store,
            summarizer,
            separator,
            max_source_ids,
        }
    }

    /// Merges `sources` into `target`.
    ///
    /// The target may itself appear among the sources (it is then simply
    /// kept); a merge whose source set reduces to nothing but the target
    /// is rejected as circular.
    ///
    /// # Errors
    ///
    /// `INVALID_INPUT` when a source does not exist; `CIRCULAR_MERGE`
    /// when there is nothing to merge but the target itself.
    pub fn merge_entities(
        &self,
        project: ProjectId,
        sources: &[String],
        target: &str,
        strategy: MergeStrategy,
        overrides: &TargetOverrides,
        tracker: &TokenTracker,
    ) -> Result<MergeReport> {
        let span = tracing::info_span!("merge.entities", %project, target);
        let _enter = span.enter();

        if sources.is_empty() {
            return Err(Error::InvalidInput("no source entities given".to_string()));
        }
        let real_sources: Vec<&String> = sources.iter().filter(|s| s.as_str() != target).collect();
        if real_sources.is_empty() {
            return Err(Error::CircularMerge {
                target: target.to_string(),
            });
        }

        // Preconditions: every source must exist.
        let mut source_entities = Vec::with_capacity(real_sources.len());
        for name in &real_sources {
            let entity = self.store.get_entity(project, name)?.ok_or_else(|| {
                Error::InvalidInput(format!("source entity '{name}' does not exist"))
            })?;
            source_entities.push(entity);
        }
        let target_entity = self.store.get_entity(project, target)?;

        // Compute the merged target outside the transaction; only the
        // summarization strategy may call the LLM.
        let merged_target = self.build_target(
            project,
            target,
            target_entity.as_ref(),
            &source_entities,
            strategy,
            overrides,
            tracker,
        )?;

        let source_names: Vec<String> = real_sources.iter().map(|s| (*s).clone()).collect();
        let mut report = MergeReport {
            target: target.to_string(),
            ..MergeReport::default()
        };

        self.store.transaction(|tx| {
            tx.put_entity(project, &merged_target)?;

            for source in &source_entities {
                for relation in tx.get_relations_for_entity(project, &source.name)? {
                    let mut redirected = relation.clone();
                    if redirected.src == source.name {
                        redirected.src = target.to_string();
                    }
                    if redirected.tgt == source.name {
                        redirected.tgt = target.to_string();
                    }

                    if redirected.src == redirected.tgt {
                        report.self_loops_dropped += 1;
                        continue;
                    }
                    // An edge whose far endpoint is itself being merged
                    // away would become a self-loop once both redirects
                    // land; drop it.
                    let far = if redirected.src == target {
                        &redirected.tgt
                    } else {
                        &redirected.src
                    };
                    if source_names.iter().any(|s| s == far) {
                        report.self_loops_dropped += 1;
                        continue;
                    }

                    let exists = tx.get_relation(project, &redirected.key())?.is_some();
                    // upsert merges descriptions/weights/sources into an
                    // existing identical edge instead of duplicating it.
                    tx.upsert_relation(project, &redirected)?;
                    if exists {
                        report.relations_deduped += 1;
                    } else {
                        report.relations_redirected += 1;
                    }
                }
            }

            report.source_entities_deleted = tx.delete_entities(project, &source_names)?;
            tx.delete_entity_embeddings(project, &source_names)?;
            Ok(())
        })?;

        tracing::info!(
            redirected = report.relations_redirected,
            deduped = report.relations_deduped,
            deleted = report.source_entities_deleted,
            "entities merged"
        );
        Ok(report)
    }

    /// Builds the post-merge target entity.
    #[allow(clippy::too_many_arguments)]
    fn build_target(
        &self,
        project: ProjectId,
        target: &str,
        existing: Option<&Entity>,
        sources: &[Entity],
        strategy: MergeStrategy,
        overrides: &TargetOverrides,
        tracker: &TokenTracker,
    ) -> Result<Entity> {
        let mut fragments: Vec<String> = Vec::new();
        let mut push_fragments = |description: &str, fragments: &mut Vec<String>| {
            for piece in description.split(&self.separator) {
                let piece = piece.trim();
                if !piece.is_empty() && !fragments.iter().any(|f| f == piece) {
                    fragments.push(piece.to_string());
                }
            }
        };

        if let Some(seed) = &overrides.description_seed {
            push_fragments(seed, &mut fragments);
        }
        if let Some(entity) = existing {
            push_fragments(&entity.description, &mut fragments);
        }
        for source in sources {
            push_fragments(&source.description, &mut fragments);
        }

        let description = match strategy {
            MergeStrategy::Concatenate => fragments.join(&self.separator),
            MergeStrategy::LlmSummarize => {
                self.summarizer
                    .summarize(project, target, &fragments, tracker)?
            }
        };

        let entity_type = overrides
            .entity_type
            .clone()
            .or_else(|| {
                existing
                    .map(|e| e.entity_type.clone())
                    .filter(|t| !t.is_empty())
            })
            .or_else(|| {
                sources
                    .iter()
                    .map(|s| s.entity_type.clone())
                    .find(|t| !t.is_empty())
            })
            .unwrap_or_default();

        let mut merged = Entity::new(target, entity_type, description);
        if let Some(entity) = existing {
            merged.source_chunk_ids = entity.source_chunk_ids.clone();
            merged.source_file_paths = entity.source_file_paths.clone();
        }
        for source in sources {
            for chunk_id in &source.source_chunk_ids {
                crate::models::graph::push_capped(
                    &mut merged.source_chunk_ids,
                    *chunk_id,
                    self.max_source_ids,
                );
            }
            for path in &source.source_file_paths {
                crate::models::graph::push_capped(
                    &mut merged.source_file_paths,
                    path.clone(),
                    self.max_source_ids,
                );
            }
        }
        Ok(merged)
    }
}

/// Re-renders the target for embedding refresh after a merge.
#[must_use]
pub fn target_embedding_content(entity: &Entity) -> String {
    format!("{}\n{}", entity.name, entity.description)
}
