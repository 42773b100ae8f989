//! Document deletion with knowledge rebuild (C15).
//!
//! Deleting a document removes its chunks, vectors, and provenance, but
//! shared knowledge survives: entities and relations that other documents
//! also contributed to are rebuilt from the extraction cache — no new
//! extraction calls are issued; only summarization may touch the LLM.
//!
//! The operation runs in two phases. The read/compute phase gathers
//! affected rows and reassembles descriptions from cached extractions
//! (the only phase that may call the LLM). The write phase applies every
//! change inside a single storage transaction, so a failure restores the
//! state before the call.

use crate::models::{CacheType, ProjectId, RelationKey};
use crate::pipeline::extractor::{RawExtraction, parse_extraction};
use crate::pipeline::summarizer::DescriptionSummarizer;
use crate::services::TokenTracker;
use crate::storage::{DocumentStore, ExtractionCacheStore, GraphStore, SqliteStore};
use crate::{Error, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

/// Outcome of a document deletion.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeletionReport {
    /// Entities removed because the deleted document was their only
    /// source (or rebuild was skipped).
    pub entities_deleted: Vec<String>,
    /// Entities whose descriptions were rebuilt from cache.
    pub entities_rebuilt: Vec<String>,
    /// Relations removed.
    pub relations_deleted: usize,
    /// Relations rebuilt from cache.
    pub relations_rebuilt: usize,
    /// Chunks removed.
    pub chunks_deleted: usize,
    /// Non-fatal problems encountered during rebuild.
    pub errors: Vec<String>,
}

/// Planned change for one affected entity.
enum EntityPlan {
    Delete(String),
    Rebuild {
        name: String,
        description: String,
        remaining: Vec<Uuid>,
    },
}

/// Planned change for one affected relation.
enum RelationPlan {
    Delete(RelationKey),
    Rebuild {
        key: RelationKey,
        description: String,
        remaining: Vec<Uuid>,
    },
}

/// Deletion/rebuild service.
pub struct DeletionService {
    store: Arc<SqliteStore>,
    summarizer: Arc<DescriptionSummarizer>,
    separator: String,
}

impl DeletionService {
    /// Creates the service.
    #[must_use]
    pub fn new(
        store: Arc<SqliteStore>,
        summarizer: Arc<DescriptionSummarizer>,
        separator: String,
    ) -> Self {
        Self {
            store,
            summarizer,
            separator,
        }
    }

    /// Deletes a document; rebuilds shared entities/relations from cache
    /// unless `skip_rebuild` is set.
    ///
    /// # Errors
    ///
    /// `INVALID_INPUT` when the document does not exist; storage errors
    /// roll the write phase back completely.
    pub fn delete_document(
        &self,
        project: ProjectId,
        document_id: Uuid,
        skip_rebuild: bool,
        tracker: &TokenTracker,
    ) -> Result<DeletionReport> {
        let span = tracing::info_span!("delete.document", %project, document = %document_id);
        let _enter = span.enter();

        self.store
            .get_document(project, document_id)?
            .ok_or_else(|| {
                Error::InvalidInput(format!("document {document_id} not found"))
            })?;

        let chunks = self.store.get_chunks_by_document(project, document_id)?;
        let doomed: BTreeSet<Uuid> = chunks.iter().map(|c| c.id).collect();
        let doomed_list: Vec<Uuid> = doomed.iter().copied().collect();

        let mut report = DeletionReport::default();

        // Read/compute phase: plan every change before touching anything.
        let affected_entities = self
            .store
            .get_entities_by_source_chunks(project, &doomed_list)?;
        let mut entity_plans = Vec::new();
        for name in &affected_entities {
            entity_plans.push(self.plan_entity(project, name, &doomed, skip_rebuild, tracker, &mut report)?);
        }
        let deleted_entities: BTreeSet<&String> = entity_plans
            .iter()
            .filter_map(|plan| match plan {
                EntityPlan::Delete(name) => Some(name),
                EntityPlan::Rebuild { .. } => None,
            })
            .collect();

        let affected_relations = self
            .store
            .get_relations_by_source_chunks(project, &doomed_list)?;
        let mut relation_plans = Vec::new();
        for key in affected_relations {
            // A relation whose endpoint is going away goes with it.
            let endpoint_doomed =
                deleted_entities.contains(&key.src) || deleted_entities.contains(&key.tgt);
            relation_plans.push(self.plan_relation(
                project,
                key,
                &doomed,
                skip_rebuild || endpoint_doomed,
                tracker,
                &mut report,
            )?);
        }

        // Write phase: one transaction, all or nothing.
        let entity_deletes: Vec<String> = entity_plans
            .iter()
            .filter_map(|plan| match plan {
                EntityPlan::Delete(name) => Some(name.clone()),
                EntityPlan::Rebuild { .. } => None,
            })
            .collect();
        let relation_deletes: Vec<RelationKey> = relation_plans
            .iter()
            .filter_map(|plan| match plan {
                RelationPlan::Delete(key) => Some(key.clone()),
                RelationPlan::Rebuild { .. } => None,
            })
            .collect();

        self.store.transaction(|tx| {
            tx.delete_entities(project, &entity_deletes)?;
            tx.delete_relations(project, &relation_deletes)?;

            for plan in &entity_plans {
                if let EntityPlan::Rebuild {
                    name,
                    description,
                    remaining,
                } = plan
                {
                    tx.update_entity_description(project, name, description, remaining)?;
                }
            }
            for plan in &relation_plans {
                if let RelationPlan::Rebuild {
                    key,
                    description,
                    remaining,
                } = plan
                {
                    // The rebuilt relation may already be gone if an
                    // endpoint deletion cascaded over it.
                    if tx.get_relation(project, key)?.is_some() {
                        tx.update_relation(project, key, description, remaining)?;
                    }
                }
            }

            tx.delete_entity_embeddings(project, &entity_deletes)?;
            tx.delete_document_vectors(project, document_id)?;
            tx.detach_cache_chunks(project, &doomed_list)?;
            tx.delete_chunks(project, &doomed_list)?;
            tx.delete_document(project, document_id)?;
            Ok(())
        })?;

        report.entities_deleted = entity_deletes;
        report.relations_deleted = relation_deletes.len();
        report.chunks_deleted = doomed_list.len();

        tracing::info!(
            entities_deleted = report.entities_deleted.len(),
            entities_rebuilt = report.entities_rebuilt.len(),
            relations_deleted = report.relations_deleted,
            relations_rebuilt = report.relations_rebuilt,
            chunks = report.chunks_deleted,
            "document deleted"
        );
        Ok(report)
    }

    fn plan_entity(
        &self,
        project: ProjectId,
        name: &str,
        doomed: &BTreeSet<Uuid>,
        skip_rebuild: bool,
        tracker: &TokenTracker,
        report: &mut DeletionReport,
    ) -> Result<EntityPlan> {
        let Some(entity) = self.store.get_entity(project, name)? else {
            return Ok(EntityPlan::Delete(name.to_string()));
        };
        let remaining: Vec<Uuid> = entity
            .source_chunk_ids
            .iter()
            .copied()
            .filter(|id| !doomed.contains(id))
            .collect();

        if remaining.is_empty() || skip_rebuild {
            return Ok(EntityPlan::Delete(name.to_string()));
        }

        // Reassemble the description from cached extractions of the
        // surviving chunks. Only summarization may call the LLM here.
        let fragments = self.cached_descriptions_for_entity(project, name, &remaining)?;
        let description = if fragments.is_empty() {
            report.errors.push(format!(
                "no cached extractions for '{name}'; keeping accumulated description"
            ));
            entity.description.clone()
        } else {
            self.summarizer
                .summarize(project, name, &fragments, tracker)?
        };

        report.entities_rebuilt.push(name.to_string());
        Ok(EntityPlan::Rebuild {
            name: name.to_string(),
            description,
            remaining,
        })
    }

    fn plan_relation(
        &self,
        project: ProjectId,
        key: RelationKey,
        doomed: &BTreeSet<Uuid>,
        force_delete: bool,
        tracker: &TokenTracker,
        report: &mut DeletionReport,
    ) -> Result<RelationPlan> {
        let Some(relation) = self.store.get_relation(project, &key)? else {
            return Ok(RelationPlan::Delete(key));
        };
        let remaining: Vec<Uuid> = relation
            .source_chunk_ids
            .iter()
            .copied()
            .filter(|id| !doomed.contains(id))
            .collect();

        if remaining.is_empty() || force_delete {
            return Ok(RelationPlan::Delete(key));
        }

        let fragments = self.cached_descriptions_for_relation(project, &key, &remaining)?;
        let description = if fragments.is_empty() {
            relation.description.clone()
        } else {
            let subject = format!("{} -> {}", key.src, key.tgt);
            self.summarizer
                .summarize(project, &subject, &fragments, tracker)?
        };

        report.relations_rebuilt += 1;
        Ok(RelationPlan::Rebuild {
            key,
            description,
            remaining,
        })
    }

    /// Collects the entity's description fragments from cached
    /// extraction/gleaning outputs of the surviving chunks.
    fn cached_descriptions_for_entity(
        &self,
        project: ProjectId,
        name: &str,
        remaining: &[Uuid],
    ) -> Result<Vec<String>> {
        let entries = self.store.get_by_chunks(
            project,
            &[CacheType::EntityExtraction, CacheType::Gleaning],
            remaining,
        )?;
        let mut fragments = Vec::new();
        for entry in entries {
            let Ok(parsed) = parse_extraction(&entry.result) else {
                continue;
            };
            collect_entity_fragments(&parsed, name, &self.separator, &mut fragments);
        }
        Ok(fragments)
    }

    fn cached_descriptions_for_relation(
        &self,
        project: ProjectId,
        key: &RelationKey,
        remaining: &[Uuid],
    ) -> Result<Vec<String>> {
        let entries = self.store.get_by_chunks(
            project,
            &[CacheType::EntityExtraction, CacheType::Gleaning],
            remaining,
        )?;
        let mut fragments = Vec::new();
        for entry in entries {
            let Ok(parsed) = parse_extraction(&entry.result) else {
                continue;
            };
            for relation in &parsed.relations {
                if relation.source.trim().eq_ignore_ascii_case(&key.src)
                    && relation.target.trim().eq_ignore_ascii_case(&key.tgt)
                    && !relation.description.trim().is_empty()
                    && !fragments.contains(&relation.description.trim().to_string())
                {
                    fragments.push(relation.description.trim().to_string());
                }
            }
        }
        Ok(fragments)
    }
}

fn collect_entity_fragments(
    parsed: &RawExtraction,
    name: &str,
    separator: &str,
    fragments: &mut Vec<String>,
) {
    for entity in &parsed.entities {
        if !entity.name.trim().eq_ignore_ascii_case(name) {
            continue;
        }
        // Cached fragments may themselves be separator-joined.
        for piece in entity.description.split(separator) {
            let piece = piece.trim();
            if !piece.is_empty() && !fragments.iter().any(|f| f == piece) {
                fragments.push(piece.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_entity_fragments_case_insensitive() {
        let parsed = RawExtraction {
            entities: vec![crate::pipeline::extractor::RawEntity {
                name: "TURING".to_string(),
                entity_type: "person".to_string(),
                description: "mathematician | computing pioneer".to_string(),
            }],
            relations: vec![],
        };
        let mut fragments = Vec::new();
        collect_entity_fragments(&parsed, "Turing", " | ", &mut fragments);
        assert_eq!(fragments, vec!["mathematician", "computing pioneer"]);
        // Re-collection does not duplicate.
        collect_entity_fragments(&parsed, "Turing", " | ", &mut fragments);
        assert_eq!(fragments.len(), 2);
    }
}
