//! LLM entity/relation extraction with iterative gleaning.
//!
//! For each chunk the extractor computes a prompt-versioned content hash,
//! reuses the cached raw response when one exists, and otherwise calls the
//! LLM and caches the result. Up to `gleaning.max_passes` follow-up passes
//! ask for what was missed, stopping early when a pass parses to an empty
//! set; each pass is cached independently.
//!
//! Parse failures are extraction-local: the raw response stays cached, the
//! chunk contributes no entities, and processing continues.

use crate::llm::{LlmClient, extract_json_from_response, prompts};
use crate::models::{CacheType, CachedExtraction, Chunk, Entity, ProjectId, Relation};
use crate::services::{TokenOp, TokenTracker};
use crate::storage::ExtractionCacheStore;
use crate::{Error, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// SHA-256 over concatenated parts, lowercase hex.
#[must_use]
pub fn content_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Wire shape of one extracted entity.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawEntity {
    pub(crate) name: String,
    #[serde(rename = "type", default)]
    pub(crate) entity_type: String,
    #[serde(default)]
    pub(crate) description: String,
}

/// Wire shape of one extracted relation.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawRelation {
    pub(crate) source: String,
    pub(crate) target: String,
    #[serde(default)]
    pub(crate) keywords: String,
    #[serde(default)]
    pub(crate) description: String,
    #[serde(default = "default_weight")]
    pub(crate) weight: f64,
}

const fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RawExtraction {
    #[serde(default)]
    pub(crate) entities: Vec<RawEntity>,
    #[serde(default)]
    pub(crate) relations: Vec<RawRelation>,
}

/// Result of extracting one chunk.
#[derive(Debug, Default)]
pub struct ChunkExtraction {
    /// Entities with provenance attached, normalized within the chunk.
    pub entities: Vec<Entity>,
    /// Relations with provenance attached.
    pub relations: Vec<Relation>,
    /// Cache rows this chunk produced or reused.
    pub cache_ids: Vec<Uuid>,
    /// Extraction-local problems (parse failures, dropped relations).
    pub warnings: Vec<String>,
}

/// Entity/relation extractor with gleaning (C8).
pub struct EntityExtractor {
    llm: Arc<dyn LlmClient>,
    cache: Arc<dyn ExtractionCacheStore>,
    gleaning_max_passes: u32,
    max_completion_tokens: u32,
}

impl EntityExtractor {
    /// Creates an extractor.
    #[must_use]
    pub fn new(
        llm: Arc<dyn LlmClient>,
        cache: Arc<dyn ExtractionCacheStore>,
        gleaning_max_passes: u32,
        max_completion_tokens: u32,
    ) -> Self {
        Self {
            llm,
            cache,
            gleaning_max_passes,
            max_completion_tokens,
        }
    }

    /// Fetches a cached raw response or calls the LLM and caches it.
    /// Returns the raw text and the cache row id.
    fn cached_or_generate(
        &self,
        project: ProjectId,
        chunk_id: Uuid,
        cache_type: CacheType,
        hash: &str,
        prompt: &str,
        op: TokenOp,
        tracker: &TokenTracker,
    ) -> Result<(String, Uuid)> {
        if let Some(hit) = self.cache.get(project, cache_type, hash)? {
            tracing::debug!(%project, cache_type = %cache_type, "extraction cache hit");
            metrics::counter!("extraction_cache_hits_total").increment(1);
            return Ok((hit.result, hit.id));
        }

        let completion = self.llm.generate(prompt, self.max_completion_tokens)?;
        tracker.record(op, self.llm.name(), completion.usage);
        metrics::counter!("extraction_cache_misses_total").increment(1);

        let entry = CachedExtraction {
            id: Uuid::now_v7(),
            project_id: project,
            cache_type,
            chunk_id: Some(chunk_id),
            content_hash: hash.to_string(),
            result: completion.text.clone(),
            tokens_used: completion.usage.total(),
            created_at: crate::current_timestamp(),
        };
        let cache_id = self.cache.put(&entry)?;
        Ok((completion.text, cache_id))
    }

    /// Extracts entities and relations from one chunk, including gleaning
    /// passes.
    ///
    /// # Errors
    ///
    /// Returns an error only for LLM or storage failures; parse failures
    /// are reported as warnings and yield an empty contribution.
    pub fn extract_chunk(
        &self,
        project: ProjectId,
        chunk: &Chunk,
        file_path: &str,
        tracker: &TokenTracker,
    ) -> Result<ChunkExtraction> {
        let mut output = ChunkExtraction::default();

        let base_hash = content_hash(&[prompts::PROMPT_VERSION, &chunk.content]);
        let (raw, cache_id) = self.cached_or_generate(
            project,
            chunk.id,
            CacheType::EntityExtraction,
            &base_hash,
            &prompts::entity_extraction(&chunk.content),
            TokenOp::EntityExtraction,
            tracker,
        )?;
        output.cache_ids.push(cache_id);

        let mut accumulated = match parse_extraction(&raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                // Raw stays cached; the chunk contributes nothing.
                tracing::warn!(%project, chunk = %chunk.id, error = %err, "extraction parse failed");
                output.warnings.push(format!("extraction parse failed: {err}"));
                RawExtraction::default()
            }
        };

        for pass in 1..=self.gleaning_max_passes {
            let found: Vec<String> = accumulated.entities.iter().map(|e| e.name.clone()).collect();
            let gleaning_hash = content_hash(&[
                prompts::PROMPT_VERSION,
                &chunk.content,
                "gleaning",
                &pass.to_string(),
            ]);
            let (raw, cache_id) = self.cached_or_generate(
                project,
                chunk.id,
                CacheType::Gleaning,
                &gleaning_hash,
                &prompts::gleaning(&chunk.content, &found),
                TokenOp::Gleaning,
                tracker,
            )?;
            output.cache_ids.push(cache_id);

            match parse_extraction(&raw) {
                Ok(parsed) => {
                    if parsed.entities.is_empty() && parsed.relations.is_empty() {
                        break;
                    }
                    accumulated.entities.extend(parsed.entities);
                    accumulated.relations.extend(parsed.relations);
                }
                Err(err) => {
                    tracing::warn!(%project, chunk = %chunk.id, pass, error = %err, "gleaning parse failed");
                    output
                        .warnings
                        .push(format!("gleaning pass {pass} parse failed: {err}"));
                    break;
                }
            }
        }

        normalize_into(&mut output, accumulated, chunk.id, file_path);
        Ok(output)
    }
}

/// Parses a raw LLM response into entities and relations.
pub(crate) fn parse_extraction(raw: &str) -> Result<RawExtraction> {
    let json = extract_json_from_response(raw);
    serde_json::from_str(json).map_err(|e| Error::LlmParse {
        operation: "entity_extraction".to_string(),
        cause: e.to_string(),
    })
}

/// Normalizes names (trim, case-insensitive dedup within the chunk),
/// attaches provenance, and drops relations with unknown endpoints.
fn normalize_into(
    output: &mut ChunkExtraction,
    raw: RawExtraction,
    chunk_id: Uuid,
    file_path: &str,
) {
    // First surface form wins for casing.
    let mut canonical: BTreeMap<String, usize> = BTreeMap::new();
    for entity in raw.entities {
        let name = entity.name.trim();
        if name.is_empty() {
            continue;
        }
        let key = name.to_lowercase();
        if let Some(&idx) = canonical.get(&key) {
            // Duplicate within the chunk: keep the richer description.
            let existing = &mut output.entities[idx];
            if existing.description.is_empty() {
                existing.description = entity.description.trim().to_string();
            }
            continue;
        }
        let mut merged = Entity::new(
            name,
            entity.entity_type.trim().to_lowercase(),
            entity.description.trim(),
        );
        merged.push_source(chunk_id, file_path, usize::MAX);
        canonical.insert(key, output.entities.len());
        output.entities.push(merged);
    }

    for relation in raw.relations {
        let src_key = relation.source.trim().to_lowercase();
        let tgt_key = relation.target.trim().to_lowercase();
        let (Some(&src_idx), Some(&tgt_idx)) = (canonical.get(&src_key), canonical.get(&tgt_key))
        else {
            output.warnings.push(format!(
                "relation '{} -> {}' dropped: endpoint not extracted",
                relation.source.trim(),
                relation.target.trim()
            ));
            continue;
        };
        if src_idx == tgt_idx {
            output.warnings.push(format!(
                "relation on '{}' dropped: self-loop",
                relation.source.trim()
            ));
            continue;
        }
        let mut merged = Relation::new(
            output.entities[src_idx].name.clone(),
            output.entities[tgt_idx].name.clone(),
            relation.keywords.trim(),
            relation.description.trim(),
            relation.weight.clamp(0.1, 10.0),
        );
        merged.push_source(chunk_id, file_path, usize::MAX);
        output.relations.push(merged);
    }
}

/// Accumulates per-chunk extractions over a whole document, keyed
/// case-insensitively. Descriptions collect as ordered lists for the
/// summarizer; provenance lists keep chunk order.
#[derive(Debug, Default)]
pub struct DocumentGraph {
    entities: BTreeMap<String, AccumulatedEntity>,
    relations: BTreeMap<(String, String, String), AccumulatedRelation>,
}

/// An entity accumulated across chunks of one document.
#[derive(Debug)]
pub struct AccumulatedEntity {
    /// Canonical surface form (first seen).
    pub name: String,
    /// Entity type (first non-empty wins).
    pub entity_type: String,
    /// Ordered description fragments.
    pub descriptions: Vec<String>,
    /// Contributing chunks in order.
    pub chunk_ids: Vec<Uuid>,
    /// Contributing file paths.
    pub file_paths: Vec<String>,
}

/// A relation accumulated across chunks of one document.
#[derive(Debug)]
pub struct AccumulatedRelation {
    /// Canonical source name.
    pub src: String,
    /// Canonical target name.
    pub tgt: String,
    /// Keyword label.
    pub keywords: String,
    /// Ordered description fragments.
    pub descriptions: Vec<String>,
    /// Summed weight.
    pub weight: f64,
    /// Contributing chunks in order.
    pub chunk_ids: Vec<Uuid>,
    /// Contributing file paths.
    pub file_paths: Vec<String>,
}

impl DocumentGraph {
    /// Creates an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one chunk's extraction into the accumulator.
    pub fn absorb(&mut self, extraction: ChunkExtraction) {
        for entity in extraction.entities {
            let key = entity.name.to_lowercase();
            let slot = self
                .entities
                .entry(key)
                .or_insert_with(|| AccumulatedEntity {
                    name: entity.name.clone(),
                    entity_type: entity.entity_type.clone(),
                    descriptions: Vec::new(),
                    chunk_ids: Vec::new(),
                    file_paths: Vec::new(),
                });
            if slot.entity_type.is_empty() {
                slot.entity_type = entity.entity_type;
            }
            if !entity.description.is_empty()
                && !slot.descriptions.contains(&entity.description)
            {
                slot.descriptions.push(entity.description);
            }
            for chunk_id in entity.source_chunk_ids {
                if !slot.chunk_ids.contains(&chunk_id) {
                    slot.chunk_ids.push(chunk_id);
                }
            }
            for path in entity.source_file_paths {
                if !slot.file_paths.contains(&path) {
                    slot.file_paths.push(path);
                }
            }
        }

        for relation in extraction.relations {
            let key = (
                relation.src.to_lowercase(),
                relation.tgt.to_lowercase(),
                relation.keywords.clone(),
            );
            let slot = self
                .relations
                .entry(key)
                .or_insert_with(|| AccumulatedRelation {
                    src: relation.src.clone(),
                    tgt: relation.tgt.clone(),
                    keywords: relation.keywords.clone(),
                    descriptions: Vec::new(),
                    weight: 0.0,
                    chunk_ids: Vec::new(),
                    file_paths: Vec::new(),
                });
            slot.weight += relation.weight;
            if !relation.description.is_empty()
                && !slot.descriptions.contains(&relation.description)
            {
                slot.descriptions.push(relation.description);
            }
            for chunk_id in relation.source_chunk_ids {
                if !slot.chunk_ids.contains(&chunk_id) {
                    slot.chunk_ids.push(chunk_id);
                }
            }
            for path in relation.source_file_paths {
                if !slot.file_paths.contains(&path) {
                    slot.file_paths.push(path);
                }
            }
        }
    }

    /// Returns the accumulated entities in name order.
    #[must_use]
    pub fn entities(&self) -> impl Iterator<Item = &AccumulatedEntity> {
        self.entities.values()
    }

    /// Returns the accumulated relations in key order.
    #[must_use]
    pub fn relations(&self) -> impl Iterator<Item = &AccumulatedRelation> {
        self.relations.values()
    }

    /// Whether nothing was accumulated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_stable() {
        let a = content_hash(&["v2", "text"]);
        let b = content_hash(&["v2", "text"]);
        let c = content_hash(&["v2", "other"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_parse_extraction_tolerates_markdown() {
        let raw = "```json\n{\"entities\": [{\"name\": \"A\", \"type\": \"concept\"}], \"relations\": []}\n```";
        let parsed = parse_extraction(raw).unwrap();
        assert_eq!(parsed.entities.len(), 1);
    }

    #[test]
    fn test_parse_extraction_error_kind() {
        let err = parse_extraction("total garbage").unwrap_err();
        assert_eq!(err.kind(), "LLM_PARSE_ERROR");
    }

    #[test]
    fn test_normalize_dedups_case_insensitive() {
        let chunk_id = Uuid::now_v7();
        let raw = RawExtraction {
            entities: vec![
                RawEntity {
                    name: " Apple ".to_string(),
                    entity_type: "Organization".to_string(),
                    description: "a company".to_string(),
                },
                RawEntity {
                    name: "APPLE".to_string(),
                    entity_type: "organization".to_string(),
                    description: "dup".to_string(),
                },
                RawEntity {
                    name: String::new(),
                    entity_type: String::new(),
                    description: "nameless".to_string(),
                },
            ],
            relations: vec![],
        };
        let mut output = ChunkExtraction::default();
        normalize_into(&mut output, raw, chunk_id, "doc.txt");
        assert_eq!(output.entities.len(), 1);
        assert_eq!(output.entities[0].name, "Apple");
        assert_eq!(output.entities[0].entity_type, "organization");
        assert_eq!(output.entities[0].source_chunk_ids, vec![chunk_id]);
    }

    #[test]
    fn test_normalize_drops_dangling_relations() {
        let raw = RawExtraction {
            entities: vec![RawEntity {
                name: "A".to_string(),
                entity_type: String::new(),
                description: String::new(),
            }],
            relations: vec![RawRelation {
                source: "A".to_string(),
                target: "Ghost".to_string(),
                keywords: "haunts".to_string(),
                description: String::new(),
                weight: 1.0,
            }],
        };
        let mut output = ChunkExtraction::default();
        normalize_into(&mut output, raw, Uuid::now_v7(), "doc.txt");
        assert!(output.relations.is_empty());
        assert_eq!(output.warnings.len(), 1);
    }

    #[test]
    fn test_accumulator_merges_across_chunks() {
        let mut graph = DocumentGraph::new();
        let chunk_a = Uuid::now_v7();
        let chunk_b = Uuid::now_v7();

        let mut first = ChunkExtraction::default();
        let mut entity = Entity::new("Turing", "person", "mathematician");
        entity.push_source(chunk_a, "d1.txt", usize::MAX);
        first.entities.push(entity);
        graph.absorb(first);

        let mut second = ChunkExtraction::default();
        let mut entity = Entity::new("turing", "person", "computing pioneer");
        entity.push_source(chunk_b, "d1.txt", usize::MAX);
        second.entities.push(entity);
        graph.absorb(second);

        let accumulated: Vec<_> = graph.entities().collect();
        assert_eq!(accumulated.len(), 1);
        assert_eq!(accumulated[0].name, "Turing");
        assert_eq!(accumulated[0].descriptions.len(), 2);
        assert_eq!(accumulated[0].chunk_ids, vec![chunk_a, chunk_b]);
    }
}
