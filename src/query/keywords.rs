//! LLM-based high/low-level keyword extraction for queries (C10).
//!
//! Results are cached two ways: an in-process LRU with the configured
//! TTL, and the persisted extraction cache keyed by the query hash (also
//! TTL-gated on read). Both are best-effort; stale reads are tolerated.
//! If the response cannot be parsed, the whole query becomes a single
//! low-level keyword.

use crate::config::QueryConfig;
use crate::llm::{LlmClient, prompts};
use crate::models::{CacheType, CachedExtraction, KeywordResult, ProjectId};
use crate::pipeline::content_hash;
use crate::services::{TokenOp, TokenTracker};
use crate::storage::ExtractionCacheStore;
use crate::Result;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Keyword extractor with layered caching.
pub struct KeywordExtractor {
    llm: Arc<dyn LlmClient>,
    cache: Arc<dyn ExtractionCacheStore>,
    memory: Mutex<LruCache<(ProjectId, String), (KeywordResult, i64)>>,
    ttl_secs: i64,
    max_completion_tokens: u32,
}

impl KeywordExtractor {
    /// Creates an extractor from the query configuration.
    #[must_use]
    pub fn new(
        llm: Arc<dyn LlmClient>,
        cache: Arc<dyn ExtractionCacheStore>,
        config: &QueryConfig,
    ) -> Self {
        let capacity = NonZeroUsize::new(config.keyword_cache_capacity.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            llm,
            cache,
            memory: Mutex::new(LruCache::new(capacity)),
            ttl_secs: i64::try_from(config.keyword_cache_ttl_secs).unwrap_or(i64::MAX),
            max_completion_tokens: 256,
        }
    }

    /// Extracts high/low-level keywords for a query, consulting the
    /// caches first.
    ///
    /// # Errors
    ///
    /// Returns an error only for LLM or storage failures; parse failures
    /// take the fallback path.
    pub fn extract(
        &self,
        project: ProjectId,
        query: &str,
        tracker: &TokenTracker,
    ) -> Result<KeywordResult> {
        let query_hash = content_hash(&[query]);
        let now = crate::current_timestamp();

        {
            let mut memory = self
                .memory
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some((result, cached_at)) = memory.get(&(project, query_hash.clone()))
                && now - *cached_at <= self.ttl_secs
            {
                return Ok(result.clone());
            }
        }

        if let Some(hit) = self
            .cache
            .get(project, CacheType::KeywordExtraction, &query_hash)?
            && now - hit.created_at <= self.ttl_secs
            && let Some(result) = parse_keywords(&hit.result, &query_hash)
        {
            self.remember(project, &query_hash, &result, now);
            return Ok(result);
        }

        let prompt = prompts::keyword_extraction(query);
        let completion = self.llm.generate(&prompt, self.max_completion_tokens)?;
        tracker.record(TokenOp::KeywordExtraction, self.llm.name(), completion.usage);

        let result = parse_keywords(&completion.text, &query_hash).unwrap_or_else(|| {
            tracing::debug!("keyword parse failed, falling back to whole query");
            KeywordResult {
                high_level: Vec::new(),
                low_level: vec![query.trim().to_string()],
                query_hash: query_hash.clone(),
                fallback: true,
            }
        });

        let entry = CachedExtraction {
            id: Uuid::now_v7(),
            project_id: project,
            cache_type: CacheType::KeywordExtraction,
            chunk_id: None,
            content_hash: query_hash.clone(),
            result: completion.text,
            tokens_used: completion.usage.total(),
            created_at: now,
        };
        if let Err(err) = self.cache.put(&entry) {
            // Best-effort: a failed cache write never fails the query.
            tracing::debug!(error = %err, "keyword cache write failed");
        }
        self.remember(project, &query_hash, &result, now);
        Ok(result)
    }

    fn remember(&self, project: ProjectId, query_hash: &str, result: &KeywordResult, now: i64) {
        self.memory
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .put((project, query_hash.to_string()), (result.clone(), now));
    }
}

/// Parses the two expected lines, tolerant to whitespace, casing, and
/// trailing punctuation. Returns `None` when neither line is present.
fn parse_keywords(response: &str, query_hash: &str) -> Option<KeywordResult> {
    let mut high_level = Vec::new();
    let mut low_level = Vec::new();
    let mut saw_marker = false;

    for line in response.lines() {
        let trimmed = line.trim();
        let upper = trimmed.to_ascii_uppercase();
        if let Some(rest) = upper
            .strip_prefix("HIGH_LEVEL")
            .map(|_| after_marker(trimmed, "HIGH_LEVEL"))
        {
            saw_marker = true;
            high_level = split_terms(rest);
        } else if let Some(rest) = upper
            .strip_prefix("LOW_LEVEL")
            .map(|_| after_marker(trimmed, "LOW_LEVEL"))
        {
            saw_marker = true;
            low_level = split_terms(rest);
        }
    }

    if !saw_marker {
        return None;
    }
    Some(KeywordResult {
        high_level,
        low_level,
        query_hash: query_hash.to_string(),
        fallback: false,
    })
}

/// Slices off the marker and its separator, case-insensitively.
fn after_marker<'a>(line: &'a str, marker: &str) -> &'a str {
    line[marker.len()..].trim_start_matches([':', ' ', '\t'])
}

fn split_terms(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|term| {
            term.trim_matches(|c: char| {
                c.is_whitespace() || matches!(c, '.' | ';' | '"' | '\'')
            })
            .to_string()
        })
        .filter(|term| !term.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_well_formed() {
        let response = "HIGH_LEVEL: funding, research strategy\nLOW_LEVEL: Apple Inc., OpenAI";
        let result = parse_keywords(response, "h").unwrap();
        assert_eq!(result.high_level, vec!["funding", "research strategy"]);
        assert_eq!(result.low_level, vec!["Apple Inc", "OpenAI"]);
        assert!(!result.fallback);
    }

    #[test]
    fn test_parse_tolerates_noise() {
        let response = "Sure! Here you go:\n  high_level:  themes , ideas.  \nLOW_LEVEL : \"Turing\" ;\n";
        let result = parse_keywords(response, "h").unwrap();
        assert_eq!(result.high_level, vec!["themes", "ideas"]);
        assert_eq!(result.low_level, vec!["Turing"]);
    }

    #[test]
    fn test_parse_failure_returns_none() {
        assert!(parse_keywords("no markers at all here", "h").is_none());
        assert!(parse_keywords("", "h").is_none());
    }

    #[test]
    fn test_single_marker_is_enough() {
        let result = parse_keywords("LOW_LEVEL: x", "h").unwrap();
        assert!(result.high_level.is_empty());
        assert_eq!(result.low_level, vec!["x"]);
    }
}
