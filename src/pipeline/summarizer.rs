//! Threshold-based description summarization (C9).
//!
//! Small accumulations are joined with the configured separator; past the
//! thresholds a map-reduce pass summarizes batches via the LLM and then
//! recursively reduces the batch summaries, bounded by
//! `max_map_iterations`. If the reduce step still overflows after the
//! bound, the result is truncated to the token ceiling with a warning.

use crate::config::DescriptionConfig;
use crate::llm::{LlmClient, prompts};
use crate::models::{CacheType, CachedExtraction, ProjectId};
use crate::pipeline::extractor::content_hash;
use crate::services::{TokenOp, TokenTracker};
use crate::storage::ExtractionCacheStore;
use crate::text::Tokenizer;
use crate::Result;
use std::sync::Arc;
use uuid::Uuid;

/// Description summarizer.
pub struct DescriptionSummarizer {
    llm: Arc<dyn LlmClient>,
    cache: Arc<dyn ExtractionCacheStore>,
    tokenizer: Tokenizer,
    config: DescriptionConfig,
}

impl DescriptionSummarizer {
    /// Creates a summarizer.
    #[must_use]
    pub fn new(
        llm: Arc<dyn LlmClient>,
        cache: Arc<dyn ExtractionCacheStore>,
        tokenizer: Tokenizer,
        config: DescriptionConfig,
    ) -> Self {
        Self {
            llm,
            cache,
            tokenizer,
            config,
        }
    }

    /// Whether the accumulated descriptions exceed the summarization
    /// thresholds (count or total token size).
    #[must_use]
    pub fn needs_summarization(&self, descriptions: &[String]) -> bool {
        if descriptions.len() >= self.config.force_summary_count {
            return true;
        }
        let total: usize = descriptions
            .iter()
            .map(|d| self.tokenizer.count_tokens(d))
            .sum();
        total >= self.config.summary_context_size
    }

    /// Produces the final description for `subject`: a separator-join for
    /// small accumulations, map-reduce summarization otherwise. Results
    /// are cached under `SUMMARIZATION`.
    ///
    /// # Errors
    ///
    /// Returns an error if an LLM call or cache access fails.
    pub fn summarize(
        &self,
        project: ProjectId,
        subject: &str,
        descriptions: &[String],
        tracker: &TokenTracker,
    ) -> Result<String> {
        if descriptions.is_empty() {
            return Ok(String::new());
        }
        if !self.needs_summarization(descriptions) {
            return Ok(descriptions.join(&self.config.separator));
        }

        let joined = descriptions.join(&self.config.separator);
        let hash = content_hash(&[subject, &joined]);
        if let Some(hit) = self.cache.get(project, CacheType::Summarization, &hash)? {
            return Ok(hit.result);
        }

        let summary = self.map_reduce(subject, descriptions.to_vec(), tracker)?;

        let entry = CachedExtraction {
            id: Uuid::now_v7(),
            project_id: project,
            cache_type: CacheType::Summarization,
            chunk_id: None,
            content_hash: hash,
            result: summary.clone(),
            tokens_used: 0,
            created_at: crate::current_timestamp(),
        };
        self.cache.put(&entry)?;
        Ok(summary)
    }

    /// Map: summarize token-bounded batches. Reduce: recursively
    /// summarize the batch summaries, bounded by `max_map_iterations`.
    fn map_reduce(
        &self,
        subject: &str,
        mut fragments: Vec<String>,
        tracker: &TokenTracker,
    ) -> Result<String> {
        for iteration in 0..self.config.max_map_iterations {
            let batches = self.partition(&fragments);
            if batches.len() <= 1 && iteration > 0 {
                break;
            }
            let mut summaries = Vec::with_capacity(batches.len());
            for batch in &batches {
                summaries.push(self.summarize_batch(subject, batch, tracker)?);
            }
            fragments = summaries;
            if fragments.len() == 1
                && self.tokenizer.count_tokens(&fragments[0]) <= self.config.summary_max_tokens
            {
                break;
            }
        }

        let mut result = fragments.join(&self.config.separator);
        if self.tokenizer.count_tokens(&result) > self.config.summary_max_tokens {
            tracing::warn!(
                subject,
                "summary still over limit after {} iterations; truncating",
                self.config.max_map_iterations
            );
            result = self.truncate_to_tokens(&result, self.config.summary_max_tokens);
        }
        Ok(result)
    }

    /// Partitions fragments into batches of at most `summary_max_tokens`
    /// tokens each.
    fn partition(&self, fragments: &[String]) -> Vec<Vec<String>> {
        let mut batches = Vec::new();
        let mut current = Vec::new();
        let mut current_tokens = 0usize;
        for fragment in fragments {
            let tokens = self.tokenizer.count_tokens(fragment);
            if current_tokens + tokens > self.config.summary_max_tokens && !current.is_empty() {
                batches.push(std::mem::take(&mut current));
                current_tokens = 0;
            }
            current_tokens += tokens;
            current.push(fragment.clone());
        }
        if !current.is_empty() {
            batches.push(current);
        }
        batches
    }

    fn summarize_batch(
        &self,
        subject: &str,
        batch: &[String],
        tracker: &TokenTracker,
    ) -> Result<String> {
        let joined = batch.join("\n- ");
        let prompt = prompts::summarize_descriptions(subject, &format!("- {joined}"));
        let max_tokens = u32::try_from(self.config.summary_max_tokens).unwrap_or(512);
        let completion = self.llm.generate(&prompt, max_tokens)?;
        tracker.record(TokenOp::Summarization, self.llm.name(), completion.usage);
        Ok(completion.text.trim().to_string())
    }

    fn truncate_to_tokens(&self, text: &str, max_tokens: usize) -> String {
        let mut kept = Vec::new();
        let mut total = 0usize;
        for word in text.split_whitespace() {
            let cost = self.tokenizer.count_tokens(word).max(1);
            if total + cost > max_tokens {
                break;
            }
            total += cost;
            kept.push(word);
        }
        kept.join(" ")
    }
}
