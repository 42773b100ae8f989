//! Final answer synthesis (C18).
//!
//! Takes the assembled, budget-bound context text and the original query,
//! asks the LLM for an answer with numeric citations, and returns the
//! response verbatim. The caller maps `[k]` onto its ordered source list.

use crate::llm::{LlmClient, prompts};
use crate::services::{TokenOp, TokenTracker};
use crate::Result;
use std::sync::Arc;

/// Answer synthesizer.
pub struct Synthesizer {
    llm: Arc<dyn LlmClient>,
    max_tokens: u32,
}

impl Synthesizer {
    /// Creates a synthesizer.
    #[must_use]
    pub const fn new(llm: Arc<dyn LlmClient>, max_tokens: u32) -> Self {
        Self { llm, max_tokens }
    }

    /// Generates the final answer from the assembled context.
    ///
    /// # Errors
    ///
    /// Returns an error if the LLM call fails.
    pub fn synthesize(
        &self,
        query: &str,
        context_text: &str,
        tracker: &TokenTracker,
    ) -> Result<String> {
        let prompt = prompts::synthesize(query, context_text);
        let completion = self.llm.generate(&prompt, self.max_tokens)?;
        tracker.record(TokenOp::Synthesis, self.llm.name(), completion.usage);
        Ok(completion.text.trim().to_string())
    }
}
