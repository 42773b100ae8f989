//! LLM, embedding, and shared HTTP client plumbing.
//!
//! The core consumes two external endpoints through the traits here:
//!
//! | Trait | Contract |
//! |-------|----------|
//! | [`LlmClient`] | `generate(prompt, max_tokens) → text + token usage` |
//! | [`EmbeddingClient`] | `embed(inputs[]) → vectors + token usage` |
//!
//! The shipped implementations speak the OpenAI-compatible wire format
//! (which also covers self-hosted endpoints via a base-URL override).
//! Production call sites wrap the LLM client in
//! [`ResilientLlmClient`](resilience::ResilientLlmClient), which adds
//! bounded exponential backoff and a circuit breaker.

mod openai;
pub mod prompts;
pub mod resilience;

pub use openai::{OpenAiChatClient, OpenAiEmbeddingClient};
pub use resilience::{LlmResilienceConfig, ResilientLlmClient};

use crate::Result;
use std::time::Duration;

/// Token accounting for one endpoint call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallUsage {
    /// Prompt-side tokens.
    pub input_tokens: u64,
    /// Completion-side tokens.
    pub output_tokens: u64,
}

impl CallUsage {
    /// Total tokens across both sides.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// A completion returned by an LLM endpoint.
#[derive(Debug, Clone)]
pub struct Completion {
    /// Generated text.
    pub text: String,
    /// Token usage reported by the endpoint (estimated when absent).
    pub usage: CallUsage,
}

/// Trait for LLM endpoints.
pub trait LlmClient: Send + Sync {
    /// The provider name.
    fn name(&self) -> &'static str;

    /// Generates a completion for the given prompt.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::LlmTransient`] for timeouts, 5xx, and rate
    /// limits, [`crate::Error::LlmFatal`] otherwise.
    fn generate(&self, prompt: &str, max_tokens: u32) -> Result<Completion>;
}

impl<T: LlmClient + ?Sized> LlmClient for std::sync::Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn generate(&self, prompt: &str, max_tokens: u32) -> Result<Completion> {
        (**self).generate(prompt, max_tokens)
    }
}

/// A batch of embeddings returned by an embedding endpoint.
#[derive(Debug, Clone)]
pub struct EmbeddingBatch {
    /// One vector per input, in input order.
    pub vectors: Vec<Vec<f32>>,
    /// Token usage reported by the endpoint.
    pub usage: CallUsage,
}

/// Trait for embedding endpoints.
pub trait EmbeddingClient: Send + Sync {
    /// The vector dimensionality every call returns.
    fn dimensions(&self) -> usize;

    /// Embeds a batch of inputs.
    ///
    /// # Errors
    ///
    /// Same classification as [`LlmClient::generate`].
    fn embed(&self, inputs: &[&str]) -> Result<EmbeddingBatch>;

    /// Embeds a single input.
    ///
    /// # Errors
    ///
    /// Same classification as [`LlmClient::generate`].
    fn embed_one(&self, input: &str) -> Result<Vec<f32>> {
        let mut batch = self.embed(&[input])?;
        batch.vectors.pop().ok_or_else(|| crate::Error::LlmFatal {
            operation: "embed".to_string(),
            cause: "endpoint returned no vectors".to_string(),
        })
    }
}

/// HTTP client configuration for endpoint calls.
#[derive(Debug, Clone, Copy)]
pub struct HttpConfig {
    /// Request timeout in milliseconds (0 to disable).
    pub timeout_ms: u64,
    /// Connect timeout in milliseconds (0 to disable).
    pub connect_timeout_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            connect_timeout_ms: 3_000,
        }
    }
}

/// Builds a blocking HTTP client with the configured timeouts.
#[must_use]
pub fn build_http_client(config: HttpConfig) -> reqwest::blocking::Client {
    let mut builder = reqwest::blocking::Client::builder();
    if config.timeout_ms > 0 {
        builder = builder.timeout(Duration::from_millis(config.timeout_ms));
    }
    if config.connect_timeout_ms > 0 {
        builder = builder.connect_timeout(Duration::from_millis(config.connect_timeout_ms));
    }
    builder.build().unwrap_or_else(|err| {
        tracing::warn!("Failed to build HTTP client, using defaults: {err}");
        reqwest::blocking::Client::new()
    })
}

/// Extracts JSON from an LLM response, handling markdown code blocks.
///
/// Handles, in order: ` ```json ... ``` ` blocks, bare ` ``` ` blocks,
/// raw objects (first `{` to last `}`), and arrays (first `[` to last
/// `]`). Falls back to the trimmed input.
#[must_use]
pub fn extract_json_from_response(response: &str) -> &str {
    let trimmed = response.trim();

    if let Some((json_start, end)) = trimmed.find("```json").and_then(|start| {
        let json_start = start + 7;
        trimmed[json_start..]
            .find("```")
            .map(|end| (json_start, end))
    }) {
        return trimmed[json_start..json_start + end].trim();
    }

    if let Some((json_start, end)) = trimmed.find("```").and_then(|start| {
        let content_start = start + 3;
        let after_marker = &trimmed[content_start..];
        let json_start = after_marker
            .find(['{', '['])
            .map_or(content_start, |pos| content_start + pos);
        trimmed[json_start..]
            .find("```")
            .map(|end| (json_start, end))
    }) {
        return trimmed[json_start..json_start + end].trim();
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && start < end
    {
        return &trimmed[start..=end];
    }

    if let (Some(start), Some(end)) = (trimmed.find('['), trimmed.rfind(']'))
        && start < end
    {
        return &trimmed[start..=end];
    }

    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_raw() {
        let response = r#"{"key": "value"}"#;
        assert_eq!(extract_json_from_response(response), r#"{"key": "value"}"#);
    }

    #[test]
    fn test_extract_json_markdown() {
        let response = "```json\n{\"key\": \"value\"}\n```";
        assert!(extract_json_from_response(response).contains("\"key\""));
    }

    #[test]
    fn test_extract_json_with_prose() {
        let response = "Here is the result: {\"key\": \"value\"} hope this helps";
        assert_eq!(extract_json_from_response(response), r#"{"key": "value"}"#);
    }

    #[test]
    fn test_extract_json_array() {
        let response = r#"["a", "b"]"#;
        assert_eq!(extract_json_from_response(response), r#"["a", "b"]"#);
    }

    #[test]
    fn test_call_usage_total() {
        let usage = CallUsage {
            input_tokens: 10,
            output_tokens: 5,
        };
        assert_eq!(usage.total(), 15);
    }
}
