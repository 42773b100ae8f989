//! Shared test fixtures: a scripted mock LLM and a deterministic hash
//! embedder, so integration tests replay realistic pipelines without
//! network access.

// Test fixtures use unwrap for brevity.
#![allow(clippy::unwrap_used, dead_code)]

use graphloom::config::GraphLoomConfig;
use graphloom::llm::{CallUsage, Completion, EmbeddingBatch, EmbeddingClient, LlmClient};
use graphloom::services::Engine;
use graphloom::Result;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Which pipeline prompt a mock rule answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Extraction,
    Gleaning,
    Summarize,
    Keywords,
    Synthesis,
}

fn classify(prompt: &str) -> PromptKind {
    if prompt.contains("MISSED") {
        PromptKind::Gleaning
    } else if prompt.contains("Extract every entity") {
        PromptKind::Extraction
    } else if prompt.contains("single comprehensive summary") {
        PromptKind::Summarize
    } else if prompt.contains("HIGH_LEVEL:") {
        PromptKind::Keywords
    } else {
        PromptKind::Synthesis
    }
}

struct Rule {
    kind: PromptKind,
    needle: String,
    response: String,
}

/// Scripted LLM: routes each prompt by kind and registered substring.
pub struct MockLlm {
    rules: Mutex<Vec<Rule>>,
    /// Calls per prompt kind, for cache-hit assertions.
    pub extraction_calls: AtomicU32,
    pub gleaning_calls: AtomicU32,
    pub summarize_calls: AtomicU32,
    pub keyword_calls: AtomicU32,
    pub synthesis_calls: AtomicU32,
}

impl MockLlm {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            extraction_calls: AtomicU32::new(0),
            gleaning_calls: AtomicU32::new(0),
            summarize_calls: AtomicU32::new(0),
            keyword_calls: AtomicU32::new(0),
            synthesis_calls: AtomicU32::new(0),
        }
    }

    /// Registers a response for prompts of `kind` containing `needle`.
    pub fn on(&self, kind: PromptKind, needle: &str, response: &str) {
        self.rules.lock().unwrap().push(Rule {
            kind,
            needle: needle.to_string(),
            response: response.to_string(),
        });
    }

    fn default_response(kind: PromptKind, prompt: &str) -> String {
        match kind {
            PromptKind::Extraction | PromptKind::Gleaning => {
                r#"{"entities": [], "relations": []}"#.to_string()
            }
            PromptKind::Summarize => {
                // Echo the fragments so assertions can see the inputs.
                let body = prompt
                    .split("Descriptions:")
                    .nth(1)
                    .unwrap_or("")
                    .split("Respond with")
                    .next()
                    .unwrap_or("");
                let fragments: Vec<&str> = body
                    .lines()
                    .map(|l| l.trim_start_matches("- ").trim())
                    .filter(|l| !l.is_empty())
                    .collect();
                format!("Combined: {}", fragments.join("; "))
            }
            PromptKind::Keywords => "HIGH_LEVEL:\nLOW_LEVEL:".to_string(),
            PromptKind::Synthesis => {
                // Echo the assembled context so isolation assertions can
                // inspect exactly what retrieval produced.
                let context = prompt
                    .split("Context:")
                    .nth(1)
                    .unwrap_or("")
                    .split("Question:")
                    .next()
                    .unwrap_or("");
                format!("Based on the context [1]: {}", context.trim())
            }
        }
    }
}

impl LlmClient for MockLlm {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn generate(&self, prompt: &str, _max_tokens: u32) -> Result<Completion> {
        let kind = classify(prompt);
        match kind {
            PromptKind::Extraction => &self.extraction_calls,
            PromptKind::Gleaning => &self.gleaning_calls,
            PromptKind::Summarize => &self.summarize_calls,
            PromptKind::Keywords => &self.keyword_calls,
            PromptKind::Synthesis => &self.synthesis_calls,
        }
        .fetch_add(1, Ordering::SeqCst);

        let rules = self.rules.lock().unwrap();
        let text = rules
            .iter()
            .find(|r| r.kind == kind && prompt.contains(&r.needle))
            .map_or_else(|| Self::default_response(kind, prompt), |r| r.response.clone());

        Ok(Completion {
            text,
            usage: CallUsage {
                input_tokens: 10,
                output_tokens: 5,
            },
        })
    }
}

/// Embedding dimensionality used by every test engine.
pub const TEST_DIMENSIONS: usize = 32;

/// Deterministic word-hash embedder: texts sharing words land near each
/// other under cosine distance.
pub struct HashEmbedder;

impl EmbeddingClient for HashEmbedder {
    fn dimensions(&self) -> usize {
        TEST_DIMENSIONS
    }

    fn embed(&self, inputs: &[&str]) -> Result<EmbeddingBatch> {
        let vectors = inputs
            .iter()
            .map(|text| {
                let mut vector = vec![0.0f32; TEST_DIMENSIONS];
                for word in text.to_lowercase().split_whitespace() {
                    let cleaned: String =
                        word.chars().filter(|c| c.is_alphanumeric()).collect();
                    if cleaned.is_empty() {
                        continue;
                    }
                    let mut hash = 0usize;
                    for byte in cleaned.bytes() {
                        hash = hash.wrapping_mul(31).wrapping_add(byte as usize);
                    }
                    vector[hash % TEST_DIMENSIONS] += 1.0;
                }
                let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
                if norm > 0.0 {
                    for value in &mut vector {
                        *value /= norm;
                    }
                }
                vector
            })
            .collect();
        Ok(EmbeddingBatch {
            vectors,
            usage: CallUsage {
                input_tokens: 1,
                output_tokens: 0,
            },
        })
    }
}

/// In-memory engine configuration matched to the test embedder.
pub fn test_config() -> GraphLoomConfig {
    let mut config = GraphLoomConfig::in_memory();
    config.embedding.dimensions = TEST_DIMENSIONS;
    config.schedule.batch_size = 16;
    config
}

/// Builds an engine over the shared mock LLM and hash embedder.
pub fn test_engine(llm: Arc<MockLlm>) -> Engine {
    Engine::with_clients(test_config(), llm, Arc::new(HashEmbedder)).unwrap()
}

/// JSON extraction payload helper: one entity, no relations.
pub fn entity_json(name: &str, entity_type: &str, description: &str) -> String {
    format!(
        r#"{{"entities": [{{"name": "{name}", "type": "{entity_type}", "description": "{description}"}}], "relations": []}}"#
    )
}
