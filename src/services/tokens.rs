//! Request-scoped LLM token accounting.
//!
//! A [`TokenTracker`] is created at request ingress and passed by
//! reference down the pipeline; it is an append-only, thread-safe log of
//! per-call usage, summarized into totals and a per-operation breakdown
//! when the response completes.

use crate::llm::CallUsage;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

/// What kind of LLM-touching operation spent the tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenOp {
    /// First-pass entity/relation extraction.
    EntityExtraction,
    /// Follow-up gleaning pass.
    Gleaning,
    /// Description summarization.
    Summarization,
    /// Query keyword extraction.
    KeywordExtraction,
    /// Embedding calls.
    Embedding,
    /// Final answer synthesis.
    Synthesis,
}

impl TokenOp {
    /// Returns the operation as its wire string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::EntityExtraction => "entity_extraction",
            Self::Gleaning => "gleaning",
            Self::Summarization => "summarization",
            Self::KeywordExtraction => "keyword_extraction",
            Self::Embedding => "embedding",
            Self::Synthesis => "synthesis",
        }
    }
}

impl fmt::Display for TokenOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded LLM call.
#[derive(Debug, Clone, Serialize)]
pub struct TokenRecord {
    /// Operation kind.
    pub op: TokenOp,
    /// Model that served the call.
    pub model: String,
    /// Prompt-side tokens.
    pub input_tokens: u64,
    /// Completion-side tokens.
    pub output_tokens: u64,
    /// Unix seconds when the call completed.
    pub timestamp: i64,
}

/// Per-operation aggregate.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct OpUsage {
    /// Number of calls.
    pub calls: u64,
    /// Prompt-side tokens.
    pub input_tokens: u64,
    /// Completion-side tokens.
    pub output_tokens: u64,
}

/// Aggregated usage returned to callers on response completion.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TokenUsageSummary {
    /// Total prompt-side tokens.
    pub input_tokens: u64,
    /// Total completion-side tokens.
    pub output_tokens: u64,
    /// Total calls recorded.
    pub calls: u64,
    /// Breakdown by operation kind.
    pub by_op: HashMap<TokenOp, OpUsage>,
}

impl TokenUsageSummary {
    /// Total tokens across both sides.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Request-scoped, thread-safe token log.
#[derive(Debug, Default)]
pub struct TokenTracker {
    records: Mutex<Vec<TokenRecord>>,
}

impl TokenTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one call's usage.
    pub fn record(&self, op: TokenOp, model: &str, usage: CallUsage) {
        let record = TokenRecord {
            op,
            model: model.to_string(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            timestamp: crate::current_timestamp(),
        };
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(record);
    }

    /// Aggregates the log into totals and a per-operation breakdown.
    #[must_use]
    pub fn summary(&self) -> TokenUsageSummary {
        let records = self
            .records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut summary = TokenUsageSummary::default();
        for record in records.iter() {
            summary.input_tokens += record.input_tokens;
            summary.output_tokens += record.output_tokens;
            summary.calls += 1;
            let op = summary.by_op.entry(record.op).or_default();
            op.calls += 1;
            op.input_tokens += record.input_tokens;
            op.output_tokens += record.output_tokens;
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_summary_aggregates_by_op() {
        let tracker = TokenTracker::new();
        tracker.record(
            TokenOp::EntityExtraction,
            "m",
            CallUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
        );
        tracker.record(
            TokenOp::EntityExtraction,
            "m",
            CallUsage {
                input_tokens: 10,
                output_tokens: 5,
            },
        );
        tracker.record(
            TokenOp::Synthesis,
            "m",
            CallUsage {
                input_tokens: 1,
                output_tokens: 2,
            },
        );

        let summary = tracker.summary();
        assert_eq!(summary.calls, 3);
        assert_eq!(summary.total(), 168);
        assert_eq!(summary.by_op[&TokenOp::EntityExtraction].calls, 2);
        assert_eq!(summary.by_op[&TokenOp::EntityExtraction].input_tokens, 110);
        assert_eq!(summary.by_op[&TokenOp::Synthesis].output_tokens, 2);
    }

    #[test]
    fn test_concurrent_recording() {
        let tracker = Arc::new(TokenTracker::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        tracker.record(
                            TokenOp::Embedding,
                            "m",
                            CallUsage {
                                input_tokens: 1,
                                output_tokens: 0,
                            },
                        );
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(tracker.summary().calls, 800);
    }
}
