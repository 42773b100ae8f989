//! Token-budgeted round-robin context assembly (C12).
//!
//! `merge` interleaves named sources round-robin until the budget is
//! exhausted or every source is empty. An item that would overflow the
//! remaining budget is skipped (never truncated) and the budget is tried
//! on the next source. Order within a single source is preserved.
//!
//! `assemble` lets the executors apply the entity/relation/chunk budget
//! split: each section is merged against its own budget and any unused
//! remainder is donated to the next section.

use crate::text::Tokenizer;
use uuid::Uuid;

/// One candidate context item.
#[derive(Debug, Clone)]
pub struct ContextItem {
    /// The text that will enter the prompt.
    pub content: String,
    /// Chunk id, when the item is a stored chunk.
    pub chunk_id: Option<Uuid>,
    /// Owning document, when known.
    pub document_id: Option<Uuid>,
    /// Position of the chunk within its document.
    pub chunk_index: Option<usize>,
    /// Relevance score in `[0, 1]`, when ranked.
    pub relevance: Option<f64>,
}

impl ContextItem {
    /// Creates a plain text item (entity or relation rendering).
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            chunk_id: None,
            document_id: None,
            chunk_index: None,
            relevance: None,
        }
    }
}

/// A named, ordered source of context items.
#[derive(Debug, Clone)]
pub struct ContextSource {
    /// Source label carried onto every included item (`entities`,
    /// `relations`, `chunks`).
    pub label: String,
    /// Candidate items, best first.
    pub items: Vec<ContextItem>,
}

impl ContextSource {
    /// Creates a source.
    #[must_use]
    pub fn new(label: impl Into<String>, items: Vec<ContextItem>) -> Self {
        Self {
            label: label.into(),
            items,
        }
    }
}

/// An included item with its source label.
#[derive(Debug, Clone)]
pub struct MergedItem {
    /// Label of the source that produced the item.
    pub source_label: String,
    /// The item itself.
    pub item: ContextItem,
}

/// Result of a merge.
#[derive(Debug, Clone, Default)]
pub struct MergedContext {
    /// Included items in inclusion order.
    pub items: Vec<MergedItem>,
    /// Tokens consumed by the included items.
    pub tokens_used: usize,
    /// Items skipped because they would have overflowed the budget.
    pub items_truncated: usize,
}

impl MergedContext {
    /// Renders the numbered context text; `[k]` refers to `items[k - 1]`.
    #[must_use]
    pub fn render(&self) -> String {
        let mut text = String::new();
        for (i, merged) in self.items.iter().enumerate() {
            text.push_str(&format!(
                "[{}] ({}) {}\n",
                i + 1,
                merged.source_label,
                merged.item.content.trim()
            ));
        }
        text
    }

    /// Appends another merged context, preserving numbering order.
    pub fn extend(&mut self, other: Self) {
        self.items.extend(other.items);
        self.tokens_used += other.tokens_used;
        self.items_truncated += other.items_truncated;
    }
}

/// Round-robin merge across sources within a token budget.
#[must_use]
pub fn merge(sources: &[ContextSource], max_tokens: usize, tokenizer: &Tokenizer) -> MergedContext {
    let mut cursors = vec![0usize; sources.len()];
    let mut result = MergedContext::default();
    let mut remaining = max_tokens;

    loop {
        let mut advanced = false;
        for (source, cursor) in sources.iter().zip(cursors.iter_mut()) {
            if *cursor >= source.items.len() {
                continue;
            }
            let item = &source.items[*cursor];
            *cursor += 1;
            advanced = true;
            let cost = tokenizer.count_tokens(&item.content);
            if cost > remaining {
                // Skip, not truncate; the remaining budget is tried on
                // the next source.
                result.items_truncated += 1;
                continue;
            }
            remaining -= cost;
            result.tokens_used += cost;
            result.items.push(MergedItem {
                source_label: source.label.clone(),
                item: item.clone(),
            });
        }
        if !advanced {
            break;
        }
    }
    result
}

/// A section with its own budget share for [`assemble`].
#[derive(Debug, Clone)]
pub struct BudgetedSection {
    /// The source to merge.
    pub source: ContextSource,
    /// Fraction of the total budget allotted to this section.
    pub ratio: f64,
}

/// Merges sections sequentially under a split budget; unused budget is
/// donated to the next section.
#[must_use]
pub fn assemble(
    sections: Vec<BudgetedSection>,
    max_tokens: usize,
    tokenizer: &Tokenizer,
) -> MergedContext {
    let mut result = MergedContext::default();
    let mut carry = 0usize;
    for section in sections {
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let own = (max_tokens as f64 * section.ratio).floor() as usize;
        let budget = own + carry;
        let merged = merge(std::slice::from_ref(&section.source), budget, tokenizer);
        carry = budget - merged.tokens_used;
        result.extend(merged);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(text: &str) -> ContextItem {
        ContextItem::text(text)
    }

    #[test]
    fn test_round_robin_alternates() {
        let tokenizer = Tokenizer::default();
        let sources = vec![
            ContextSource::new("a", vec![item("alpha one"), item("alpha two")]),
            ContextSource::new("b", vec![item("beta one"), item("beta two")]),
        ];
        let merged = merge(&sources, 1000, &tokenizer);
        let labels: Vec<&str> = merged.items.iter().map(|m| m.source_label.as_str()).collect();
        assert_eq!(labels, vec!["a", "b", "a", "b"]);
    }

    #[test]
    fn test_overflow_item_skipped_not_truncated() {
        let tokenizer = Tokenizer::default();
        let huge: String = (0..100).map(|i| format!("word{i} ")).collect();
        let sources = vec![
            ContextSource::new("a", vec![item(&huge), item("tiny")]),
            ContextSource::new("b", vec![item("small one")]),
        ];
        let merged = merge(&sources, 10, &tokenizer);
        assert_eq!(merged.items_truncated, 1);
        assert!(merged.items.iter().all(|m| m.item.content != huge));
        assert!(merged.items.iter().any(|m| m.item.content == "tiny"));
        assert!(merged.items.iter().any(|m| m.item.content == "small one"));
    }

    #[test]
    fn test_budget_exhaustion_stops_merge() {
        let tokenizer = Tokenizer::default();
        let sources = vec![ContextSource::new(
            "a",
            (0..50).map(|i| item(&format!("entry number {i}"))).collect(),
        )];
        let merged = merge(&sources, 12, &tokenizer);
        assert!(merged.tokens_used <= 12);
        assert!(merged.items.len() < 50);
    }

    #[test]
    fn test_stable_order_within_source() {
        let tokenizer = Tokenizer::default();
        let sources = vec![ContextSource::new(
            "a",
            vec![item("first"), item("second"), item("third")],
        )];
        let merged = merge(&sources, 1000, &tokenizer);
        let contents: Vec<&str> = merged.items.iter().map(|m| m.item.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_assemble_donates_leftover() {
        let tokenizer = Tokenizer::default();
        // First section uses almost nothing; its leftover lets the second
        // section exceed its own 50% share.
        let sections = vec![
            BudgetedSection {
                source: ContextSource::new("a", vec![item("tiny")]),
                ratio: 0.5,
            },
            BudgetedSection {
                source: ContextSource::new(
                    "b",
                    (0..40).map(|i| item(&format!("filler text {i}"))).collect(),
                ),
                ratio: 0.5,
            },
        ];
        let merged = assemble(sections, 100, &tokenizer);
        let b_tokens: usize = merged
            .items
            .iter()
            .filter(|m| m.source_label == "b")
            .map(|m| tokenizer.count_tokens(&m.item.content))
            .sum();
        assert!(b_tokens > 50, "donation not applied: {b_tokens}");
    }

    #[test]
    fn test_render_numbers_items() {
        let tokenizer = Tokenizer::default();
        let sources = vec![ContextSource::new("chunks", vec![item("evidence text")])];
        let merged = merge(&sources, 100, &tokenizer);
        let text = merged.render();
        assert!(text.starts_with("[1] (chunks) evidence text"));
    }
}
