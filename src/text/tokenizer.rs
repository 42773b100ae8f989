//! Token counting and sliding-window prose chunking.
//!
//! Token counts are an estimate (roughly four characters per token, never
//! less than one per word) but they are deterministic for a fixed input,
//! which is what the budget arithmetic in the query path relies on.

/// A chunk of prose produced by [`Tokenizer::chunk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Chunk text.
    pub content: String,
    /// Estimated token count of `content`.
    pub tokens: usize,
}

/// Deterministic token estimator and prose chunker.
#[derive(Debug, Clone, Copy)]
pub struct Tokenizer {
    chars_per_token: usize,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self { chars_per_token: 4 }
    }
}

impl Tokenizer {
    /// Creates a tokenizer with the given character-per-token estimate.
    #[must_use]
    pub const fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: if chars_per_token == 0 {
                4
            } else {
                chars_per_token
            },
        }
    }

    /// Estimated token count of a single word.
    fn word_cost(&self, word: &str) -> usize {
        word.chars().count().div_ceil(self.chars_per_token).max(1)
    }

    /// Estimates the token count of `text`.
    #[must_use]
    pub fn count_tokens(&self, text: &str) -> usize {
        text.split_whitespace().map(|w| self.word_cost(w)).sum()
    }

    /// Splits `text` into chunks of at most `max_tokens` tokens with
    /// `overlap_tokens` shared between consecutive chunks.
    ///
    /// Splits prefer sentence boundaries; a sentence larger than the
    /// budget is split at whitespace. The result is deterministic for a
    /// fixed input, and every chunk except possibly the last carries the
    /// configured overlap into its successor.
    #[must_use]
    pub fn chunk(&self, text: &str, max_tokens: usize, overlap_tokens: usize) -> Vec<TextChunk> {
        if text.trim().is_empty() || max_tokens == 0 {
            return Vec::new();
        }
        let overlap_tokens = overlap_tokens.min(max_tokens.saturating_sub(1));

        // Work over words grouped into sentences so cuts land on sentence
        // boundaries when the budget allows it.
        let mut chunks = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_tokens = 0usize;

        for sentence in split_sentences(text) {
            let words: Vec<&str> = sentence.split_whitespace().collect();
            let sentence_tokens: usize = words.iter().map(|w| self.word_cost(w)).sum();

            if sentence_tokens <= max_tokens {
                if current_tokens + sentence_tokens > max_tokens && !current.is_empty() {
                    self.emit(&mut chunks, &mut current, &mut current_tokens, overlap_tokens);
                }
                // The overlap tail may leave no room; drop it rather than
                // overflow the budget.
                if current_tokens + sentence_tokens > max_tokens {
                    current.clear();
                    current_tokens = 0;
                }
                current_tokens += sentence_tokens;
                current.extend(words);
                continue;
            }

            // Oversized sentence: fall back to word-level accumulation.
            for word in words {
                let cost = self.word_cost(word);
                if current_tokens + cost > max_tokens && !current.is_empty() {
                    self.emit(&mut chunks, &mut current, &mut current_tokens, overlap_tokens);
                }
                if current_tokens + cost > max_tokens {
                    current.clear();
                    current_tokens = 0;
                }
                current_tokens += cost;
                current.push(word);
            }
        }

        if !current.is_empty() {
            let content = current.join(" ");
            let tokens = self.count_tokens(&content);
            chunks.push(TextChunk { content, tokens });
        }
        chunks
    }

    /// Emits the accumulated words as a chunk and seeds the next chunk
    /// with the overlap tail.
    fn emit(
        &self,
        chunks: &mut Vec<TextChunk>,
        current: &mut Vec<&str>,
        current_tokens: &mut usize,
        overlap_tokens: usize,
    ) {
        let content = current.join(" ");
        let tokens = self.count_tokens(&content);
        chunks.push(TextChunk { content, tokens });

        // Seed the next chunk with the trailing overlap.
        let mut tail: Vec<&str> = Vec::new();
        let mut tail_tokens = 0usize;
        for word in current.iter().rev() {
            let cost = self.word_cost(word);
            if tail_tokens + cost > overlap_tokens {
                break;
            }
            tail_tokens += cost;
            tail.push(word);
        }
        tail.reverse();
        *current = tail;
        *current_tokens = tail_tokens;
    }
}

/// Splits text into sentences at `.`, `!`, `?`, or newline boundaries.
/// The terminator stays with its sentence.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let is_terminator = matches!(b, b'.' | b'!' | b'?');
        let is_newline = b == b'\n';
        if is_terminator || is_newline {
            // Sentence ends after the terminator; for terminators require
            // following whitespace or end-of-text so "3.14" stays intact.
            let end = i + 1;
            let followed_by_space = end >= bytes.len() || bytes[end].is_ascii_whitespace();
            if is_newline || followed_by_space {
                let candidate = text[start..end].trim();
                if !candidate.is_empty() {
                    sentences.push(candidate);
                }
                start = end;
            }
        }
        i += 1;
    }
    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_count_tokens_empty() {
        let tokenizer = Tokenizer::default();
        assert_eq!(tokenizer.count_tokens(""), 0);
        assert_eq!(tokenizer.count_tokens("   \n\t "), 0);
    }

    #[test]
    fn test_count_tokens_is_deterministic() {
        let tokenizer = Tokenizer::default();
        let text = "The quick brown fox jumps over the lazy dog.";
        assert_eq!(tokenizer.count_tokens(text), tokenizer.count_tokens(text));
        assert!(tokenizer.count_tokens(text) >= 9);
    }

    #[test]
    fn test_chunk_respects_max_tokens() {
        let tokenizer = Tokenizer::default();
        let text = "one two three four five. six seven eight nine ten. eleven twelve.";
        let chunks = tokenizer.chunk(text, 5, 1);
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(chunk.tokens <= 5, "chunk over budget: {chunk:?}");
        }
    }

    #[test]
    fn test_chunk_overlap_shared() {
        let tokenizer = Tokenizer::default();
        let words: Vec<String> = (0..40).map(|i| format!("word{i}")).collect();
        let text = words.join(" ");
        let chunks = tokenizer.chunk(&text, 10, 3);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let prev_tail: Vec<&str> = pair[0].content.split_whitespace().rev().take(1).collect();
            // The first word of the next chunk appears in the previous one.
            let next_head = pair[1].content.split_whitespace().next().unwrap();
            assert!(
                pair[0].content.split_whitespace().any(|w| w == next_head),
                "no overlap between {:?} and {:?} (tail {prev_tail:?})",
                pair[0].content,
                pair[1].content
            );
        }
    }

    #[test]
    fn test_chunk_prefers_sentence_boundaries() {
        let tokenizer = Tokenizer::default();
        let text = "Short first sentence. Another short sentence here. Final one.";
        let chunks = tokenizer.chunk(text, 8, 0);
        // No chunk starts mid-sentence when sentences fit the budget.
        for chunk in &chunks {
            assert!(
                chunk.content.ends_with('.') || chunk.content.ends_with("one."),
                "chunk cut mid-sentence: {:?}",
                chunk.content
            );
        }
    }

    #[test]
    fn test_oversized_sentence_split_at_whitespace() {
        let tokenizer = Tokenizer::default();
        let text = "a b c d e f g h i j k l m n o p q r s t u v w x y z";
        let chunks = tokenizer.chunk(text, 4, 0);
        assert!(chunks.len() > 3);
        for chunk in &chunks {
            assert!(chunk.tokens <= 4);
        }
    }

    #[test]
    fn test_split_sentences_keeps_decimals() {
        let sentences = split_sentences("Pi is 3.14 exactly. Next sentence.");
        assert_eq!(sentences.len(), 2);
        assert!(sentences[0].contains("3.14"));
    }

    proptest! {
        #[test]
        fn prop_chunks_never_exceed_budget(
            words in proptest::collection::vec("[a-z]{1,12}", 0..200),
            // Every generated word costs at most 3 tokens, so any budget
            // of at least 4 must be respected exactly.
            max_tokens in 4usize..40,
        ) {
            let tokenizer = Tokenizer::default();
            let text = words.join(" ");
            let overlap = max_tokens / 4;
            for chunk in tokenizer.chunk(&text, max_tokens, overlap) {
                prop_assert!(chunk.tokens <= max_tokens);
                prop_assert!(!chunk.content.trim().is_empty());
            }
        }

        #[test]
        fn prop_chunking_is_deterministic(
            words in proptest::collection::vec("[a-z]{1,10}", 0..100),
        ) {
            let tokenizer = Tokenizer::default();
            let text = words.join(" ");
            prop_assert_eq!(
                tokenizer.chunk(&text, 16, 4),
                tokenizer.chunk(&text, 16, 4)
            );
        }
    }
}
