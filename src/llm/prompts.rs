//! Prompt templates for extraction, gleaning, summarization, keyword
//! extraction, and answer synthesis.
//!
//! `PROMPT_VERSION` participates in every extraction-cache hash: bumping
//! it invalidates cached extractions produced by older templates.

/// Version tag mixed into extraction-cache content hashes.
pub const PROMPT_VERSION: &str = "v2";

/// Builds the first-pass entity/relation extraction prompt for a chunk.
#[must_use]
pub fn entity_extraction(chunk: &str) -> String {
    format!(
        r#"You are building a knowledge graph from documents. Extract every entity and every relationship stated in the text below.

Respond with a single JSON object and nothing else:
{{
  "entities": [
    {{"name": "...", "type": "person|organization|location|concept|technology|event|other", "description": "one-sentence description grounded in the text"}}
  ],
  "relations": [
    {{"source": "...", "target": "...", "keywords": "short verb phrase", "description": "what the text says about this relationship", "weight": 1.0}}
  ]
}}

Rules:
- Entity names are verbatim surface forms from the text, trimmed.
- Every relation endpoint must appear in "entities".
- Weight is the strength of the stated relationship from 0.1 to 10.0.
- Return empty arrays when the text contains none.

Text:
{chunk}"#
    )
}

/// Builds the gleaning prompt: a follow-up pass asking only for what the
/// earlier passes missed.
#[must_use]
pub fn gleaning(chunk: &str, found_entities: &[String]) -> String {
    let found = if found_entities.is_empty() {
        "(none)".to_string()
    } else {
        found_entities.join(", ")
    };
    format!(
        r#"An earlier extraction pass over the text below found these entities: {found}

Identify ONLY entities and relationships that were MISSED — implicit actors, funders, locations, or instruments the earlier pass overlooked. Do not repeat anything already found.

Respond with the same JSON shape as before ("entities" and "relations" arrays). Return empty arrays if nothing was missed.

Text:
{chunk}"#
    )
}

/// Builds the description-summarization prompt for an entity or relation.
#[must_use]
pub fn summarize_descriptions(subject: &str, descriptions: &str) -> String {
    format!(
        r#"The following are descriptions of "{subject}" accumulated from several documents. Write a single comprehensive summary that resolves duplicates and contradictions, in third person, mentioning "{subject}" by name.

Descriptions:
{descriptions}

Respond with the summary text only."#
    )
}

/// Builds the query keyword-extraction prompt.
#[must_use]
pub fn keyword_extraction(query: &str) -> String {
    format!(
        r#"Extract search keywords from the user query below.

Respond with exactly two lines:
HIGH_LEVEL: comma-separated abstract concepts, themes, and relationship words
LOW_LEVEL: comma-separated concrete named entities and specific terms

Query: {query}"#
    )
}

/// Builds the final synthesis prompt from the assembled context.
#[must_use]
pub fn synthesize(query: &str, context: &str) -> String {
    format!(
        r#"Answer the question using ONLY the numbered context below. Cite supporting items with bracketed numbers like [1] or [2][3] immediately after the claims they support. If the context does not contain the answer, say so.

Context:
{context}

Question: {query}

Answer:"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompts_embed_inputs() {
        assert!(entity_extraction("Alpha funds Beta.").contains("Alpha funds Beta."));
        assert!(keyword_extraction("who funds Beta?").contains("who funds Beta?"));
        assert!(synthesize("q", "ctx").contains("ctx"));
    }

    #[test]
    fn test_gleaning_lists_found_entities() {
        let prompt = gleaning("text", &["Alpha".to_string(), "Beta".to_string()]);
        assert!(prompt.contains("Alpha, Beta"));
        let prompt = gleaning("text", &[]);
        assert!(prompt.contains("(none)"));
    }
}
