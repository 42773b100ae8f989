//! Scope-aware chunking of source code.
//!
//! The chunker is language-agnostic: boundaries are recognized by regex
//! families covering class-like declarations, function-like declarations,
//! import blocks, and decorators/annotations. Emitted chunks carry line
//! ranges and the containing scope so extraction and citations can point
//! back into the file.

use crate::models::{ChunkKind, ScopeType};
use once_cell::sync::Lazy;
use regex::Regex;

/// A chunk of source code with scope metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeChunk {
    /// Chunk text, newline-joined lines.
    pub content: String,
    /// 1-based first line covered.
    pub start_line: usize,
    /// 1-based last line covered.
    pub end_line: usize,
    /// Name of the containing scope, when one was crossed.
    pub scope_name: Option<String>,
    /// Kind of the containing scope.
    pub scope_type: ScopeType,
    /// What the chunk contains.
    pub chunk_type: ChunkKind,
}

/// Kind of a detected boundary line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoundaryKind {
    Class,
    Function,
    Import,
    Decorator,
}

/// A detected boundary with its captured name; positioned by line index
/// in the per-line boundary table.
#[derive(Debug, Clone)]
struct Boundary {
    kind: BoundaryKind,
    name: Option<String>,
}

#[allow(clippy::unwrap_used)] // patterns are compile-time constants exercised by tests
static CLASS_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(
            r"^\s*(?:(?:pub(?:\([^)]*\))?|public|private|protected|abstract|final|export|default|sealed|internal|static|data|open)\s+)*(?:class|struct|interface|enum|trait|object)\s+([A-Za-z_]\w*)",
        )
        .unwrap(),
    ]
});

#[allow(clippy::unwrap_used)]
static FUNCTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // Rust
        Regex::new(
            r"^\s*(?:(?:pub(?:\([^)]*\))?|const|async|unsafe|extern(?:\s+\x22[^\x22]*\x22)?)\s+)*fn\s+([A-Za-z_]\w*)",
        )
        .unwrap(),
        // Python
        Regex::new(r"^\s*(?:async\s+)?def\s+([A-Za-z_]\w*)").unwrap(),
        // Go
        Regex::new(r"^\s*func\s+(?:\([^)]*\)\s+)?([A-Za-z_]\w*)").unwrap(),
        // JavaScript/TypeScript
        Regex::new(
            r"^\s*(?:(?:export|default|async|static|public|private|protected)\s+)*function\s*\*?\s*([A-Za-z_]\w*)",
        )
        .unwrap(),
        // Kotlin
        Regex::new(
            r"^\s*(?:(?:public|private|protected|internal|suspend|override|open|inline)\s+)*fun\s+([A-Za-z_]\w*)",
        )
        .unwrap(),
        // Java / C# / C++-style methods with a return type
        Regex::new(
            r"^\s*(?:(?:public|private|protected|static|final|abstract|synchronized|virtual|override|async)\s+)+[\w$<>\[\],\s]+?\s+([A-Za-z_]\w*)\s*\(",
        )
        .unwrap(),
    ]
});

#[allow(clippy::unwrap_used)]
static IMPORT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^\s*(?:import\s|use\s|from\s+\S+\s+import\s|#include\s*[<"]|require\s*\(|extern\s+crate\s|package\s)"#,
    )
    .unwrap()
});

#[allow(clippy::unwrap_used)]
static DECORATOR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:@[\w.(]|#\[)").unwrap());

/// Whether a line plausibly ends a statement, making it a safe cut point.
fn ends_statement(line: &str) -> bool {
    let trimmed = line.trim_end();
    trimmed.is_empty()
        || trimmed.ends_with(';')
        || trimmed.ends_with('}')
        || trimmed.ends_with('{')
        || trimmed.ends_with(':')
        || trimmed.ends_with(')')
}

fn classify_line(line: &str) -> Option<(BoundaryKind, Option<String>)> {
    if DECORATOR_PATTERN.is_match(line) {
        return Some((BoundaryKind::Decorator, None));
    }
    if IMPORT_PATTERN.is_match(line) {
        return Some((BoundaryKind::Import, None));
    }
    for pattern in CLASS_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(line) {
            let name = caps.get(1).map(|m| m.as_str().to_string());
            return Some((BoundaryKind::Class, name));
        }
    }
    for pattern in FUNCTION_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(line) {
            let name = caps.get(1).map(|m| m.as_str().to_string());
            return Some((BoundaryKind::Function, name));
        }
    }
    None
}

/// Regex-boundary-aware code chunker.
#[derive(Debug, Clone, Copy)]
pub struct CodeChunker {
    max_chars: usize,
    overlap_chars: usize,
}

impl CodeChunker {
    /// Creates a chunker sized in tokens; internally sizes are estimated
    /// as `tokens * chars_per_token`.
    #[must_use]
    pub const fn new(max_tokens: usize, overlap_tokens: usize, chars_per_token: usize) -> Self {
        let cpt = if chars_per_token == 0 { 4 } else { chars_per_token };
        Self {
            max_chars: max_tokens * cpt,
            overlap_chars: overlap_tokens * cpt,
        }
    }

    /// Splits `source` into scope-aware chunks.
    ///
    /// Imports stay contiguous at the file head; decorators stay glued to
    /// the declaration that follows; cuts land on statement terminators
    /// when one can be detected near the overflow point.
    #[must_use]
    #[allow(clippy::too_many_lines)]
    pub fn chunk(&self, source: &str) -> Vec<CodeChunk> {
        if source.trim().is_empty() {
            return Vec::new();
        }

        let lines: Vec<&str> = source.lines().collect();
        let boundaries: Vec<Option<Boundary>> = lines
            .iter()
            .map(|line| classify_line(line).map(|(kind, name)| Boundary { kind, name }))
            .collect();

        let mut chunks = Vec::new();
        let mut scope: Option<(String, ScopeType)> = None;

        // Leading import block stays contiguous.
        let import_end = leading_import_block(&lines, &boundaries);
        let mut cursor = 0usize;
        if import_end > 0 {
            let content = lines[..import_end].join("\n");
            chunks.push(CodeChunk {
                content,
                start_line: 1,
                end_line: import_end,
                scope_name: None,
                scope_type: ScopeType::File,
                chunk_type: ChunkKind::ImportBlock,
            });
            cursor = import_end;
        }

        while cursor < lines.len() {
            let start = cursor;
            let mut end = cursor;
            let mut size = 0usize;

            while end < lines.len() {
                let line_size = lines[end].len() + 1;
                if size + line_size > self.max_chars && end > start {
                    break;
                }
                size += line_size;
                end += 1;
            }

            // Back off to a statement terminator, and never strand
            // decorators from the declaration that follows them.
            if end < lines.len() {
                end = self.adjust_cut(&lines, &boundaries, start, end);
            }

            // Track the containing scope crossed inside this chunk.
            for boundary in boundaries[start..end].iter().flatten() {
                match boundary.kind {
                    BoundaryKind::Class => {
                        scope = boundary.name.clone().map(|n| (n, ScopeType::Class));
                    }
                    BoundaryKind::Function => {
                        scope = boundary.name.clone().map(|n| (n, ScopeType::Function));
                    }
                    BoundaryKind::Import | BoundaryKind::Decorator => {}
                }
            }

            let content = lines[start..end].join("\n");
            if !content.trim().is_empty() {
                let (scope_name, scope_type) = match &scope {
                    Some((name, kind)) => (Some(name.clone()), *kind),
                    None => (None, ScopeType::Module),
                };
                chunks.push(CodeChunk {
                    content,
                    start_line: start + 1,
                    end_line: end,
                    scope_name,
                    scope_type,
                    chunk_type: ChunkKind::Code,
                });
            }

            if end >= lines.len() {
                break;
            }

            // Back-overlap: the next chunk re-reads the tail of this one.
            // Clamped so every iteration makes forward progress.
            cursor = self.overlap_start(&lines, end).max(start + 1);
        }

        chunks
    }

    /// Moves a cut point back to the nearest safe line: a statement
    /// terminator, never splitting a decorator run from its declaration.
    fn adjust_cut(
        &self,
        lines: &[&str],
        boundaries: &[Option<Boundary>],
        start: usize,
        proposed: usize,
    ) -> usize {
        let mut cut = proposed;

        // Walk back past trailing decorator lines so they stay glued to
        // the declaration after the cut.
        while cut > start + 1 {
            let above = cut - 1;
            let is_decorator = matches!(
                boundaries[above],
                Some(Boundary {
                    kind: BoundaryKind::Decorator,
                    ..
                })
            );
            if is_decorator {
                cut = above;
            } else {
                break;
            }
        }

        // Prefer a statement-terminating line within a short backtrack
        // window; otherwise accept the raw cut.
        let window = cut.saturating_sub(8).max(start + 1);
        let mut best = cut;
        while best > window {
            if ends_statement(lines[best - 1]) {
                return best;
            }
            best -= 1;
        }
        cut
    }

    /// Computes where the next chunk starts so that roughly
    /// `overlap_chars` of tail context is repeated.
    fn overlap_start(&self, lines: &[&str], end: usize) -> usize {
        if self.overlap_chars == 0 {
            return end;
        }
        let mut size = 0usize;
        let mut start = end;
        while start > 0 {
            let line_size = lines[start - 1].len() + 1;
            if size + line_size > self.overlap_chars {
                break;
            }
            size += line_size;
            start -= 1;
        }
        start
    }
}

/// Length of the leading run of import/comment/blank lines.
fn leading_import_block(lines: &[&str], boundaries: &[Option<Boundary>]) -> usize {
    let mut end = 0usize;
    let mut saw_import = false;
    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        let is_import = matches!(
            boundaries[i],
            Some(Boundary {
                kind: BoundaryKind::Import,
                ..
            })
        );
        let is_filler = trimmed.is_empty()
            || trimmed.starts_with("//")
            || trimmed.starts_with('#') && !trimmed.starts_with("#[")
            || trimmed.starts_with("/*")
            || trimmed.starts_with('*');
        if is_import {
            saw_import = true;
            end = i + 1;
        } else if is_filler && saw_import {
            // Blank/comment lines inside the block are fine; the block
            // ends at the last import line.
        } else if !is_filler {
            break;
        }
    }
    if saw_import { end } else { 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PYTHON_SOURCE: &str = r#"import os
import sys
from typing import Optional

@dataclass
class Config:
    name: str

    def validate(self):
        return bool(self.name)

def load(path):
    with open(path) as f:
        return f.read()
"#;

    #[test]
    fn test_import_block_is_first_chunk() {
        let chunker = CodeChunker::new(200, 10, 4);
        let chunks = chunker.chunk(PYTHON_SOURCE);
        assert_eq!(chunks[0].chunk_type, ChunkKind::ImportBlock);
        assert!(chunks[0].content.contains("import os"));
        assert!(chunks[0].content.contains("from typing import Optional"));
        assert_eq!(chunks[0].start_line, 1);
    }

    #[test]
    fn test_scope_tracking() {
        let chunker = CodeChunker::new(200, 10, 4);
        let chunks = chunker.chunk(PYTHON_SOURCE);
        let last = chunks.last().unwrap();
        // The final boundary crossed is `def load`.
        assert_eq!(last.scope_name.as_deref(), Some("load"));
        assert_eq!(last.scope_type, ScopeType::Function);
    }

    #[test]
    fn test_line_ranges_are_contiguous_and_ordered() {
        let source: String = (0..120)
            .map(|i| format!("let v{i} = {i};\n"))
            .collect();
        let chunker = CodeChunker::new(20, 4, 4);
        let chunks = chunker.chunk(&source);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.start_line <= chunk.end_line);
        }
        for pair in chunks.windows(2) {
            // Overlap means the next chunk may start before the previous
            // end, but never after a gap.
            assert!(pair[1].start_line <= pair[0].end_line + 1);
            assert!(pair[1].end_line > pair[0].end_line);
        }
        // Last chunk reaches the end of the file.
        assert_eq!(chunks.last().unwrap().end_line, 120);
    }

    #[test]
    fn test_cut_lands_on_statement_terminator() {
        let source: String = (0..60).map(|i| format!("call_{i}(arg);\n")).collect();
        let chunker = CodeChunker::new(15, 0, 4);
        let chunks = chunker.chunk(&source);
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(
                ends_statement(chunk.content.lines().last().unwrap()),
                "chunk cut mid-statement: {:?}",
                chunk.content.lines().last()
            );
        }
    }

    #[test]
    fn test_decorator_glued_to_declaration() {
        let mut source = String::new();
        for i in 0..12 {
            source.push_str(&format!("fill_{i}();\n"));
        }
        source.push_str("@decorator\ndef handler():\n    pass\n");
        // Budget forces the cut near the decorator.
        let chunker = CodeChunker::new(30, 0, 4);
        let chunks = chunker.chunk(&source);
        for chunk in &chunks {
            if chunk.content.contains("@decorator") {
                assert!(
                    chunk.content.contains("def handler"),
                    "decorator stranded from its declaration: {:?}",
                    chunk.content
                );
            }
        }
    }

    #[test]
    fn test_rust_class_and_fn_boundaries() {
        let source = r"pub struct Engine {
    field: u32,
}

impl Engine {
    pub fn run(&self) -> u32 {
        self.field
    }
}
";
        let chunker = CodeChunker::new(200, 0, 4);
        let chunks = chunker.chunk(source);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].scope_name.as_deref(), Some("run"));
        assert_eq!(chunks[0].scope_type, ScopeType::Function);
    }

    #[test]
    fn test_empty_source() {
        let chunker = CodeChunker::new(100, 10, 4);
        assert!(chunker.chunk("").is_empty());
        assert!(chunker.chunk("\n\n  \n").is_empty());
    }
}
