//! Document admission and chunking.
//!
//! Admission rejects binary payloads before anything is persisted,
//! decodes text with a bounded lossy fallback, and classifies the
//! document. Chunking dispatches on document type: prose goes through the
//! sliding-window chunker, code through the scope-aware chunker, and every
//! produced chunk gets a consecutive `order_index`.

use crate::config::ChunkingConfig;
use crate::models::{
    Chunk, CodeChunkMeta, Document, DocumentStatus, DocumentType, ProjectId,
};
use crate::text::{CodeChunker, Tokenizer, binary_reason, detect_language};
use crate::{Error, Result};
use uuid::Uuid;

/// Replacement-character ratio above which lossy decoding is rejected.
const MAX_REPLACEMENT_RATIO: f64 = 0.10;

/// Decodes bytes to text: strict UTF-8 first, then a lossy fallback
/// gated on the replacement-character ratio.
fn decode_text(file_name: &str, bytes: &[u8]) -> Result<String> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Ok(text.to_string()),
        Err(_) => {
            let lossy = String::from_utf8_lossy(bytes);
            let replacements = lossy.chars().filter(|&c| c == '\u{FFFD}').count();
            let total = lossy.chars().count().max(1);
            #[allow(clippy::cast_precision_loss)]
            let ratio = replacements as f64 / total as f64;
            if ratio > MAX_REPLACEMENT_RATIO {
                return Err(Error::EncodingError {
                    file_name: file_name.to_string(),
                    cause: format!(
                        "{replacements} undecodable sequences in {total} chars after fallback"
                    ),
                });
            }
            Ok(lossy.into_owned())
        }
    }
}

/// Validates and decodes a submission into a `NOT_PROCESSED` document.
///
/// Binary payloads are rejected before any row is persisted. When no
/// document type is declared, source files with a confidently detected
/// language are classified `CODE`, everything else `FILE`.
///
/// # Errors
///
/// Returns `BINARY_FILE_REJECTED` or `ENCODING_ERROR` at admission;
/// `INVALID_INPUT` for an empty payload.
pub fn admit_document(
    project: ProjectId,
    file_name: &str,
    bytes: &[u8],
    declared: Option<DocumentType>,
    metadata: serde_json::Value,
) -> Result<Document> {
    if let Some(reason) = binary_reason(file_name, bytes) {
        return Err(Error::BinaryFileRejected {
            file_name: file_name.to_string(),
            reason,
        });
    }
    let content = decode_text(file_name, bytes)?;
    if content.trim().is_empty() {
        return Err(Error::InvalidInput(format!(
            "document '{file_name}' is empty"
        )));
    }

    let doc_type = declared.unwrap_or_else(|| {
        let detection = detect_language(file_name, &content);
        if detection.language != "unknown" && detection.confidence >= 0.75 {
            DocumentType::Code
        } else {
            DocumentType::File
        }
    });

    let now = crate::current_timestamp();
    Ok(Document {
        id: Uuid::now_v7(),
        project_id: project,
        doc_type,
        status: DocumentStatus::NotProcessed,
        file_name: file_name.to_string(),
        content,
        metadata,
        created_at: now,
        updated_at: now,
        attempts: 0,
    })
}

/// Splits a document into persisted-shape chunks with consecutive
/// `order_index` values.
#[must_use]
pub fn chunk_document(document: &Document, config: &ChunkingConfig) -> Vec<Chunk> {
    let tokenizer = Tokenizer::new(config.chars_per_token);
    let mut chunks = Vec::new();

    match document.doc_type {
        DocumentType::Code => {
            let detection = detect_language(&document.file_name, &document.content);
            let chunker = CodeChunker::new(
                config.max_tokens,
                config.overlap_tokens,
                config.chars_per_token,
            );
            for (order_index, piece) in chunker.chunk(&document.content).into_iter().enumerate() {
                let tokens = tokenizer.count_tokens(&piece.content);
                chunks.push(Chunk {
                    id: Uuid::now_v7(),
                    document_id: document.id,
                    project_id: document.project_id,
                    content: piece.content,
                    order_index,
                    tokens,
                    code_meta: Some(CodeChunkMeta {
                        language: detection.language.clone(),
                        start_line: piece.start_line,
                        end_line: piece.end_line,
                        scope_name: piece.scope_name,
                        scope_type: piece.scope_type,
                        chunk_type: piece.chunk_type,
                    }),
                    cache_ids: Vec::new(),
                });
            }
        }
        DocumentType::File | DocumentType::Text | DocumentType::Website => {
            for (order_index, piece) in tokenizer
                .chunk(&document.content, config.max_tokens, config.overlap_tokens)
                .into_iter()
                .enumerate()
            {
                chunks.push(Chunk {
                    id: Uuid::now_v7(),
                    document_id: document.id,
                    project_id: document.project_id,
                    content: piece.content,
                    order_index,
                    tokens: piece.tokens,
                    code_meta: None,
                    cache_ids: Vec::new(),
                });
            }
        }
    }

    chunks
}
