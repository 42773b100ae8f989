//! Text processing: token counting, chunking, and content detection.
//!
//! Three concerns live here:
//! - [`tokenizer`]: deterministic token estimation and sliding-window
//!   prose chunking with fixed overlap.
//! - [`detect`]: binary-payload rejection and language detection by
//!   extension plus content regex.
//! - [`code`]: regex-boundary-aware chunking of source code that
//!   preserves function/class scopes and carries line-range metadata.

pub mod code;
pub mod detect;
pub mod tokenizer;

pub use code::{CodeChunk, CodeChunker};
pub use detect::{DetectionMethod, LanguageDetection, binary_reason, detect_language, is_binary};
pub use tokenizer::{TextChunk, Tokenizer};
