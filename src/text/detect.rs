//! Binary-payload rejection and language detection.
//!
//! Detection is three-tiered: extension blacklist, magic-byte signatures
//! in the first 16 bytes, and NUL density over the first 8 KiB. Language
//! detection combines extension mapping with a per-language validation
//! regex over the content.

use once_cell::sync::Lazy;
use regex::Regex;

/// Extensions that are always binary, regardless of content.
const BINARY_EXTENSIONS: &[&str] = &[
    "exe", "dll", "so", "dylib", "bin", "o", "obj", "a", "lib", "class", "jar", "war", "pyc",
    "pyo", "wasm", "zip", "tar", "gz", "tgz", "bz2", "xz", "7z", "rar", "png", "jpg", "jpeg",
    "gif", "bmp", "ico", "webp", "mp3", "mp4", "avi", "mov", "ogg", "wav", "flac", "pdf", "doc",
    "docx", "xls", "xlsx", "ppt", "pptx", "sqlite", "db", "ttf", "otf", "woff", "woff2", "eot",
];

/// Known magic signatures checked against the first 16 bytes.
const MAGIC_SIGNATURES: &[(&[u8], &str)] = &[
    (&[0x7f, b'E', b'L', b'F'], "ELF"),
    (&[b'M', b'Z'], "PE"),
    (&[0xca, 0xfe, 0xba, 0xbe], "Java class"),
    (&[b'P', b'K', 0x03, 0x04], "ZIP"),
    (&[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a], "PNG"),
    (&[0xff, 0xd8, 0xff], "JPEG"),
    (&[b'G', b'I', b'F', b'8'], "GIF"),
    (&[0x1f, 0x8b], "gzip"),
    (&[b'B', b'Z', b'h'], "bzip2"),
    (&[b'7', b'z', 0xbc, 0xaf, 0x27, 0x1c], "7z"),
    (&[b'%', b'P', b'D', b'F'], "PDF"),
    (&[0x00, b'a', b's', b'm'], "WASM"),
    (&[b'S', b'Q', b'L', b'i', b't', b'e', b' ', b'f'], "SQLite"),
];

/// Maximum NUL bytes tolerated in the first 8 KiB of a text file.
const MAX_NUL_BYTES: usize = 10;

/// Window inspected for NUL density.
const NUL_SCAN_WINDOW: usize = 8 * 1024;

/// Returns the reason a payload is considered binary, or `None` for text.
#[must_use]
pub fn binary_reason(name: &str, header: &[u8]) -> Option<String> {
    if let Some(ext) = extension_of(name)
        && BINARY_EXTENSIONS.contains(&ext.as_str())
    {
        return Some(format!("extension .{ext} is blacklisted"));
    }

    for (magic, label) in MAGIC_SIGNATURES {
        if header.len() >= magic.len() && &header[..magic.len()] == *magic {
            return Some(format!("{label} magic bytes"));
        }
    }

    let window = &header[..header.len().min(NUL_SCAN_WINDOW)];
    let nul_count = window.iter().filter(|&&b| b == 0).count();
    if nul_count > MAX_NUL_BYTES {
        return Some(format!("{nul_count} NUL bytes in the first 8 KiB"));
    }

    None
}

/// Whether a payload should be rejected as binary.
///
/// True iff the extension is blacklisted, the first bytes match a known
/// magic signature, or the NUL count in the first 8 KiB exceeds the
/// threshold.
#[must_use]
pub fn is_binary(name: &str, header: &[u8]) -> bool {
    binary_reason(name, header).is_some()
}

fn extension_of(name: &str) -> Option<String> {
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && !ext.contains('/'))
}

/// How a language was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMethod {
    /// Extension mapping, optionally validated by a content regex.
    Extension,
    /// Content regex alone.
    Content,
    /// No signal; result is `unknown`.
    Heuristic,
}

impl DetectionMethod {
    /// Returns the method as its wire string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Extension => "extension",
            Self::Content => "content",
            Self::Heuristic => "heuristic",
        }
    }
}

/// Result of language detection.
#[derive(Debug, Clone, PartialEq)]
pub struct LanguageDetection {
    /// Detected language identifier, or `unknown`.
    pub language: String,
    /// How the language was determined.
    pub method: DetectionMethod,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
}

impl LanguageDetection {
    fn unknown() -> Self {
        Self {
            language: "unknown".to_string(),
            method: DetectionMethod::Heuristic,
            confidence: 0.0,
        }
    }
}

struct LanguageSpec {
    name: &'static str,
    extensions: &'static [&'static str],
    validator: Regex,
}

#[allow(clippy::unwrap_used)] // patterns are compile-time constants exercised by tests
static LANGUAGES: Lazy<Vec<LanguageSpec>> = Lazy::new(|| {
    let spec = |name, extensions, pattern: &str| LanguageSpec {
        name,
        extensions,
        validator: Regex::new(pattern).unwrap(),
    };
    vec![
        spec(
            "rust",
            &["rs"],
            r"(?m)^\s*(?:pub\s+)?(?:fn|struct|enum|trait|impl|mod|use)\s",
        ),
        spec(
            "python",
            &["py", "pyi"],
            r"(?m)^\s*(?:def\s+\w+\s*\(|class\s+\w+|import\s+\w|from\s+\w+\s+import)",
        ),
        spec(
            "javascript",
            &["js", "mjs", "cjs", "jsx"],
            r"(?m)(?:\bfunction\s+\w+|\bconst\s+\w+\s*=|\blet\s+\w+|=>|\brequire\s*\()",
        ),
        spec(
            "typescript",
            &["ts", "tsx"],
            r"(?m)(?:\binterface\s+\w+|:\s*(?:string|number|boolean)\b|\bexport\s+(?:type|interface|const)\b)",
        ),
        spec(
            "java",
            &["java"],
            r"(?m)(?:\bpublic\s+(?:class|interface|enum)\b|\bpackage\s+[\w.]+;|\bimport\s+java)",
        ),
        spec(
            "go",
            &["go"],
            r"(?m)^\s*(?:package\s+\w+|func\s+(?:\(\w+\s+\*?\w+\)\s+)?\w+\s*\(|import\s+\()",
        ),
        spec(
            "c",
            &["c", "h"],
            r#"(?m)(?:#include\s*[<"]|\bint\s+main\s*\()"#,
        ),
        spec(
            "cpp",
            &["cpp", "cc", "cxx", "hpp", "hh"],
            r"(?m)(?:#include\s*<|\bnamespace\s+\w+|\btemplate\s*<|std::)",
        ),
        spec(
            "csharp",
            &["cs"],
            r"(?m)(?:\bnamespace\s+[\w.]+|\busing\s+System|\bpublic\s+(?:class|interface)\b)",
        ),
        spec(
            "ruby",
            &["rb", "rake"],
            r"(?m)^\s*(?:def\s+\w+|class\s+[A-Z]\w*|module\s+[A-Z]\w*|require\s+)",
        ),
        spec("php", &["php"], r"(?m)(?:<\?php|\$\w+\s*=|->\w+\()"),
        spec(
            "kotlin",
            &["kt", "kts"],
            r"(?m)^\s*(?:fun\s+\w+|val\s+\w+|var\s+\w+|class\s+\w+|package\s+[\w.]+)",
        ),
        spec(
            "swift",
            &["swift"],
            r"(?m)^\s*(?:func\s+\w+|var\s+\w+:|let\s+\w+|import\s+(?:Foundation|UIKit|SwiftUI))",
        ),
        spec(
            "shell",
            &["sh", "bash", "zsh"],
            r"(?m)(?:^#!/bin/(?:ba|z)?sh|\becho\s+|\bfi\b|\bdone\b)",
        ),
        spec(
            "sql",
            &["sql"],
            r"(?im)\b(?:select\s+.+\s+from|create\s+table|insert\s+into)\b",
        ),
    ]
});

/// Confidence for an extension match validated by content.
const CONF_EXT_VALIDATED: f32 = 0.95;
/// Confidence for a bare extension match.
const CONF_EXT_ONLY: f32 = 0.85;
/// Confidence for an extension match whose content validation failed.
const CONF_EXT_UNVALIDATED: f32 = 0.75;
/// Confidence for a content-only match.
const CONF_CONTENT_ONLY: f32 = 0.65;

/// Detects the language of `content` named `name`.
///
/// Extension match yields confidence 0.85; content-regex validation lifts
/// that to 0.95 or drops it to 0.75 on failure. Without an extension
/// match, a content-regex hit yields 0.65. Otherwise `unknown/0.0`.
#[must_use]
pub fn detect_language(name: &str, content: &str) -> LanguageDetection {
    let ext = extension_of(name);

    if let Some(ext) = &ext
        && let Some(spec) = LANGUAGES
            .iter()
            .find(|spec| spec.extensions.contains(&ext.as_str()))
    {
        let confidence = if content.trim().is_empty() {
            CONF_EXT_ONLY
        } else if spec.validator.is_match(content) {
            CONF_EXT_VALIDATED
        } else {
            CONF_EXT_UNVALIDATED
        };
        return LanguageDetection {
            language: spec.name.to_string(),
            method: DetectionMethod::Extension,
            confidence,
        };
    }

    if !content.trim().is_empty() {
        for spec in LANGUAGES.iter() {
            if spec.validator.is_match(content) {
                return LanguageDetection {
                    language: spec.name.to_string(),
                    method: DetectionMethod::Content,
                    confidence: CONF_CONTENT_ONLY,
                };
            }
        }
    }

    LanguageDetection::unknown()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_elf_magic_rejected() {
        let header = [0x7f, b'E', b'L', b'F', 2, 1, 1, 0];
        assert!(is_binary("a.out", &header));
    }

    #[test]
    fn test_java_class_magic_beats_source_extension() {
        // CA FE BA BE named like a source file is still binary.
        let header = [0xca, 0xfe, 0xba, 0xbe, 0x00, 0x00, 0x00, 0x34];
        let reason = binary_reason("payload.java", &header);
        assert!(reason.is_some_and(|r| r.contains("Java class")));
    }

    #[test]
    fn test_nul_density() {
        let mut payload = vec![b'a'; 100];
        payload.extend(std::iter::repeat_n(0u8, 11));
        assert!(is_binary("data.txt", &payload));

        let mostly_text = [b"hello world".as_slice(), &[0u8; 10]].concat();
        assert!(!is_binary("data.txt", &mostly_text));
    }

    #[test]
    fn test_blacklisted_extension() {
        assert!(is_binary("photo.PNG", b"not actually a png"));
        assert!(!is_binary("notes.txt", b"plain text"));
    }

    #[test_case("main.rs", "pub fn main() {}", "rust", 0.95; "rust validated")]
    #[test_case("script.py", "def handler(event):\n    pass", "python", 0.95; "python validated")]
    #[test_case("app.js", "const x = () => 42;", "javascript", 0.95; "javascript validated")]
    #[test_case("main.go", "package main\nfunc main() {}", "go", 0.95; "go validated")]
    #[test_case("query.sql", "SELECT id FROM users", "sql", 0.95; "sql validated")]
    fn test_extension_validated(name: &str, content: &str, language: &str, confidence: f32) {
        let detection = detect_language(name, content);
        assert_eq!(detection.language, language);
        assert_eq!(detection.method, DetectionMethod::Extension);
        assert!((detection.confidence - confidence).abs() < f32::EPSILON);
    }

    #[test]
    fn test_extension_unvalidated() {
        let detection = detect_language("weird.rs", "just some prose, nothing rusty");
        assert_eq!(detection.language, "rust");
        assert!((detection.confidence - 0.75).abs() < f32::EPSILON);
    }

    #[test]
    fn test_content_only_match() {
        let detection = detect_language("noext", "def compute(x):\n    return x * 2\n");
        assert_eq!(detection.language, "python");
        assert_eq!(detection.method, DetectionMethod::Content);
        assert!((detection.confidence - 0.65).abs() < f32::EPSILON);
    }

    #[test]
    fn test_unknown() {
        let detection = detect_language("mystery", "completely ordinary prose text");
        assert_eq!(detection.language, "unknown");
        assert_eq!(detection.method, DetectionMethod::Heuristic);
        assert!(detection.confidence.abs() < f32::EPSILON);
    }
}
