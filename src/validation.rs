//! Checks applied to caller-supplied input before it reaches the pipeline.

use crate::config::Config;
use crate::document::{Metadata, SourceDocument};
use serde_json::Value;
use thiserror::Error;

/// Longest accepted search query, in characters.
pub const MAX_QUERY_LENGTH: usize = 500;
/// Largest accepted search limit.
pub const MAX_SEARCH_LIMIT: usize = 100;

const MAX_METADATA_KEY_LENGTH: usize = 100;
const MAX_METADATA_STRING_LENGTH: usize = 1000;
const MAX_METADATA_LIST_LENGTH: usize = 100;
const HEADER_BYTES: usize = 1024;

const FILENAME_PATTERNS: &[&str] = &[
    "../",
    "..\\",
    "<script",
    "javascript:",
    "data:",
    "vbscript:",
    "onload=",
    "onerror=",
    "<iframe",
];

const QUERY_PATTERNS: &[&str] = &[
    "<script",
    "javascript:",
    "data:",
    "vbscript:",
    "onload=",
    "onerror=",
];

const EXECUTABLE_SIGNATURES: &[&[u8]] = &[
    b"MZ",
    b"\x7fELF",
    b"\xfe\xed\xfa\xce",
    b"\xce\xfa\xed\xfe",
];

/// Malformed caller input. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Source has no file name.
    #[error("filename must not be empty")]
    EmptyFilename,
    /// Source has no bytes.
    #[error("file is empty")]
    EmptyContent,
    /// Source is larger than the configured maximum.
    #[error("file too large: {size} bytes (max: {max})")]
    FileTooLarge {
        /// Declared size.
        size: u64,
        /// Configured maximum.
        max: u64,
    },
    /// Extension is not in the allow-list.
    #[error("unsupported file type: {0}")]
    UnsupportedExtension(String),
    /// File name contains traversal or script-injection patterns.
    #[error("filename contains potentially malicious patterns")]
    MaliciousFilename,
    /// Content starts with an executable signature.
    #[error("file contains executable content")]
    ExecutableContent,
    /// Query is blank after sanitizing.
    #[error("search query cannot be empty")]
    EmptyQuery,
    /// Query is longer than [`MAX_QUERY_LENGTH`].
    #[error("search query too long: {0} characters (max: {MAX_QUERY_LENGTH})")]
    QueryTooLong(usize),
    /// Query contains script-injection patterns.
    #[error("search query contains potentially dangerous content")]
    DangerousQuery,
    /// Limit is outside `1..=MAX_SEARCH_LIMIT`.
    #[error("limit must be between 1 and {MAX_SEARCH_LIMIT}, got {0}")]
    InvalidLimit(usize),
    /// Metadata has an oversized key, string, or list.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),
}

/// Source checks driven by the configured size cap and extension allow-list.
#[derive(Debug, Clone)]
pub struct SourceValidator {
    max_file_size: u64,
    allowed_extensions: Vec<String>,
}

impl SourceValidator {
    /// Validator enforcing `max_file_size` and `allowed_extensions` (lowercase, leading dot).
    pub fn new(max_file_size: u64, allowed_extensions: Vec<String>) -> Self {
        Self {
            max_file_size,
            allowed_extensions,
        }
    }

    /// Validator for the limits in `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.max_file_size, config.allowed_extensions.clone())
    }

    /// Reject sources the pipeline must never see.
    pub fn validate(&self, source: &SourceDocument) -> Result<(), ValidationError> {
        if source.filename.trim().is_empty() {
            return Err(ValidationError::EmptyFilename);
        }
        if contains_any(&source.filename, FILENAME_PATTERNS) {
            return Err(ValidationError::MaliciousFilename);
        }
        if source.content.is_empty() {
            return Err(ValidationError::EmptyContent);
        }
        if source.size() > self.max_file_size {
            return Err(ValidationError::FileTooLarge {
                size: source.size(),
                max: self.max_file_size,
            });
        }
        let extension = source.extension();
        if !self.allowed_extensions.contains(&extension) {
            return Err(ValidationError::UnsupportedExtension(extension));
        }
        let header = &source.content[..source.content.len().min(HEADER_BYTES)];
        if EXECUTABLE_SIGNATURES
            .iter()
            .any(|signature| header.starts_with(signature))
        {
            return Err(ValidationError::ExecutableContent);
        }
        Ok(())
    }
}

/// Strip control characters and surrounding whitespace, then reject blank, long, or
/// script-bearing queries. Returns the sanitized query.
pub fn validate_search_query(query: &str) -> Result<String, ValidationError> {
    let sanitized = sanitize(query);
    if sanitized.is_empty() {
        return Err(ValidationError::EmptyQuery);
    }
    let length = sanitized.chars().count();
    if length > MAX_QUERY_LENGTH {
        return Err(ValidationError::QueryTooLong(length));
    }
    if contains_any(&sanitized, QUERY_PATTERNS) {
        return Err(ValidationError::DangerousQuery);
    }
    Ok(sanitized)
}

/// Accept limits in `1..=MAX_SEARCH_LIMIT`.
pub fn validate_limit(limit: usize) -> Result<usize, ValidationError> {
    if (1..=MAX_SEARCH_LIMIT).contains(&limit) {
        Ok(limit)
    } else {
        Err(ValidationError::InvalidLimit(limit))
    }
}

/// Sanitize string values and bound key, string, and list sizes, recursing into objects.
pub fn validate_metadata(metadata: Metadata) -> Result<Metadata, ValidationError> {
    metadata
        .into_iter()
        .map(|(key, value)| {
            if key.chars().count() > MAX_METADATA_KEY_LENGTH {
                return Err(ValidationError::InvalidMetadata(format!(
                    "key longer than {MAX_METADATA_KEY_LENGTH} characters"
                )));
            }
            Ok((key, validate_metadata_value(value)?))
        })
        .collect()
}

fn validate_metadata_value(value: Value) -> Result<Value, ValidationError> {
    match value {
        Value::String(text) => {
            let sanitized = sanitize(&text);
            if sanitized.chars().count() > MAX_METADATA_STRING_LENGTH {
                return Err(ValidationError::InvalidMetadata(format!(
                    "string longer than {MAX_METADATA_STRING_LENGTH} characters"
                )));
            }
            Ok(Value::String(sanitized))
        }
        Value::Array(items) => {
            if items.len() > MAX_METADATA_LIST_LENGTH {
                return Err(ValidationError::InvalidMetadata(format!(
                    "list longer than {MAX_METADATA_LIST_LENGTH} items"
                )));
            }
            items
                .into_iter()
                .map(|item| match item {
                    Value::Array(_) | Value::Object(_) => Err(ValidationError::InvalidMetadata(
                        "lists may only hold scalar values".into(),
                    )),
                    scalar => validate_metadata_value(scalar),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
        Value::Object(map) => validate_metadata(map).map(Value::Object),
        scalar => Ok(scalar),
    }
}

fn sanitize(input: &str) -> String {
    input
        .chars()
        .filter(|ch| !ch.is_control() || matches!(ch, '\t' | '\n' | '\r'))
        .collect::<String>()
        .trim()
        .to_string()
}

fn contains_any(haystack: &str, patterns: &[&str]) -> bool {
    let lowered = haystack.to_lowercase();
    patterns.iter().any(|pattern| lowered.contains(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> SourceValidator {
        SourceValidator::new(16, vec![".txt".into(), ".pdf".into()])
    }

    #[test]
    fn accepts_plain_text_sources() {
        let source = SourceDocument::new("note.TXT", b"patient note".to_vec());
        assert_eq!(validator().validate(&source), Ok(()));
    }

    #[test]
    fn rejects_bad_sources() {
        let cases = [
            (SourceDocument::new(" ", b"x".to_vec()), ValidationError::EmptyFilename),
            (SourceDocument::new("a.txt", Vec::new()), ValidationError::EmptyContent),
            (
                SourceDocument::new("a.txt", vec![b'a'; 17]),
                ValidationError::FileTooLarge { size: 17, max: 16 },
            ),
            (
                SourceDocument::new("a.exe", b"x".to_vec()),
                ValidationError::UnsupportedExtension(".exe".into()),
            ),
            (
                SourceDocument::new("../../etc.txt", b"x".to_vec()),
                ValidationError::MaliciousFilename,
            ),
            (
                SourceDocument::new("<SCRIPT>.txt", b"x".to_vec()),
                ValidationError::MaliciousFilename,
            ),
            (
                SourceDocument::new("scan.pdf", b"MZ\x90\x00".to_vec()),
                ValidationError::ExecutableContent,
            ),
        ];
        for (source, expected) in cases {
            assert_eq!(validator().validate(&source), Err(expected), "{}", source.filename);
        }
    }

    #[test]
    fn queries_are_sanitized_and_bounded() {
        assert_eq!(
            validate_search_query("  aspirin\u{0}  ").as_deref(),
            Ok("aspirin")
        );
        assert_eq!(validate_search_query(" \u{7} "), Err(ValidationError::EmptyQuery));
        assert_eq!(
            validate_search_query(&"a".repeat(501)),
            Err(ValidationError::QueryTooLong(501))
        );
        assert_eq!(
            validate_search_query("JavaScript:alert(1)"),
            Err(ValidationError::DangerousQuery)
        );
    }

    #[test]
    fn limits_must_be_in_range() {
        assert_eq!(validate_limit(10), Ok(10));
        assert_eq!(validate_limit(0), Err(ValidationError::InvalidLimit(0)));
        assert_eq!(validate_limit(101), Err(ValidationError::InvalidLimit(101)));
    }

    #[test]
    fn metadata_strings_are_sanitized_recursively() {
        let Value::Object(raw) = json!({
            "patient": { "ward": " 4B\u{0} " },
            "tags": ["urgent", 3, true]
        }) else {
            panic!("object");
        };
        let cleaned = validate_metadata(raw).expect("valid metadata");
        assert_eq!(cleaned["patient"]["ward"], json!("4B"));
        assert_eq!(cleaned["tags"], json!(["urgent", 3, true]));
    }

    #[test]
    fn metadata_rejects_nested_lists() {
        let Value::Object(raw) = json!({ "tags": [["a"]] }) else {
            panic!("object");
        };
        assert!(matches!(
            validate_metadata(raw),
            Err(ValidationError::InvalidMetadata(_))
        ));
    }
}
