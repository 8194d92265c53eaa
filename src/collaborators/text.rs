//! Extractor for sources that already carry text.

use crate::collaborators::{Extraction, ExtractionError, Extractor};
use crate::document::SourceDocument;
use async_trait::async_trait;

const TEXT_EXTENSIONS: [&str; 2] = [".txt", ".md"];

/// Decodes UTF-8 text sources. Image and PDF sources need an OCR engine and are
/// reported as unsupported.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

impl PlainTextExtractor {
    /// Construct the extractor.
    pub const fn new() -> Self {
        Self
    }

    fn is_text(source: &SourceDocument) -> bool {
        let extension = source.extension();
        TEXT_EXTENSIONS.contains(&extension.as_str())
            || source
                .content_type
                .as_deref()
                .is_some_and(|mime| mime.starts_with("text/"))
    }
}

#[async_trait]
impl Extractor for PlainTextExtractor {
    async fn extract(&self, source: &SourceDocument) -> Result<Extraction, ExtractionError> {
        if !Self::is_text(source) {
            return Err(ExtractionError::Unsupported(source.extension()));
        }
        let text = std::str::from_utf8(&source.content)
            .map_err(|err| ExtractionError::Unreadable(err.to_string()))?;
        let text = normalize_whitespace(text.trim_start_matches('\u{feff}'));
        if text.is_empty() {
            return Err(ExtractionError::Empty);
        }
        tracing::debug!(filename = %source.filename, chars = text.len(), "Extracted plain text");
        Ok(Extraction::new(text, 1.0))
    }
}

/// Collapse runs of spaces and tabs, keep line breaks, and trim the ends.
fn normalize_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn extracts_text_sources() {
        let source = SourceDocument::new("note.txt", "\u{feff}Patient  note\t here\n".as_bytes());
        let extraction = PlainTextExtractor::new()
            .extract(&source)
            .await
            .expect("text source");
        assert_eq!(extraction.text, "Patient note here");
        assert!((extraction.confidence - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn accepts_declared_text_mime() {
        let source = SourceDocument::new("upload", b"hello".to_vec()).with_content_type("text/plain");
        assert!(PlainTextExtractor::new().extract(&source).await.is_ok());
    }

    #[tokio::test]
    async fn rejects_images_and_invalid_utf8() {
        let image = SourceDocument::new("scan.png", vec![0x89, 0x50]);
        assert!(matches!(
            PlainTextExtractor::new().extract(&image).await,
            Err(ExtractionError::Unsupported(ext)) if ext == ".png"
        ));

        let garbled = SourceDocument::new("note.txt", vec![0xff, 0xfe, 0xfd]);
        assert!(matches!(
            PlainTextExtractor::new().extract(&garbled).await,
            Err(ExtractionError::Unreadable(_))
        ));
    }

    #[tokio::test]
    async fn blank_text_is_empty() {
        let source = SourceDocument::new("blank.md", b"  \n\t ".to_vec());
        assert!(matches!(
            PlainTextExtractor::new().extract(&source).await,
            Err(ExtractionError::Empty)
        ));
    }
}
