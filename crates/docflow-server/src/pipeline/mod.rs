//! Document processing pipeline
//!
//! A received document runs through classify → extract → chunk → embed →
//! index. Each stage sits behind a trait so deployments can plug their
//! own extraction service, embedding model, and vector store; the crate
//! ships a deterministic chunker, an HTTP embedder client, and in-memory
//! implementations for tests and local development.
//!
//! Stage failures are [`StageError`]s; the worker decides ack behavior
//! from their retryability.

pub mod chunker;
pub mod embed;
pub mod extract;
pub mod index;
pub mod worker;

use crate::retry::{ErrorKind, StageError};
use uuid::Uuid;

pub use chunker::FixedSizeChunker;
pub use embed::HttpEmbedder;
pub use extract::Utf8Extractor;
pub use index::{InMemoryIndexer, PostgresIndexer};
pub use worker::{ProcessingWorker, WorkerOptions};

/// Result of document classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// Whether the document has no usable text layer and needs OCR.
    pub needs_ocr: bool,
}

/// Decides how a document should be extracted.
pub trait Classifier: Send + Sync {
    fn classify(&self, data: &[u8]) -> Result<Classification, StageError>;
}

/// Extracted text, one entry per page
#[derive(Debug, Clone, Default)]
pub struct ExtractedText {
    pub pages: Vec<String>,
    /// Per-page extraction failures. A partially readable document still
    /// produces output; the failures are carried for diagnostics.
    pub errors: Vec<String>,
}

impl ExtractedText {
    /// Concatenated page text used for chunking.
    pub fn full_text(&self) -> String {
        self.pages.join("\n\n")
    }

    /// Whether any page produced non-whitespace text.
    pub fn has_text(&self) -> bool {
        self.pages.iter().any(|p| !p.trim().is_empty())
    }
}

/// Turns raw document bytes into page text.
#[async_trait::async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(
        &self,
        data: &[u8],
        hint: &Classification,
    ) -> Result<ExtractedText, StageError>;
}

/// A contiguous piece of document text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: i32,
    pub text: String,
    /// Byte offsets into the full extracted text.
    pub start_offset: usize,
    pub end_offset: usize,
}

/// Splits extracted text into chunks. Must be deterministic: the same
/// text always yields the same chunks.
pub trait Chunker: Send + Sync {
    fn chunk(&self, text: &str) -> Vec<Chunk>;
}

/// Produces one embedding vector per input text.
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, StageError>;

    /// Largest batch a single `embed` call accepts.
    fn max_batch_size(&self) -> usize;
}

/// Vector store for embedded chunks.
#[async_trait::async_trait]
pub trait Indexer: Send + Sync {
    /// Replace-or-insert vectors for a document. `chunks` and `vectors`
    /// correspond by position. Returns the number of entries written.
    async fn upsert(
        &self,
        doc_id: Uuid,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
        page_count: usize,
    ) -> Result<usize, StageError>;

    /// Remove all vectors for a document. Returns the number removed.
    async fn delete(&self, doc_id: Uuid) -> Result<usize, StageError>;
}

/// Default classifier.
///
/// PDF payloads are recognized by magic bytes; the text layer is guessed
/// from the presence of embedded font objects (no fonts usually means a
/// scan). Valid UTF-8 payloads pass through as plain text. Anything else
/// is rejected as unprocessable.
pub struct DefaultClassifier;

impl Classifier for DefaultClassifier {
    fn classify(&self, data: &[u8]) -> Result<Classification, StageError> {
        if data.starts_with(b"%PDF-") {
            let has_text_layer = data.windows(5).any(|w| w == b"/Font");
            return Ok(Classification {
                needs_ocr: !has_text_layer,
            });
        }

        if std::str::from_utf8(data).is_ok() {
            return Ok(Classification { needs_ocr: false });
        }

        Err(StageError::new(
            ErrorKind::InvalidInput,
            "Payload is neither a PDF document nor text",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifier_rejects_binary_payload() {
        let err = DefaultClassifier
            .classify(&[0x50, 0x4b, 0x03, 0x04, 0xff, 0xfe])
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidInput);
    }

    #[test]
    fn test_classifier_detects_pdf_text_layer() {
        let with_fonts = b"%PDF-1.7 ... /Font <</F1 ...>> ...";
        let classification = DefaultClassifier.classify(with_fonts).unwrap();
        assert!(!classification.needs_ocr);

        let scanned = b"%PDF-1.4 just image streams";
        let classification = DefaultClassifier.classify(scanned).unwrap();
        assert!(classification.needs_ocr);
    }

    #[test]
    fn test_classifier_accepts_plain_text() {
        let classification = DefaultClassifier.classify(b"plain text payload").unwrap();
        assert!(!classification.needs_ocr);
    }

    #[test]
    fn test_extracted_text_helpers() {
        let text = ExtractedText {
            pages: vec!["page one".to_string(), "page two".to_string()],
            errors: vec![],
        };
        assert!(text.has_text());
        assert_eq!(text.full_text(), "page one\n\npage two");

        let blank = ExtractedText {
            pages: vec!["   ".to_string(), String::new()],
            errors: vec![],
        };
        assert!(!blank.has_text());
    }
}
