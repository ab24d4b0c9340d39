//! Text extraction
//!
//! Real deployments plug an extraction/OCR service behind the
//! [`Extractor`] trait. The shipped implementation treats the payload as
//! UTF-8 text with form-feed page breaks, which is enough for local
//! development and keeps the pipeline honest end to end.

use super::{Classification, ExtractedText, Extractor};
use crate::retry::{ErrorKind, StageError};

/// Page separator in plain-text payloads.
const PAGE_BREAK: char = '\u{c}';

pub struct Utf8Extractor;

#[async_trait::async_trait]
impl Extractor for Utf8Extractor {
    async fn extract(
        &self,
        data: &[u8],
        hint: &Classification,
    ) -> Result<ExtractedText, StageError> {
        if hint.needs_ocr {
            return Err(StageError::new(
                ErrorKind::InvalidInput,
                "Document needs OCR and no OCR extractor is configured",
            ));
        }

        let text = std::str::from_utf8(data).map_err(|e| {
            StageError::new(
                ErrorKind::InvalidInput,
                format!("Payload is not valid UTF-8 text: {}", e),
            )
        })?;

        let pages = text.split(PAGE_BREAK).map(str::to_string).collect();

        Ok(ExtractedText {
            pages,
            errors: Vec::new(),
        })
    }
}
