//! Embedding clients
//!
//! [`HttpEmbedder`] talks to an embedding service over HTTP and maps
//! transport and status failures onto the retry taxonomy, so the worker's
//! resilience policy can tell a throttled service from a bad request.
//! [`FakeEmbedder`] produces deterministic vectors for tests.

use super::Embedder;
use crate::retry::{ErrorKind, StageError};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Serialize)]
struct EmbedRequest<'a> {
    texts: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    max_batch_size: usize,
}

impl HttpEmbedder {
    pub fn new(endpoint: impl Into<String>, max_batch_size: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            max_batch_size: max_batch_size.max(1),
        }
    }
}

#[async_trait::async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, StageError> {
        if texts.len() > self.max_batch_size {
            return Err(StageError::new(
                ErrorKind::InvalidInput,
                format!(
                    "Batch of {} exceeds max batch size {}",
                    texts.len(),
                    self.max_batch_size
                ),
            ));
        }

        debug!("Embedding batch of {} texts", texts.len());

        let response = self
            .client
            .post(&self.endpoint)
            .json(&EmbedRequest { texts })
            .send()
            .await
            .map_err(|e| {
                let kind = if e.is_timeout() {
                    ErrorKind::Timeout
                } else if e.is_connect() {
                    ErrorKind::Unavailable
                } else {
                    ErrorKind::Unknown
                };
                StageError::new(kind, format!("Embedding request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StageError::with_code(
                ErrorKind::from_http_status(status.as_u16()),
                status.as_u16().to_string(),
                format!("Embedding service returned {}: {}", status, body),
            ));
        }

        let parsed: EmbedResponse = response.json().await.map_err(|e| {
            StageError::new(
                ErrorKind::Unknown,
                format!("Unparseable embedding response: {}", e),
            )
        })?;

        if parsed.embeddings.len() != texts.len() {
            return Err(StageError::new(
                ErrorKind::Unknown,
                format!(
                    "Embedding count mismatch: sent {} texts, got {} vectors",
                    texts.len(),
                    parsed.embeddings.len()
                ),
            ));
        }

        Ok(parsed.embeddings)
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }
}

/// Deterministic embedder for tests: each vector encodes the text length
/// and a simple content hash.
pub struct FakeEmbedder {
    max_batch_size: usize,
}

impl FakeEmbedder {
    pub fn new(max_batch_size: usize) -> Self {
        Self {
            max_batch_size: max_batch_size.max(1),
        }
    }
}

impl Default for FakeEmbedder {
    fn default() -> Self {
        Self::new(16)
    }
}

#[async_trait::async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, StageError> {
        Ok(texts
            .iter()
            .map(|t| {
                let sum: u32 = t.bytes().map(u32::from).sum();
                vec![t.len() as f32, (sum % 1000) as f32, 1.0]
            })
            .collect())
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }
}
