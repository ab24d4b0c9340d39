//! Ingestion queue
//!
//! Upload acceptance and processing are decoupled by a message queue with
//! at-least-once delivery. A received message is leased: it stays invisible
//! to other consumers for the lease duration and is redelivered if not
//! acknowledged in time. Messages that keep failing move to a dead-letter
//! table after too many deliveries.
//!
//! Producers write the canonical payload shape, but consumers parse
//! defensively: operators re-drive messages by hand and notification
//! services wrap payloads in envelopes, so [`parse_payload`] accepts the
//! canonical shape, a stringified `Message` envelope, and raw bucket
//! notification events.

pub mod memory;
pub mod postgres;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use memory::InMemoryQueue;
pub use postgres::PostgresQueue;

/// Canonical queue payload: one message per document to process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestMessage {
    pub doc_id: Uuid,
    pub storage_key: String,
}

/// A message handed to a consumer under a lease
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    /// Receipt used to acknowledge the message.
    pub receipt: Uuid,
    /// Raw payload as enqueued. Parse with [`parse_payload`].
    pub payload: String,
    /// Delivery count including this one.
    pub receive_count: i32,
}

/// Errors from queue operations
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Unparseable queue payload: {0}")]
    BadPayload(String),

    #[error("Unknown receipt: {0}")]
    UnknownReceipt(Uuid),

    #[error("Queue backend error: {0}")]
    Backend(String),
}

pub type QueueResult<T> = Result<T, QueueError>;

/// At-least-once delivery queue for ingest messages.
#[async_trait::async_trait]
pub trait DocumentQueue: Send + Sync {
    /// Enqueue a message in the canonical payload shape.
    async fn send(&self, message: &IngestMessage) -> QueueResult<()>;

    /// Receive one message, waiting up to `wait` for one to become
    /// available. The message is leased for `lease`; if it is not
    /// acknowledged before the lease expires it becomes visible again.
    async fn receive(
        &self,
        wait: std::time::Duration,
        lease: std::time::Duration,
    ) -> QueueResult<Option<ReceivedMessage>>;

    /// Acknowledge (permanently remove) a received message.
    async fn ack(&self, receipt: Uuid) -> QueueResult<()>;
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "Message")]
    message: String,
}

#[derive(Deserialize)]
struct BucketEvent {
    #[serde(rename = "Records")]
    records: Vec<BucketRecord>,
}

#[derive(Deserialize)]
struct BucketRecord {
    s3: BucketRecordS3,
}

#[derive(Deserialize)]
struct BucketRecordS3 {
    object: BucketObject,
}

#[derive(Deserialize)]
struct BucketObject {
    key: String,
}

/// Parse a raw queue payload into an [`IngestMessage`].
///
/// Accepted shapes, tried in order:
/// 1. canonical: `{"doc_id": "...", "storage_key": "..."}`
/// 2. notification envelope: `{"Message": "<canonical as a string>"}`
/// 3. bucket event: `{"Records": [{"s3": {"object": {"key": "uploads/<doc_id>/<file>"}}}]}`
pub fn parse_payload(raw: &str) -> QueueResult<IngestMessage> {
    if let Ok(message) = serde_json::from_str::<IngestMessage>(raw) {
        return Ok(message);
    }

    if let Ok(envelope) = serde_json::from_str::<Envelope>(raw) {
        if let Ok(message) = serde_json::from_str::<IngestMessage>(&envelope.message) {
            return Ok(message);
        }
        if let Some(message) = parse_bucket_event(&envelope.message) {
            return Ok(message);
        }
    }

    if let Some(message) = parse_bucket_event(raw) {
        return Ok(message);
    }

    Err(QueueError::BadPayload(truncate_for_log(raw)))
}

fn parse_bucket_event(raw: &str) -> Option<IngestMessage> {
    let event = serde_json::from_str::<BucketEvent>(raw).ok()?;
    let record = event.records.into_iter().next()?;
    let key = percent_decode(&record.s3.object.key);

    // Bucket event keys follow the upload layout: uploads/<doc_id>/<file>
    let mut parts = key.splitn(3, '/');
    let prefix = parts.next()?;
    let doc_id = parts.next()?;
    parts.next()?;

    if prefix != "uploads" {
        return None;
    }

    let doc_id = Uuid::parse_str(doc_id).ok()?;
    Some(IngestMessage {
        doc_id,
        storage_key: key,
    })
}

/// Bucket notifications URL-encode object keys. Decoding works on raw
/// bytes: keys are not guaranteed to be ASCII, and a `%` may be followed
/// by a multi-byte character rather than two hex digits.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                match (hex_digit(bytes[i + 1]), hex_digit(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 3;
                    },
                    _ => {
                        out.push(b'%');
                        i += 1;
                    },
                }
            },
            b'+' => {
                out.push(b' ');
                i += 1;
            },
            b => {
                out.push(b);
                i += 1;
            },
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn hex_digit(byte: u8) -> Option<u8> {
    (byte as char).to_digit(16).map(|d| d as u8)
}

fn truncate_for_log(raw: &str) -> String {
    const MAX: usize = 256;
    if raw.len() <= MAX {
        return raw.to_string();
    }

    // Back off to a char boundary so the slice cannot panic mid-character.
    let mut end = MAX;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &raw[..end])
}
