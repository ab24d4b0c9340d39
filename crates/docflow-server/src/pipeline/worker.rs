//! Queue-driven processing worker
//!
//! Workers are independent processes that share nothing in memory: all
//! coordination happens through the queue lease and the status store's
//! conditional writes. Each message is handled as
//! `receive → lock → PROCESSING → pipeline → DONE/FAILED → ack?`:
//!
//! - unparseable payloads and lock denials are acknowledged and skipped
//!   without touching document status;
//! - after PROCESSING, any stage failure writes FAILED with the error
//!   message and never leaves a partial index behind;
//! - retryable stage failures leave the message for redelivery after the
//!   lease expires, non-retryable ones acknowledge immediately.

use super::{Chunker, Classifier, Embedder, Extractor, Indexer};
use crate::queue::{parse_payload, DocumentQueue, IngestMessage, ReceivedMessage};
use crate::retry::{ErrorKind, RetryPolicy, StageError};
use crate::status::{DocumentStatus, LockOutcome, StatusError, StatusStore, TransitionUpdate};
use crate::storage::{ObjectStore, StorageError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Everything a worker needs to process documents
pub struct WorkerDeps {
    pub status: Arc<dyn StatusStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub queue: Arc<dyn DocumentQueue>,
    pub classifier: Arc<dyn Classifier>,
    pub extractor: Arc<dyn Extractor>,
    pub chunker: Arc<dyn Chunker>,
    pub embedder: Arc<dyn Embedder>,
    pub indexer: Arc<dyn Indexer>,
}

/// Worker loop tuning
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Identity written into `lock_owner`; unique per worker process.
    pub worker_id: String,
    /// Long-poll bound for each receive call.
    pub wait: Duration,
    /// Message lease; must cover worst-case pipeline latency.
    pub lease: Duration,
    /// Sleep after a failed receive, so a broken queue is not hot-polled.
    pub poll_error_backoff: Duration,
    /// Stop after handling this many messages. Used for smoke runs.
    pub max_iterations: Option<u64>,
}

/// Counters reported on shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkerStats {
    pub processed: u64,
    pub failed: u64,
    pub skipped: u64,
}

struct PipelineOutcome {
    page_count: usize,
    chunk_count: usize,
}

pub struct ProcessingWorker {
    deps: WorkerDeps,
    retry: RetryPolicy,
    options: WorkerOptions,
    shutdown: Arc<AtomicBool>,
    processed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

impl ProcessingWorker {
    pub fn new(deps: WorkerDeps, retry: RetryPolicy, options: WorkerOptions) -> Self {
        Self {
            deps,
            retry,
            options,
            shutdown: Arc::new(AtomicBool::new(false)),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }

    /// Handle used to request a graceful stop: the current message
    /// finishes, then the loop exits.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }

    /// Run until shutdown is requested or `max_iterations` is reached.
    pub async fn run(&self) {
        info!(worker_id = %self.options.worker_id, "Worker started");

        let mut iterations: u64 = 0;

        while !self.shutdown.load(Ordering::Relaxed) {
            if let Some(max) = self.options.max_iterations {
                if iterations >= max {
                    info!(iterations, "Reached max iterations, stopping");
                    break;
                }
            }

            match self
                .deps
                .queue
                .receive(self.options.wait, self.options.lease)
                .await
            {
                Ok(Some(message)) => {
                    iterations += 1;
                    self.handle_message(message).await;
                },
                Ok(None) => {},
                Err(e) => {
                    warn!("Queue receive failed: {}", e);
                    tokio::time::sleep(self.options.poll_error_backoff).await;
                },
            }
        }

        let stats = self.stats();
        info!(
            worker_id = %self.options.worker_id,
            processed = stats.processed,
            failed = stats.failed,
            skipped = stats.skipped,
            "Worker stopped"
        );
    }

    /// Receive and handle at most one message. Returns whether a message
    /// was received.
    pub async fn run_once(&self) -> anyhow::Result<bool> {
        match self
            .deps
            .queue
            .receive(self.options.wait, self.options.lease)
            .await?
        {
            Some(message) => {
                self.handle_message(message).await;
                Ok(true)
            },
            None => Ok(false),
        }
    }

    async fn handle_message(&self, message: ReceivedMessage) {
        let parsed = match parse_payload(&message.payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(receipt = %message.receipt, "Dropping unparseable message: {}", e);
                self.ack(message.receipt).await;
                self.skipped.fetch_add(1, Ordering::Relaxed);
                return;
            },
        };

        info!(
            doc_id = %parsed.doc_id,
            receive_count = message.receive_count,
            "Handling ingest message"
        );

        match self
            .deps
            .status
            .acquire_lock(parsed.doc_id, &self.options.worker_id)
            .await
        {
            Ok(LockOutcome::Acquired) => {
                self.run_locked(parsed, message.receipt).await;
            },
            Ok(LockOutcome::Held) => {
                info!(doc_id = %parsed.doc_id, "Document locked by another worker, skipping");
                self.ack(message.receipt).await;
                self.skipped.fetch_add(1, Ordering::Relaxed);
            },
            Err(StatusError::NotFound(doc_id)) => {
                warn!(doc_id = %doc_id, "No document record for message, skipping");
                self.ack(message.receipt).await;
                self.skipped.fetch_add(1, Ordering::Relaxed);
            },
            Err(e) => {
                // Transient store failure: leave the message for redelivery.
                error!(doc_id = %parsed.doc_id, "Lock attempt failed: {}", e);
                self.failed.fetch_add(1, Ordering::Relaxed);
            },
        }
    }

    async fn run_locked(&self, message: IngestMessage, receipt: Uuid) {
        let doc_id = message.doc_id;

        match self
            .deps
            .status
            .transition(doc_id, DocumentStatus::Processing, TransitionUpdate::default())
            .await
        {
            Ok(_) => {},
            Err(e @ StatusError::InvalidTransition { .. }) => {
                // State machine violation, not a stage failure. Duplicate
                // deliveries for finished documents land here (done has no
                // successors). Loud and acked so a stuck message cannot
                // loop forever.
                error!(doc_id = %doc_id, "Refusing to process: {}", e);
                self.ack(receipt).await;
                self.skipped.fetch_add(1, Ordering::Relaxed);
                return;
            },
            Err(e) => {
                error!(doc_id = %doc_id, "Could not mark document processing: {}", e);
                self.failed.fetch_add(1, Ordering::Relaxed);
                return;
            },
        }

        match self.process_document(doc_id, &message.storage_key).await {
            Ok(outcome) => {
                let update = TransitionUpdate {
                    page_count: Some(outcome.page_count as i32),
                    chunk_count: Some(outcome.chunk_count as i32),
                    ..Default::default()
                };
                match self
                    .deps
                    .status
                    .transition(doc_id, DocumentStatus::Done, update)
                    .await
                {
                    Ok(_) => {
                        info!(
                            doc_id = %doc_id,
                            pages = outcome.page_count,
                            chunks = outcome.chunk_count,
                            "Document processed"
                        );
                        self.ack(receipt).await;
                        self.processed.fetch_add(1, Ordering::Relaxed);
                    },
                    Err(e) => {
                        // The index is written but the status write failed.
                        // Leave the message; redelivery re-enters through
                        // the re-entrant lock and the idempotent upsert.
                        error!(doc_id = %doc_id, "Could not mark document done: {}", e);
                        self.failed.fetch_add(1, Ordering::Relaxed);
                    },
                }
            },
            Err(stage_err) => {
                warn!(
                    doc_id = %doc_id,
                    kind = %stage_err.kind,
                    "Pipeline failed: {}",
                    stage_err.message
                );

                let update = TransitionUpdate {
                    message: Some(stage_err.to_string()),
                    ..Default::default()
                };
                if let Err(e) = self
                    .deps
                    .status
                    .transition(doc_id, DocumentStatus::Failed, update)
                    .await
                {
                    error!(doc_id = %doc_id, "Could not mark document failed: {}", e);
                }

                self.failed.fetch_add(1, Ordering::Relaxed);

                // Retryable failures rely on the lease for redelivery;
                // non-retryable ones will never succeed, so drop the message.
                if !stage_err.is_retryable() {
                    self.ack(receipt).await;
                }
            },
        }
    }

    async fn process_document(
        &self,
        doc_id: Uuid,
        storage_key: &str,
    ) -> Result<PipelineOutcome, StageError> {
        let data = self.deps.objects.get(storage_key).await.map_err(|e| match e {
            StorageError::NotFound(key) => StageError::new(
                ErrorKind::InvalidInput,
                format!("Stored object missing: {}", key),
            ),
            StorageError::Backend(message) => StageError::new(ErrorKind::Unavailable, message),
        })?;

        let classification = self.deps.classifier.classify(&data)?;
        let extracted = self.deps.extractor.extract(&data, &classification).await?;

        for page_error in &extracted.errors {
            warn!(doc_id = %doc_id, "Page extraction error: {}", page_error);
        }

        if !extracted.has_text() {
            return Err(StageError::new(
                ErrorKind::InvalidInput,
                "No extractable text in document",
            ));
        }

        let page_count = extracted.pages.len();
        let text = extracted.full_text();
        let chunks = self.deps.chunker.chunk(&text);

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());

        for batch in texts.chunks(self.deps.embedder.max_batch_size()) {
            let embedded = self
                .retry
                .run("embed", || self.deps.embedder.embed(batch))
                .await?;
            vectors.extend(embedded);
        }

        // Delete-before-upsert keeps reprocessed documents free of stale
        // vectors from a previous run.
        self.deps.indexer.delete(doc_id).await?;
        let chunk_count = self
            .deps
            .indexer
            .upsert(doc_id, &chunks, &vectors, page_count)
            .await?;

        Ok(PipelineOutcome {
            page_count,
            chunk_count,
        })
    }

    async fn ack(&self, receipt: Uuid) {
        if let Err(e) = self.deps.queue.ack(receipt).await {
            warn!(receipt = %receipt, "Failed to ack message: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{
        embed::FakeEmbedder, Classification, DefaultClassifier, ExtractedText, Extractor,
        FixedSizeChunker, InMemoryIndexer, Utf8Extractor,
    };
    use crate::queue::InMemoryQueue;
    use crate::status::{InMemoryStatusStore, NewDocument};
    use crate::storage::{InMemoryObjectStore, ObjectStore};

    struct TestHarness {
        status: Arc<InMemoryStatusStore>,
        objects: Arc<InMemoryObjectStore>,
        queue: Arc<InMemoryQueue>,
        indexer: Arc<InMemoryIndexer>,
    }

    fn options() -> WorkerOptions {
        WorkerOptions {
            worker_id: "worker-test".to_string(),
            wait: Duration::from_millis(100),
            lease: Duration::from_secs(60),
            poll_error_backoff: Duration::from_millis(10),
            max_iterations: None,
        }
    }

    fn retry() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(50))
    }

    fn harness() -> (TestHarness, ProcessingWorker) {
        let status = Arc::new(InMemoryStatusStore::new());
        let objects = Arc::new(InMemoryObjectStore::new());
        let queue = Arc::new(InMemoryQueue::new(5));
        let indexer = Arc::new(InMemoryIndexer::new());

        let deps = WorkerDeps {
            status: status.clone(),
            objects: objects.clone(),
            queue: queue.clone(),
            classifier: Arc::new(DefaultClassifier),
            extractor: Arc::new(Utf8Extractor),
            chunker: Arc::new(FixedSizeChunker::new(50, 10)),
            embedder: Arc::new(FakeEmbedder::default()),
            indexer: indexer.clone(),
        };

        let worker = ProcessingWorker::new(deps, retry(), options());
        (
            TestHarness {
                status,
                objects,
                queue,
                indexer,
            },
            worker,
        )
    }

    async fn seed_document(h: &TestHarness, payload: &[u8]) -> IngestMessage {
        let doc_id = Uuid::new_v4();
        let storage_key = crate::storage::upload_key(doc_id, "doc.txt");

        h.objects.put(&storage_key, payload.to_vec(), None).await.unwrap();
        h.status
            .create(NewDocument {
                doc_id,
                filename: "doc.txt".to_string(),
                uploaded_by: "tester".to_string(),
                storage_key: storage_key.clone(),
                checksum: "x".to_string(),
                size_bytes: payload.len() as i64,
            })
            .await
            .unwrap();

        let message = IngestMessage {
            doc_id,
            storage_key,
        };
        h.queue.send(&message).await.unwrap();
        message
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_path_marks_done_and_acks() {
        let (h, worker) = harness();
        let message = seed_document(&h, "page one\u{c}page two".as_bytes()).await;

        assert!(worker.run_once().await.unwrap());

        let record = h.status.get(message.doc_id).await.unwrap();
        assert_eq!(record.status, DocumentStatus::Done);
        assert_eq!(record.page_count, Some(2));
        assert!(record.chunk_count.unwrap() > 0);
        assert!(record.lock_owner.is_none());

        assert!(h.queue.is_empty());
        assert!(!h.indexer.entries_for(message.doc_id).is_empty());
        assert_eq!(worker.stats().processed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_document_fails_non_retryable_and_acks() {
        let (h, worker) = harness();
        let message = seed_document(&h, b"   \n  ").await;

        assert!(worker.run_once().await.unwrap());

        let record = h.status.get(message.doc_id).await.unwrap();
        assert_eq!(record.status, DocumentStatus::Failed);
        assert!(record.status_message.as_deref().unwrap().contains("No extractable text"));

        // Non-retryable: the message is gone.
        assert!(h.queue.is_empty());
        assert!(h.indexer.entries_for(message.doc_id).is_empty());
        assert_eq!(worker.stats().failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_payload_is_acked_without_status_changes() {
        let (h, worker) = harness();
        h.queue.send_raw("definitely not json").unwrap();

        assert!(worker.run_once().await.unwrap());

        assert!(h.queue.is_empty());
        assert_eq!(worker.stats().skipped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_denied_acks_without_touching_status() {
        let (h, worker) = harness();
        let message = seed_document(&h, b"some text").await;

        // Another live worker holds the lock.
        h.status.acquire_lock(message.doc_id, "other-worker").await.unwrap();

        assert!(worker.run_once().await.unwrap());

        let record = h.status.get(message.doc_id).await.unwrap();
        assert_eq!(record.status, DocumentStatus::Uploaded);
        assert_eq!(record.lock_owner.as_deref(), Some("other-worker"));
        assert!(h.queue.is_empty());
        assert_eq!(worker.stats().skipped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_record_acks_and_skips() {
        let (h, worker) = harness();
        let doc_id = Uuid::new_v4();
        h.queue
            .send(&IngestMessage {
                doc_id,
                storage_key: format!("uploads/{}/ghost.txt", doc_id),
            })
            .await
            .unwrap();

        assert!(worker.run_once().await.unwrap());
        assert!(h.queue.is_empty());
        assert_eq!(worker.stats().skipped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failure_leaves_message_for_redelivery() {
        struct DownEmbedder;

        #[async_trait::async_trait]
        impl Embedder for DownEmbedder {
            async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, StageError> {
                Err(StageError::new(ErrorKind::Unavailable, "embedding service down"))
            }

            fn max_batch_size(&self) -> usize {
                16
            }
        }

        let (h, _) = harness();
        let message = seed_document(&h, b"some document text").await;

        let deps = WorkerDeps {
            status: h.status.clone(),
            objects: h.objects.clone(),
            queue: h.queue.clone(),
            classifier: Arc::new(DefaultClassifier),
            extractor: Arc::new(Utf8Extractor),
            chunker: Arc::new(FixedSizeChunker::new(50, 10)),
            embedder: Arc::new(DownEmbedder),
            indexer: h.indexer.clone(),
        };
        let worker = ProcessingWorker::new(deps, retry(), options());

        assert!(worker.run_once().await.unwrap());

        let record = h.status.get(message.doc_id).await.unwrap();
        assert_eq!(record.status, DocumentStatus::Failed);
        assert!(record.status_message.is_some());

        // Retryable: the message stays queued (leased) for redelivery.
        assert_eq!(h.queue.len(), 1);
        assert!(h.indexer.entries_for(message.doc_id).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_extractor_page_errors_are_tolerated() {
        struct PartialExtractor;

        #[async_trait::async_trait]
        impl Extractor for PartialExtractor {
            async fn extract(
                &self,
                _data: &[u8],
                _hint: &Classification,
            ) -> Result<ExtractedText, StageError> {
                Ok(ExtractedText {
                    pages: vec!["readable page".to_string()],
                    errors: vec!["page 2: unreadable stream".to_string()],
                })
            }
        }

        let (h, _) = harness();
        let message = seed_document(&h, b"ignored").await;

        let deps = WorkerDeps {
            status: h.status.clone(),
            objects: h.objects.clone(),
            queue: h.queue.clone(),
            classifier: Arc::new(DefaultClassifier),
            extractor: Arc::new(PartialExtractor),
            chunker: Arc::new(FixedSizeChunker::new(50, 10)),
            embedder: Arc::new(FakeEmbedder::default()),
            indexer: h.indexer.clone(),
        };
        let worker = ProcessingWorker::new(deps, retry(), options());

        assert!(worker.run_once().await.unwrap());

        let record = h.status.get(message.doc_id).await.unwrap();
        assert_eq!(record.status, DocumentStatus::Done);
        assert_eq!(record.page_count, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_respects_max_iterations() {
        let (h, _) = harness();
        seed_document(&h, b"first").await;
        seed_document(&h, b"second").await;

        let deps = WorkerDeps {
            status: h.status.clone(),
            objects: h.objects.clone(),
            queue: h.queue.clone(),
            classifier: Arc::new(DefaultClassifier),
            extractor: Arc::new(Utf8Extractor),
            chunker: Arc::new(FixedSizeChunker::new(50, 10)),
            embedder: Arc::new(FakeEmbedder::default()),
            indexer: h.indexer.clone(),
        };
        let mut opts = options();
        opts.max_iterations = Some(1);
        let worker = ProcessingWorker::new(deps, retry(), opts);

        worker.run().await;

        assert_eq!(worker.stats().processed, 1);
        assert_eq!(h.queue.len(), 1);
    }
}
