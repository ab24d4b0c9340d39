//! End-to-end ingest flow tests
//!
//! Exercise the full path a document takes: upload transaction, queue
//! delivery, worker pipeline, status transitions, and the recovery
//! paths (lease redelivery and administrative reprocessing).

use docflow_server::features::documents::commands::{reprocess, upload, UploadDocumentCommand};
use docflow_server::features::FeatureState;
use docflow_server::pipeline::{
    embed::FakeEmbedder, worker::WorkerDeps, DefaultClassifier, Embedder, FixedSizeChunker,
    InMemoryIndexer, ProcessingWorker, Utf8Extractor, WorkerOptions,
};
use docflow_server::queue::InMemoryQueue;
use docflow_server::retry::{ErrorKind, RetryPolicy, StageError};
use docflow_server::status::{DocumentStatus, InMemoryStatusStore, StatusStore};
use docflow_server::storage::InMemoryObjectStore;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

const LEASE: Duration = Duration::from_secs(60);

struct World {
    status: Arc<InMemoryStatusStore>,
    objects: Arc<InMemoryObjectStore>,
    queue: Arc<InMemoryQueue>,
    indexer: Arc<InMemoryIndexer>,
}

impl World {
    fn new() -> Self {
        Self {
            status: Arc::new(InMemoryStatusStore::new()),
            objects: Arc::new(InMemoryObjectStore::new()),
            queue: Arc::new(InMemoryQueue::new(5)),
            indexer: Arc::new(InMemoryIndexer::new()),
        }
    }

    fn feature_state(&self) -> FeatureState {
        FeatureState {
            status: self.status.clone(),
            objects: self.objects.clone(),
            queue: self.queue.clone(),
            indexer: self.indexer.clone(),
        }
    }

    fn worker_with_embedder(&self, id: &str, embedder: Arc<dyn Embedder>) -> ProcessingWorker {
        let deps = WorkerDeps {
            status: self.status.clone(),
            objects: self.objects.clone(),
            queue: self.queue.clone(),
            classifier: Arc::new(DefaultClassifier),
            extractor: Arc::new(Utf8Extractor),
            chunker: Arc::new(FixedSizeChunker::new(40, 10)),
            embedder,
            indexer: self.indexer.clone(),
        };
        let retry = RetryPolicy::new(2, Duration::from_millis(10), Duration::from_millis(50));
        let options = WorkerOptions {
            worker_id: id.to_string(),
            wait: Duration::from_millis(100),
            lease: LEASE,
            poll_error_backoff: Duration::from_millis(10),
            max_iterations: None,
        };
        ProcessingWorker::new(deps, retry, options)
    }

    fn worker(&self, id: &str) -> ProcessingWorker {
        self.worker_with_embedder(id, Arc::new(FakeEmbedder::default()))
    }
}

fn text_upload(filename: &str, content: &str) -> UploadDocumentCommand {
    UploadDocumentCommand {
        filename: filename.to_string(),
        uploaded_by: Some("ops@example.com".to_string()),
        content: content.as_bytes().to_vec(),
        content_type: Some("text/plain".to_string()),
    }
}

/// Embedder that stays down for a fixed number of calls, then recovers.
struct FlakyEmbedder {
    calls: AtomicU32,
    fail_first: u32,
    inner: FakeEmbedder,
}

impl FlakyEmbedder {
    fn new(fail_first: u32) -> Self {
        Self {
            calls: AtomicU32::new(0),
            fail_first,
            inner: FakeEmbedder::default(),
        }
    }
}

#[async_trait::async_trait]
impl Embedder for FlakyEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, StageError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.fail_first {
            return Err(StageError::new(
                ErrorKind::Unavailable,
                "embedding service down",
            ));
        }
        self.inner.embed(texts).await
    }

    fn max_batch_size(&self) -> usize {
        self.inner.max_batch_size()
    }
}

#[tokio::test(start_paused = true)]
async fn test_document_flows_from_upload_to_done() {
    let world = World::new();
    let state = world.feature_state();

    let response = upload::handle(&state, text_upload("notes.txt", "page one\u{c}page two"))
        .await
        .unwrap();

    let worker = world.worker("worker-a");
    assert!(worker.run_once().await.unwrap());

    let record = world.status.get(response.doc_id).await.unwrap();
    assert_eq!(record.status, DocumentStatus::Done);
    assert_eq!(record.page_count, Some(2));
    assert!(record.chunk_count.unwrap() > 0);
    assert!(record.lock_owner.is_none());

    assert!(world.queue.is_empty());
    assert_eq!(
        world.indexer.entries_for(response.doc_id).len(),
        record.chunk_count.unwrap() as usize
    );
    assert_eq!(worker.stats().processed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_recovers_through_redelivery() {
    let world = World::new();
    let state = world.feature_state();

    let response = upload::handle(&state, text_upload("notes.txt", "short document"))
        .await
        .unwrap();

    // Retry budget is 2 attempts per run; 2 failures exhaust the first
    // processing attempt, the third call (second delivery) succeeds.
    let embedder = Arc::new(FlakyEmbedder::new(2));
    let worker = world.worker_with_embedder("worker-a", embedder);

    assert!(worker.run_once().await.unwrap());

    let record = world.status.get(response.doc_id).await.unwrap();
    assert_eq!(record.status, DocumentStatus::Failed);
    assert!(record.status_message.is_some());
    // Retryable failure: the message is leased, not dropped.
    assert_eq!(world.queue.len(), 1);
    assert!(world.indexer.entries_for(response.doc_id).is_empty());

    // Lease expires, the message comes back, the second attempt succeeds.
    tokio::time::advance(LEASE + Duration::from_secs(1)).await;
    assert!(worker.run_once().await.unwrap());

    let record = world.status.get(response.doc_id).await.unwrap();
    assert_eq!(record.status, DocumentStatus::Done);
    assert!(world.queue.is_empty());
    assert!(!world.indexer.entries_for(response.doc_id).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reprocess_resets_and_reindexes() {
    let world = World::new();
    let state = world.feature_state();

    let response = upload::handle(&state, text_upload("notes.txt", "original content"))
        .await
        .unwrap();

    let worker = world.worker("worker-a");
    assert!(worker.run_once().await.unwrap());
    let first_entries = world.indexer.entries_for(response.doc_id);
    assert!(!first_entries.is_empty());

    let reprocessed = reprocess::handle(&state, response.doc_id).await.unwrap();
    assert_eq!(reprocessed.status, "uploaded");
    assert_eq!(reprocessed.vectors_deleted, first_entries.len());

    let record = world.status.get(response.doc_id).await.unwrap();
    assert_eq!(record.status, DocumentStatus::Uploaded);
    assert!(record.lock_owner.is_none());
    assert!(world.indexer.entries_for(response.doc_id).is_empty());
    assert_eq!(world.queue.len(), 1);

    assert!(worker.run_once().await.unwrap());
    let record = world.status.get(response.doc_id).await.unwrap();
    assert_eq!(record.status, DocumentStatus::Done);
    assert_eq!(
        world.indexer.entries_for(response.doc_id).len(),
        first_entries.len()
    );
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_delivery_after_done_stays_consistent() {
    let world = World::new();
    let state = world.feature_state();

    let response = upload::handle(&state, text_upload("notes.txt", "some document text"))
        .await
        .unwrap();

    // A duplicated message, as at-least-once delivery can produce.
    world
        .queue
        .send_raw(
            serde_json::json!({
                "doc_id": response.doc_id,
                "storage_key": response.storage_key,
            })
            .to_string(),
        )
        .unwrap();

    let worker_a = world.worker("worker-a");
    let worker_b = world.worker("worker-b");

    assert!(worker_a.run_once().await.unwrap());
    let after_first = world.indexer.entries_for(response.doc_id);
    assert_eq!(
        world.status.get(response.doc_id).await.unwrap().status,
        DocumentStatus::Done
    );

    // Done is terminal: the duplicate is acked and skipped without the
    // pipeline running again, leaving the index untouched.
    assert!(worker_b.run_once().await.unwrap());
    let record = world.status.get(response.doc_id).await.unwrap();
    assert_eq!(record.status, DocumentStatus::Done);
    assert_eq!(
        world.indexer.entries_for(response.doc_id).len(),
        after_first.len()
    );
    assert_eq!(worker_b.stats().skipped, 1);
    assert_eq!(worker_b.stats().processed, 0);
    assert!(world.queue.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_worker_skips_document_locked_by_live_worker() {
    let world = World::new();
    let state = world.feature_state();

    let response = upload::handle(&state, text_upload("notes.txt", "contended document"))
        .await
        .unwrap();

    // Another worker is mid-processing: it holds the lock and has already
    // moved the record to processing.
    world
        .status
        .acquire_lock(response.doc_id, "worker-other")
        .await
        .unwrap();
    world
        .status
        .transition(
            response.doc_id,
            DocumentStatus::Processing,
            Default::default(),
        )
        .await
        .unwrap();

    let worker = world.worker("worker-b");
    assert!(worker.run_once().await.unwrap());

    // The contender backed off without touching the record.
    let record = world.status.get(response.doc_id).await.unwrap();
    assert_eq!(record.status, DocumentStatus::Processing);
    assert_eq!(record.lock_owner.as_deref(), Some("worker-other"));
    assert_eq!(worker.stats().skipped, 1);
    assert!(world.queue.is_empty());
}
