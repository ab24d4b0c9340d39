//! In-memory queue for tests and local development
//!
//! Mirrors the lease semantics of the Postgres queue using tokio time, so
//! tests can drive redelivery deterministically with a paused clock.

use super::{DocumentQueue, IngestMessage, QueueError, QueueResult, ReceivedMessage};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

struct QueueEntry {
    id: Uuid,
    payload: String,
    visible_at: Instant,
    receive_count: i32,
}

#[derive(Default)]
struct QueueInner {
    entries: VecDeque<QueueEntry>,
    dead_letters: Vec<String>,
}

pub struct InMemoryQueue {
    inner: Mutex<QueueInner>,
    max_receive_count: i32,
}

impl InMemoryQueue {
    pub fn new(max_receive_count: i32) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            max_receive_count,
        }
    }

    /// Enqueue a raw payload, bypassing the canonical shape. Test helper
    /// for exercising defensive parsing in consumers.
    pub fn send_raw(&self, payload: impl Into<String>) -> QueueResult<()> {
        let mut inner = self.inner.lock().map_err(|e| QueueError::Backend(e.to_string()))?;
        inner.entries.push_back(QueueEntry {
            id: Uuid::new_v4(),
            payload: payload.into(),
            visible_at: Instant::now(),
            receive_count: 0,
        });
        Ok(())
    }

    /// Number of messages still in the queue (visible or leased).
    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Payloads that exceeded the max receive count.
    pub fn dead_letters(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|i| i.dead_letters.clone())
            .unwrap_or_default()
    }

    fn try_receive(&self, lease: Duration) -> QueueResult<Option<ReceivedMessage>> {
        let mut inner = self.inner.lock().map_err(|e| QueueError::Backend(e.to_string()))?;
        let now = Instant::now();

        loop {
            let Some(pos) = inner.entries.iter().position(|e| e.visible_at <= now) else {
                return Ok(None);
            };

            let entry = &mut inner.entries[pos];
            entry.receive_count += 1;
            entry.visible_at = now + lease;

            if entry.receive_count > self.max_receive_count {
                let entry = inner.entries.remove(pos).map(|e| e.payload);
                if let Some(payload) = entry {
                    inner.dead_letters.push(payload);
                }
                continue;
            }

            let entry = &inner.entries[pos];
            return Ok(Some(ReceivedMessage {
                receipt: entry.id,
                payload: entry.payload.clone(),
                receive_count: entry.receive_count,
            }));
        }
    }
}

#[async_trait::async_trait]
impl DocumentQueue for InMemoryQueue {
    async fn send(&self, message: &IngestMessage) -> QueueResult<()> {
        let payload =
            serde_json::to_string(message).map_err(|e| QueueError::Backend(e.to_string()))?;
        self.send_raw(payload)
    }

    async fn receive(
        &self,
        wait: Duration,
        lease: Duration,
    ) -> QueueResult<Option<ReceivedMessage>> {
        let deadline = Instant::now() + wait;

        loop {
            if let Some(message) = self.try_receive(lease)? {
                return Ok(Some(message));
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn ack(&self, receipt: Uuid) -> QueueResult<()> {
        let mut inner = self.inner.lock().map_err(|e| QueueError::Backend(e.to_string()))?;

        let Some(pos) = inner.entries.iter().position(|e| e.id == receipt) else {
            return Err(QueueError::UnknownReceipt(receipt));
        };
        inner.entries.remove(pos);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> IngestMessage {
        let doc_id = Uuid::new_v4();
        IngestMessage {
            doc_id,
            storage_key: format!("uploads/{}/a.pdf", doc_id),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_receive_ack() {
        let queue = InMemoryQueue::new(5);
        let msg = message();
        queue.send(&msg).await.unwrap();

        let received = queue
            .receive(Duration::from_secs(1), Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.receive_count, 1);
        assert_eq!(super::super::parse_payload(&received.payload).unwrap(), msg);

        queue.ack(received.receipt).await.unwrap();
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_leased_message_is_invisible() {
        let queue = InMemoryQueue::new(5);
        queue.send(&message()).await.unwrap();

        let first = queue
            .receive(Duration::from_secs(1), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(first.is_some());

        // Within the lease nothing is available.
        let second = queue
            .receive(Duration::from_secs(1), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacked_message_is_redelivered() {
        let queue = InMemoryQueue::new(5);
        queue.send(&message()).await.unwrap();

        let first = queue
            .receive(Duration::from_secs(1), Duration::from_secs(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.receive_count, 1);

        tokio::time::advance(Duration::from_secs(11)).await;

        let second = queue
            .receive(Duration::from_secs(1), Duration::from_secs(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.receipt, first.receipt);
        assert_eq!(second.receive_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poison_message_moves_to_dead_letters() {
        let queue = InMemoryQueue::new(2);
        queue.send(&message()).await.unwrap();

        for _ in 0..2 {
            let received = queue
                .receive(Duration::from_secs(1), Duration::from_secs(1))
                .await
                .unwrap();
            assert!(received.is_some());
            tokio::time::advance(Duration::from_secs(2)).await;
        }

        // Third delivery attempt exceeds the cap.
        let received = queue
            .receive(Duration::from_secs(1), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(received.is_none());
        assert_eq!(queue.dead_letters().len(), 1);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_times_out_on_empty_queue() {
        let queue = InMemoryQueue::new(5);
        let received = queue
            .receive(Duration::from_secs(1), Duration::from_secs(30))
            .await
            .unwrap();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn test_ack_unknown_receipt() {
        let queue = InMemoryQueue::new(5);
        let err = queue.ack(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, QueueError::UnknownReceipt(_)));
    }
}
