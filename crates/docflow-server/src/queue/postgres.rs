//! Postgres-backed queue
//!
//! Messages live in `queue_messages` with a `visible_at` timestamp. A
//! receive is a single `UPDATE ... FOR UPDATE SKIP LOCKED` that pushes
//! `visible_at` past the lease and bumps `receive_count`, so competing
//! consumers never hand out the same message twice within a lease.
//! Acknowledging deletes the row; an expired lease simply leaves the row
//! visible again. Rows delivered more than `max_receive_count` times are
//! moved to `dead_letter_messages` for operator inspection.

use super::{DocumentQueue, IngestMessage, QueueError, QueueResult, ReceivedMessage};
use sqlx::{PgPool, Row};
use std::time::Duration;
use uuid::Uuid;

/// Interval between visibility polls while waiting for a message.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct PostgresQueue {
    pool: PgPool,
    max_receive_count: i32,
}

impl PostgresQueue {
    pub fn new(pool: PgPool, max_receive_count: i32) -> Self {
        Self {
            pool,
            max_receive_count,
        }
    }

    async fn try_receive(&self, lease: Duration) -> QueueResult<Option<ReceivedMessage>> {
        let row = sqlx::query(
            "WITH next AS ( \
                 SELECT id FROM queue_messages \
                 WHERE visible_at <= NOW() \
                 ORDER BY enqueued_at \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             UPDATE queue_messages m \
             SET visible_at = NOW() + make_interval(secs => $1), \
                 receive_count = receive_count + 1 \
             FROM next \
             WHERE m.id = next.id \
             RETURNING m.id, m.payload, m.receive_count",
        )
        .bind(lease.as_secs_f64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| QueueError::Backend(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let receipt: Uuid = row.try_get("id").map_err(|e| QueueError::Backend(e.to_string()))?;
        let payload: String = row
            .try_get("payload")
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        let receive_count: i32 = row
            .try_get("receive_count")
            .map_err(|e| QueueError::Backend(e.to_string()))?;

        if receive_count > self.max_receive_count {
            tracing::warn!(
                receipt = %receipt,
                receive_count,
                "Message exceeded max receive count, moving to dead letter table"
            );
            self.dead_letter(receipt).await?;
            return Ok(None);
        }

        Ok(Some(ReceivedMessage {
            receipt,
            payload,
            receive_count,
        }))
    }

    async fn dead_letter(&self, id: Uuid) -> QueueResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;

        sqlx::query(
            "INSERT INTO dead_letter_messages (id, payload, receive_count, enqueued_at) \
             SELECT id, payload, receive_count, enqueued_at \
             FROM queue_messages WHERE id = $1",
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| QueueError::Backend(e.to_string()))?;

        sqlx::query("DELETE FROM queue_messages WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl DocumentQueue for PostgresQueue {
    async fn send(&self, message: &IngestMessage) -> QueueResult<()> {
        let payload =
            serde_json::to_string(message).map_err(|e| QueueError::Backend(e.to_string()))?;

        sqlx::query("INSERT INTO queue_messages (id, payload) VALUES ($1, $2)")
            .bind(Uuid::new_v4())
            .bind(&payload)
            .execute(&self.pool)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;

        tracing::debug!(doc_id = %message.doc_id, "Enqueued ingest message");

        Ok(())
    }

    async fn receive(
        &self,
        wait: Duration,
        lease: Duration,
    ) -> QueueResult<Option<ReceivedMessage>> {
        let deadline = tokio::time::Instant::now() + wait;

        loop {
            if let Some(message) = self.try_receive(lease).await? {
                return Ok(Some(message));
            }

            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn ack(&self, receipt: Uuid) -> QueueResult<()> {
        let result = sqlx::query("DELETE FROM queue_messages WHERE id = $1")
            .bind(receipt)
            .execute(&self.pool)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(QueueError::UnknownReceipt(receipt));
        }

        Ok(())
    }
}
