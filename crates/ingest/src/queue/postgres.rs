//! PostgreSQL 큐
//!
//! `queue_batches` 테이블 한 행이 배치 하나입니다.
//! `dequeue`는 `FOR UPDATE SKIP LOCKED`로 보이는 행을 임대하고
//! `visible_at`을 가시성 타임아웃만큼 뒤로 미룹니다.
//! ack는 행 삭제, release는 `visible_at`을 현재로 되돌립니다.

use std::sync::Arc;
use std::time::Duration;

use sqlx::{PgPool, Row};
use tokio::time::Instant;
use uuid::Uuid;

use super::{BatchQueue, Delivery};
use crate::error::IngestError;
use crate::pg::{from_i32, from_i64};

/// 빈 큐를 다시 확인하기 전 대기 시간
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// PostgreSQL 기반 at-least-once 큐
#[derive(Clone)]
pub struct PgQueue {
    pool: PgPool,
    topic: Arc<str>,
    visibility_timeout: Duration,
}

impl PgQueue {
    /// 새 큐 핸들을 생성합니다. 테이블은 마이그레이션으로 만들어집니다.
    pub fn new(pool: PgPool, topic: &str, visibility_timeout: Duration) -> Self {
        Self {
            pool,
            topic: Arc::from(topic),
            visibility_timeout,
        }
    }

    async fn lease(&self, max_batches: usize) -> Result<Vec<Delivery>, IngestError> {
        let rows = sqlx::query(
            r#"
            WITH next AS (
                SELECT batch_id
                FROM queue_batches
                WHERE topic = $1 AND visible_at <= now()
                ORDER BY enqueued_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE queue_batches q
            SET visible_at = now() + make_interval(secs => $3),
                delivery_count = q.delivery_count + 1
            FROM next
            WHERE q.batch_id = next.batch_id
            RETURNING q.batch_id, q.payload, q.delivery_count
            "#,
        )
        .bind(self.topic.as_ref())
        .bind(i64::try_from(max_batches.max(1)).unwrap_or(i64::MAX))
        .bind(self.visibility_timeout.as_secs_f64())
        .fetch_all(&self.pool)
        .await
        .map_err(queue_error)?;

        rows.into_iter()
            .map(|row| {
                let delivery_count: i32 = row.try_get("delivery_count").map_err(queue_error)?;
                Ok(Delivery {
                    batch_id: row.try_get("batch_id").map_err(queue_error)?,
                    payload: row.try_get("payload").map_err(queue_error)?,
                    delivery_count: from_i32(delivery_count, "delivery_count")?,
                })
            })
            .collect()
    }
}

impl BatchQueue for PgQueue {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn enqueue(&self, batch_id: Uuid, payload: Vec<u8>) -> Result<Uuid, IngestError> {
        sqlx::query(
            r#"
            INSERT INTO queue_batches (batch_id, topic, payload)
            VALUES ($1, $2, $3)
            ON CONFLICT (batch_id) DO NOTHING
            "#,
        )
        .bind(batch_id)
        .bind(self.topic.as_ref())
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(queue_error)?;
        Ok(batch_id)
    }

    async fn dequeue(
        &self,
        max_batches: usize,
        timeout: Duration,
    ) -> Result<Vec<Delivery>, IngestError> {
        let deadline = Instant::now() + timeout;
        loop {
            let deliveries = self.lease(max_batches).await?;
            if !deliveries.is_empty() {
                return Ok(deliveries);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn acknowledge(&self, batch_id: Uuid) -> Result<bool, IngestError> {
        let result = sqlx::query("DELETE FROM queue_batches WHERE batch_id = $1 AND topic = $2")
            .bind(batch_id)
            .bind(self.topic.as_ref())
            .execute(&self.pool)
            .await
            .map_err(queue_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn release(&self, batch_id: Uuid) -> Result<bool, IngestError> {
        let result = sqlx::query(
            "UPDATE queue_batches SET visible_at = now() WHERE batch_id = $1 AND topic = $2",
        )
        .bind(batch_id)
        .bind(self.topic.as_ref())
        .execute(&self.pool)
        .await
        .map_err(queue_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn depth(&self) -> Result<usize, IngestError> {
        let depth: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_batches WHERE topic = $1")
            .bind(self.topic.as_ref())
            .fetch_one(&self.pool)
            .await
            .map_err(queue_error)?;
        Ok(from_i64(depth, "depth")? as usize)
    }
}

fn queue_error(err: sqlx::Error) -> IngestError {
    IngestError::QueueUnavailable(err.to_string())
}
