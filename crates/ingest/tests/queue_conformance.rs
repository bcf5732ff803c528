//! 큐 구현 공통 동작 테스트
//!
//! 인메모리 큐와 PostgreSQL 큐에 같은 시나리오를 적용합니다.
//! PostgreSQL 쪽은 `LOGSIFT_TEST_DATABASE_URL`이 필요합니다.

use std::time::Duration;

use logsift_core::config::StorageConfig;
use logsift_ingest::{BatchQueue, MemoryQueue, PgQueue, pg};
use serial_test::serial;
use uuid::Uuid;

const VISIBILITY: Duration = Duration::from_millis(200);

async fn pg_queue() -> PgQueue {
    let url = std::env::var("LOGSIFT_TEST_DATABASE_URL")
        .expect("LOGSIFT_TEST_DATABASE_URL must be set for postgres tests");
    let storage = StorageConfig {
        backend: "postgres".to_owned(),
        postgres_url: url,
        max_connections: 5,
    };
    let pool = pg::connect(&storage).await.expect("connect");
    pg::migrate(&pool).await.expect("migrate");
    PgQueue::new(pool, &format!("test-{}", Uuid::new_v4()), VISIBILITY)
}

async fn release_redelivers_and_ack_removes<Q: BatchQueue>(queue: Q) {
    let id = Uuid::new_v4();
    queue.enqueue(id, b"payload".to_vec()).await.unwrap();
    queue.enqueue(id, b"payload".to_vec()).await.unwrap();
    assert_eq!(queue.depth().await.unwrap(), 1);

    let first = queue.dequeue(10, Duration::from_millis(50)).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].delivery_count, 1);
    assert!(queue.release(id).await.unwrap());

    let second = queue.dequeue(10, Duration::from_millis(50)).await.unwrap();
    assert_eq!(second[0].batch_id, id);
    assert_eq!(second[0].delivery_count, 2);

    assert!(queue.acknowledge(id).await.unwrap());
    assert!(!queue.acknowledge(id).await.unwrap());
    assert_eq!(queue.depth().await.unwrap(), 0);
}

async fn ack_after_lease_expiry_removes_batch<Q: BatchQueue>(queue: Q) {
    let id = Uuid::new_v4();
    queue.enqueue(id, b"slow".to_vec()).await.unwrap();
    let leased = queue.dequeue(1, Duration::from_millis(50)).await.unwrap();
    assert_eq!(leased[0].batch_id, id);

    tokio::time::sleep(VISIBILITY * 2).await;
    assert!(queue.acknowledge(id).await.unwrap());
    assert_eq!(queue.depth().await.unwrap(), 0);
    assert!(
        queue
            .dequeue(1, Duration::from_millis(50))
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn memory_release_redelivers_and_ack_removes() {
    release_redelivers_and_ack_removes(MemoryQueue::new("raw", VISIBILITY)).await;
}

#[tokio::test]
async fn memory_ack_after_lease_expiry_removes_batch() {
    ack_after_lease_expiry_removes_batch(MemoryQueue::new("raw", VISIBILITY)).await;
}

#[tokio::test]
#[ignore]
#[serial]
async fn postgres_release_redelivers_and_ack_removes() {
    release_redelivers_and_ack_removes(pg_queue().await).await;
}

#[tokio::test]
#[ignore]
#[serial]
async fn postgres_ack_after_lease_expiry_removes_batch() {
    ack_after_lease_expiry_removes_batch(pg_queue().await).await;
}
