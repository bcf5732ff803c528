//! 인메모리 큐
//!
//! [`PgQueue`](super::PgQueue)와 같은 전달 의미(가시성 타임아웃, 재전달, 중복 enqueue 무시,
//! 임대 만료 후의 ack도 삭제)를 프로세스 내부에서 제공합니다.
//! 프로세스가 종료되면 내용은 사라집니다.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use uuid::Uuid;

use super::{BatchQueue, Delivery};
use crate::error::IngestError;

#[derive(Debug)]
struct Entry {
    batch_id: Uuid,
    payload: Arc<Vec<u8>>,
    delivery_count: u32,
}

#[derive(Debug)]
struct Lease {
    entry: Entry,
    visible_at: Instant,
}

#[derive(Debug, Default)]
struct State {
    ready: VecDeque<Entry>,
    leased: HashMap<Uuid, Lease>,
}

impl State {
    fn contains(&self, batch_id: Uuid) -> bool {
        self.leased.contains_key(&batch_id) || self.ready.iter().any(|e| e.batch_id == batch_id)
    }

    /// 가시성 타임아웃이 지난 임대를 대기열로 되돌립니다.
    fn reclaim_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<Uuid> = self
            .leased
            .iter()
            .filter(|(_, lease)| lease.visible_at <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            if let Some(lease) = self.leased.remove(id) {
                self.ready.push_back(lease.entry);
            }
        }
        expired.len()
    }

    fn next_expiry(&self) -> Option<Instant> {
        self.leased.values().map(|l| l.visible_at).min()
    }
}

/// 인메모리 at-least-once 큐
#[derive(Clone)]
pub struct MemoryQueue {
    topic: Arc<str>,
    visibility_timeout: Duration,
    state: Arc<Mutex<State>>,
    notify: Arc<Notify>,
}

impl MemoryQueue {
    /// 새 큐를 생성합니다.
    pub fn new(topic: &str, visibility_timeout: Duration) -> Self {
        Self {
            topic: Arc::from(topic),
            visibility_timeout,
            state: Arc::new(Mutex::new(State::default())),
            notify: Arc::new(Notify::new()),
        }
    }
}

impl BatchQueue for MemoryQueue {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn enqueue(&self, batch_id: Uuid, payload: Vec<u8>) -> Result<Uuid, IngestError> {
        {
            let mut state = self.state.lock().await;
            if state.contains(batch_id) {
                tracing::debug!(topic = %self.topic, %batch_id, "duplicate enqueue ignored");
                return Ok(batch_id);
            }
            state.ready.push_back(Entry {
                batch_id,
                payload: Arc::new(payload),
                delivery_count: 0,
            });
        }
        self.notify.notify_one();
        Ok(batch_id)
    }

    async fn dequeue(
        &self,
        max_batches: usize,
        timeout: Duration,
    ) -> Result<Vec<Delivery>, IngestError> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            let wake_at = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                state.reclaim_expired(now);

                let mut out = Vec::new();
                while out.len() < max_batches.max(1) {
                    let Some(mut entry) = state.ready.pop_front() else {
                        break;
                    };
                    entry.delivery_count += 1;
                    out.push(Delivery {
                        batch_id: entry.batch_id,
                        payload: entry.payload.as_ref().clone(),
                        delivery_count: entry.delivery_count,
                    });
                    state.leased.insert(
                        entry.batch_id,
                        Lease {
                            entry,
                            visible_at: now + self.visibility_timeout,
                        },
                    );
                }
                if !out.is_empty() {
                    // 다른 소비자도 남은 항목을 가져갈 수 있도록
                    if !state.ready.is_empty() {
                        self.notify.notify_one();
                    }
                    return Ok(out);
                }
                if now >= deadline {
                    return Ok(Vec::new());
                }
                state
                    .next_expiry()
                    .map_or(deadline, |expiry| expiry.min(deadline))
            };

            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn acknowledge(&self, batch_id: Uuid) -> Result<bool, IngestError> {
        let mut state = self.state.lock().await;
        if state.leased.remove(&batch_id).is_some() {
            return Ok(true);
        }
        // 임대가 만료되어 대기열로 돌아간 뒤의 ack도 삭제로 처리
        let before = state.ready.len();
        state.ready.retain(|e| e.batch_id != batch_id);
        Ok(state.ready.len() < before)
    }

    async fn release(&self, batch_id: Uuid) -> Result<bool, IngestError> {
        let released = {
            let mut state = self.state.lock().await;
            match state.leased.remove(&batch_id) {
                Some(lease) => {
                    state.ready.push_front(lease.entry);
                    true
                }
                None => state.ready.iter().any(|e| e.batch_id == batch_id),
            }
        };
        if released {
            self.notify.notify_one();
        }
        Ok(released)
    }

    async fn depth(&self) -> Result<usize, IngestError> {
        let state = self.state.lock().await;
        Ok(state.ready.len() + state.leased.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> MemoryQueue {
        MemoryQueue::new("raw", Duration::from_secs(30))
    }

    #[tokio::test]
    async fn enqueue_dequeue_ack() {
        let q = queue();
        let id = Uuid::new_v4();
        q.enqueue(id, b"payload".to_vec()).await.unwrap();
        assert_eq!(q.depth().await.unwrap(), 1);

        let deliveries = q.dequeue(10, Duration::from_millis(10)).await.unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].batch_id, id);
        assert_eq!(deliveries[0].payload, b"payload");
        assert_eq!(deliveries[0].delivery_count, 1);

        // 임대 중에도 깊이에 포함
        assert_eq!(q.depth().await.unwrap(), 1);
        assert!(q.acknowledge(id).await.unwrap());
        assert_eq!(q.depth().await.unwrap(), 0);
        assert!(!q.acknowledge(id).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_dequeue_times_out() {
        let q = queue();
        let started = Instant::now();
        let deliveries = q.dequeue(1, Duration::from_millis(500)).await.unwrap();
        assert!(deliveries.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test]
    async fn duplicate_enqueue_is_ignored() {
        let q = queue();
        let id = Uuid::new_v4();
        q.enqueue(id, b"a".to_vec()).await.unwrap();
        q.enqueue(id, b"a".to_vec()).await.unwrap();
        assert_eq!(q.depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn leased_batch_is_invisible() {
        let q = queue();
        q.enqueue(Uuid::new_v4(), b"a".to_vec()).await.unwrap();
        assert_eq!(q.dequeue(1, Duration::from_millis(1)).await.unwrap().len(), 1);
        assert!(q.dequeue(1, Duration::from_millis(1)).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unacked_batch_is_redelivered_after_visibility_timeout() {
        let q = MemoryQueue::new("parsed", Duration::from_secs(5));
        let id = Uuid::new_v4();
        q.enqueue(id, b"a".to_vec()).await.unwrap();
        q.dequeue(1, Duration::from_millis(1)).await.unwrap();

        let redelivered = q.dequeue(1, Duration::from_secs(10)).await.unwrap();
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].batch_id, id);
        assert_eq!(redelivered[0].delivery_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ack_after_lease_expiry_removes_batch() {
        let q = MemoryQueue::new("parsed", Duration::from_secs(5));
        let id = Uuid::new_v4();
        q.enqueue(id, b"a".to_vec()).await.unwrap();
        q.dequeue(1, Duration::from_millis(1)).await.unwrap();
        let other = Uuid::new_v4();
        q.enqueue(other, b"b".to_vec()).await.unwrap();

        // 만료된 임대가 대기열 뒤로 돌아가고 other가 먼저 나감
        tokio::time::advance(Duration::from_secs(6)).await;
        let next = q.dequeue(1, Duration::from_millis(1)).await.unwrap();
        assert_eq!(next[0].batch_id, other);

        // 늦게 도착한 ack도 배치를 지움
        assert!(q.acknowledge(id).await.unwrap());
        assert_eq!(q.depth().await.unwrap(), 1);
        assert!(q.dequeue(1, Duration::from_millis(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn release_makes_batch_immediately_visible() {
        let q = queue();
        let id = Uuid::new_v4();
        q.enqueue(id, b"a".to_vec()).await.unwrap();
        q.dequeue(1, Duration::from_millis(1)).await.unwrap();
        assert!(q.release(id).await.unwrap());

        let again = q.dequeue(1, Duration::from_millis(1)).await.unwrap();
        assert_eq!(again[0].batch_id, id);
    }

    #[tokio::test]
    async fn dequeue_respects_max_batches() {
        let q = queue();
        for _ in 0..5 {
            q.enqueue(Uuid::new_v4(), Vec::new()).await.unwrap();
        }
        assert_eq!(q.dequeue(3, Duration::from_millis(1)).await.unwrap().len(), 3);
        assert_eq!(q.dequeue(3, Duration::from_millis(1)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn waiting_consumer_wakes_on_enqueue() {
        let q = queue();
        let consumer = {
            let q = q.clone();
            tokio::spawn(async move { q.dequeue(1, Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        let id = Uuid::new_v4();
        q.enqueue(id, b"x".to_vec()).await.unwrap();

        let deliveries = consumer.await.unwrap().unwrap();
        assert_eq!(deliveries[0].batch_id, id);
    }
}
