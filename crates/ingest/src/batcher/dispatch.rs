//! 배치 전송기 -- 봉인된 배치를 큐로 보냅니다.
//!
//! 목적지(토픽)마다 전송 태스크 하나가 배치를 순서대로 보내므로
//! 진행 중인 플러시는 항상 하나입니다. 생산자와 전송 태스크 사이의
//! 채널 용량이 `max_pending_batches`이며, 큐 장애로 재시도하는 동안
//! 이 한도를 넘기면 생산자에게 치명적 에러를 돌려줍니다.
//!
//! 배치마다:
//! 1. 큐 깊이가 `max_depth` 미만이 될 때까지 대기 (백프레셔)
//! 2. 지수 백오프로 enqueue 재시도 (`max_enqueue_attempts`회)
//! 3. 배치에 실린 상위 단계 배치 ID를 상위 큐에서 ack

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use logsift_core::config::QueueConfig;
use logsift_core::metrics as m;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::Batch;
use crate::error::IngestError;
use crate::queue::{BatchQueue, encode_batch};

/// 백프레셔 대기 중 깊이 재확인 간격
const DEPTH_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 전송 설정
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// 이 깊이 이상이면 enqueue 전에 대기
    pub max_depth: usize,
    /// 생산자가 쌓아둘 수 있는 봉인 배치 수
    pub max_pending_batches: usize,
    /// 첫 재시도 대기 시간
    pub initial_backoff: Duration,
    /// 재시도 대기 시간 상한
    pub max_backoff: Duration,
    /// 배치당 enqueue 시도 횟수
    pub max_attempts: u32,
}

impl DispatchSettings {
    /// 큐 설정에서 전송 설정을 만듭니다.
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            max_pending_batches: config.max_pending_batches,
            initial_backoff: Duration::from_millis(config.retry_initial_backoff_ms),
            max_backoff: Duration::from_millis(config.retry_max_backoff_ms),
            max_attempts: config.max_enqueue_attempts,
        }
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}

/// 한 목적지 큐로의 배치 전송기
pub struct BatchDispatcher<T> {
    tx: mpsc::Sender<Batch<T>>,
    retrying: Arc<AtomicBool>,
    topic: String,
    task: JoinHandle<Result<u64, IngestError>>,
}

impl<T> BatchDispatcher<T>
where
    T: Serialize + Send + Sync + 'static,
{
    /// 전송 태스크를 시작합니다.
    ///
    /// `upstream`이 주어지면 배치가 큐에 들어간 뒤 배치의 `upstream` ID를 그 큐에서 ack합니다.
    pub fn spawn<Q: BatchQueue>(
        queue: Q,
        upstream: Option<Q>,
        settings: DispatchSettings,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(settings.max_pending_batches.max(1));
        let retrying = Arc::new(AtomicBool::new(false));
        let topic = queue.topic().to_owned();
        let sender = Sender {
            queue,
            upstream,
            settings,
            retrying: Arc::clone(&retrying),
            cancel,
        };
        let task = tokio::spawn(sender.run(rx));
        Self {
            tx,
            retrying,
            topic,
            task,
        }
    }

    /// 봉인된 배치를 전송 대기열에 넣습니다.
    ///
    /// 대기열이 차 있으면 자리가 날 때까지 기다립니다. 단, 전송 태스크가
    /// 큐 장애로 재시도 중이면 `QueueUnavailable`을 반환합니다.
    pub async fn dispatch(&self, batch: Batch<T>) -> Result<(), IngestError> {
        match self.tx.try_send(batch) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(batch)) => {
                if self.retrying.load(Ordering::Acquire) {
                    return Err(IngestError::QueueUnavailable(format!(
                        "{}: pending batch limit reached while queue is unavailable",
                        self.topic
                    )));
                }
                self.tx
                    .send(batch)
                    .await
                    .map_err(|_| self.stopped_error())
            }
            Err(TrySendError::Closed(_)) => Err(self.stopped_error()),
        }
    }

    /// 남은 배치를 모두 보내고 전송 태스크를 종료합니다. 보낸 배치 수를 반환합니다.
    pub async fn finish(self) -> Result<u64, IngestError> {
        drop(self.tx);
        self.task
            .await
            .map_err(|e| IngestError::Channel(format!("dispatcher task failed: {e}")))?
    }

    fn stopped_error(&self) -> IngestError {
        IngestError::Channel(format!("{} dispatcher stopped", self.topic))
    }
}

struct Sender<Q> {
    queue: Q,
    upstream: Option<Q>,
    settings: DispatchSettings,
    retrying: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl<Q: BatchQueue> Sender<Q> {
    async fn run<T: Serialize>(self, mut rx: mpsc::Receiver<Batch<T>>) -> Result<u64, IngestError> {
        let mut sent = 0u64;
        while let Some(batch) = rx.recv().await {
            let payload = encode_batch(&batch)?;
            self.wait_for_capacity().await;
            self.enqueue_with_retry(&batch, payload).await?;
            self.ack_upstream(&batch).await;
            sent += 1;
        }
        tracing::debug!(topic = self.queue.topic(), batches = sent, "dispatcher drained");
        Ok(sent)
    }

    /// 큐 깊이가 한도 아래로 내려갈 때까지 기다립니다. 취소되면 대기를 그만둡니다.
    async fn wait_for_capacity(&self) {
        let mut waited = false;
        loop {
            let depth = match self.queue.depth().await {
                Ok(depth) => depth,
                // enqueue 재시도가 장애를 처리
                Err(_) => return,
            };
            metrics::gauge!(m::QUEUE_DEPTH, m::LABEL_TOPIC => self.queue.topic().to_owned())
                .set(depth as f64);
            if depth < self.settings.max_depth {
                return;
            }
            if !waited {
                waited = true;
                metrics::counter!(
                    m::QUEUE_BACKPRESSURE_WAITS_TOTAL,
                    m::LABEL_TOPIC => self.queue.topic().to_owned()
                )
                .increment(1);
                tracing::debug!(
                    topic = self.queue.topic(),
                    depth,
                    max_depth = self.settings.max_depth,
                    "queue full, waiting"
                );
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(DEPTH_POLL_INTERVAL) => {}
            }
        }
    }

    async fn enqueue_with_retry<T>(
        &self,
        batch: &Batch<T>,
        payload: Vec<u8>,
    ) -> Result<(), IngestError> {
        let mut backoff = self.settings.initial_backoff;
        let mut attempt = 1;
        loop {
            match self.queue.enqueue(batch.id, payload.clone()).await {
                Ok(_) => {
                    self.retrying.store(false, Ordering::Release);
                    tracing::debug!(
                        topic = self.queue.topic(),
                        batch_id = %batch.id,
                        items = batch.len(),
                        "batch enqueued"
                    );
                    return Ok(());
                }
                Err(e) if attempt >= self.settings.max_attempts.max(1) => {
                    tracing::error!(
                        topic = self.queue.topic(),
                        batch_id = %batch.id,
                        attempts = attempt,
                        error = %e,
                        "enqueue failed, giving up"
                    );
                    return Err(e);
                }
                Err(e) => {
                    self.retrying.store(true, Ordering::Release);
                    metrics::counter!(
                        m::QUEUE_RETRIES_TOTAL,
                        m::LABEL_TOPIC => self.queue.topic().to_owned()
                    )
                    .increment(1);
                    tracing::warn!(
                        topic = self.queue.topic(),
                        batch_id = %batch.id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "enqueue failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.settings.max_backoff);
                    attempt += 1;
                }
            }
        }
    }

    async fn ack_upstream<T>(&self, batch: &Batch<T>) {
        let Some(upstream) = &self.upstream else {
            return;
        };
        for id in &batch.upstream {
            // 실패하면 재전달되어 다시 처리되고 저장 시 중복으로 흡수됨
            if let Err(e) = upstream.acknowledge(*id).await {
                tracing::warn!(
                    topic = upstream.topic(),
                    batch_id = %id,
                    error = %e,
                    "failed to acknowledge upstream batch"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batcher::FlushTrigger;
    use crate::queue::{MemoryQueue, decode_batch};
    use chrono::Utc;
    use logsift_core::types::{ByteRange, RawLine};
    use std::sync::atomic::AtomicU32;
    use uuid::Uuid;

    fn batch(n: usize) -> Batch<RawLine> {
        let items = (0..n)
            .map(|i| RawLine {
                source_file: "a.log".to_owned(),
                byte_offset: i as u64 * 2,
                line_number: i as u64 + 1,
                text: "x".to_owned(),
                ingested_at: Utc::now(),
                claim: ByteRange::new(i as u64 * 2, i as u64 * 2 + 2),
            })
            .collect();
        Batch::from_items(items, FlushTrigger::Count)
    }

    fn settings() -> DispatchSettings {
        DispatchSettings {
            max_depth: 100,
            max_pending_batches: 2,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
            max_attempts: 3,
        }
    }

    /// 처음 `failures`번 enqueue에 실패하는 큐
    #[derive(Clone)]
    struct FlakyQueue {
        inner: MemoryQueue,
        failures: Arc<AtomicU32>,
    }

    impl FlakyQueue {
        fn new(failures: u32) -> Self {
            Self {
                inner: MemoryQueue::new("raw", Duration::from_secs(30)),
                failures: Arc::new(AtomicU32::new(failures)),
            }
        }
    }

    impl BatchQueue for FlakyQueue {
        fn topic(&self) -> &str {
            self.inner.topic()
        }

        async fn enqueue(&self, batch_id: Uuid, payload: Vec<u8>) -> Result<Uuid, IngestError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(IngestError::QueueUnavailable("connection refused".to_owned()));
            }
            self.inner.enqueue(batch_id, payload).await
        }

        async fn dequeue(
            &self,
            max_batches: usize,
            timeout: Duration,
        ) -> Result<Vec<crate::queue::Delivery>, IngestError> {
            self.inner.dequeue(max_batches, timeout).await
        }

        async fn acknowledge(&self, batch_id: Uuid) -> Result<bool, IngestError> {
            self.inner.acknowledge(batch_id).await
        }

        async fn release(&self, batch_id: Uuid) -> Result<bool, IngestError> {
            self.inner.release(batch_id).await
        }

        async fn depth(&self) -> Result<usize, IngestError> {
            self.inner.depth().await
        }
    }

    #[tokio::test]
    async fn dispatched_batches_reach_queue_in_order() {
        let queue = MemoryQueue::new("raw", Duration::from_secs(30));
        let dispatcher =
            BatchDispatcher::spawn(queue.clone(), None, settings(), CancellationToken::new());
        let first = batch(1);
        let second = batch(2);
        let ids = [first.id, second.id];
        dispatcher.dispatch(first).await.unwrap();
        dispatcher.dispatch(second).await.unwrap();
        assert_eq!(dispatcher.finish().await.unwrap(), 2);

        let deliveries = queue.dequeue(10, Duration::from_millis(10)).await.unwrap();
        let got: Vec<Uuid> = deliveries.iter().map(|d| d.batch_id).collect();
        assert_eq!(got, ids);
        let decoded: Batch<RawLine> = decode_batch(&deliveries[1].payload).unwrap();
        assert_eq!(decoded.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let queue = FlakyQueue::new(2);
        let dispatcher =
            BatchDispatcher::spawn(queue.clone(), None, settings(), CancellationToken::new());
        dispatcher.dispatch(batch(1)).await.unwrap();
        assert_eq!(dispatcher.finish().await.unwrap(), 1);
        assert_eq!(queue.depth().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_are_fatal() {
        let queue = FlakyQueue::new(10);
        let dispatcher =
            BatchDispatcher::spawn(queue.clone(), None, settings(), CancellationToken::new());
        dispatcher.dispatch(batch(1)).await.unwrap();
        let err = dispatcher.finish().await.unwrap_err();
        assert!(matches!(err, IngestError::QueueUnavailable(_)));
        assert_eq!(queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn upstream_batches_are_acked_after_enqueue() {
        let raw = MemoryQueue::new("raw", Duration::from_secs(30));
        let parsed = MemoryQueue::new("parsed", Duration::from_secs(30));
        let raw_id = Uuid::new_v4();
        raw.enqueue(raw_id, b"{}".to_vec()).await.unwrap();
        raw.dequeue(1, Duration::from_millis(1)).await.unwrap();

        let dispatcher = BatchDispatcher::spawn(
            parsed.clone(),
            Some(raw.clone()),
            settings(),
            CancellationToken::new(),
        );
        let mut out = batch(1);
        out.upstream.push(raw_id);
        dispatcher.dispatch(out).await.unwrap();
        dispatcher.finish().await.unwrap();

        assert_eq!(raw.depth().await.unwrap(), 0);
        assert_eq!(parsed.depth().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_applies_backpressure_until_cancelled() {
        let queue = MemoryQueue::new("raw", Duration::from_secs(30));
        queue.enqueue(Uuid::new_v4(), Vec::new()).await.unwrap();
        let cancel = CancellationToken::new();
        let dispatcher = BatchDispatcher::spawn(
            queue.clone(),
            None,
            DispatchSettings {
                max_depth: 1,
                ..settings()
            },
            cancel.clone(),
        );
        dispatcher.dispatch(batch(1)).await.unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(queue.depth().await.unwrap(), 1);

        cancel.cancel();
        dispatcher.finish().await.unwrap();
        assert_eq!(queue.depth().await.unwrap(), 2);
    }

    #[test]
    fn settings_follow_queue_config() {
        let config = QueueConfig::default();
        let settings = DispatchSettings::from_config(&config);
        assert_eq!(settings.max_depth, config.max_depth);
        assert_eq!(settings.max_attempts, config.max_enqueue_attempts);
        assert_eq!(
            settings.initial_backoff,
            Duration::from_millis(config.retry_initial_backoff_ms)
        );
    }
}
