//! 워커 컨텍스트 -- 큐/저장소/원장/dead-letter 핸들 묶음
//!
//! 모든 워커는 [`IngestContext`]를 복제해 받으며 전역 핸들은 없습니다.
//! 백엔드는 [`Backend`]의 연관 타입으로 고릅니다.
//!
//! - [`MemoryBackend`]: 한 프로세스 안에서 모든 단계 실행 (테스트, `--role all`)
//! - [`PgBackend`]: PostgreSQL 공유 (단계별 프로세스 분리 가능)

use std::sync::Arc;
use std::time::Duration;

use logsift_core::LogsiftConfig;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use crate::bookkeeper::{MemoryLedger, PgLedger, ProgressLedger};
use crate::dead_letter::{DeadLetterSink, MemoryDeadLetters, PgDeadLetters};
use crate::error::IngestError;
use crate::parser::ParserChain;
use crate::pg;
use crate::queue::{BatchQueue, MemoryQueue, PgQueue, TOPIC_PARSED, TOPIC_RAW};
use crate::store::{MemoryStore, PgStore, RecordStore};

/// 저장 백엔드 종류
pub trait Backend: Send + Sync + 'static {
    /// 큐 구현
    type Queue: BatchQueue;
    /// 레코드 저장소 구현
    type Store: RecordStore;
    /// 진행 원장 구현
    type Ledger: ProgressLedger;
    /// dead-letter 저장소 구현
    type DeadLetters: DeadLetterSink;

    /// 백엔드 이름 (로그용)
    const NAME: &'static str;
}

/// 인메모리 백엔드
pub struct MemoryBackend;

impl Backend for MemoryBackend {
    type Queue = MemoryQueue;
    type Store = MemoryStore;
    type Ledger = MemoryLedger;
    type DeadLetters = MemoryDeadLetters;

    const NAME: &'static str = "memory";
}

/// PostgreSQL 백엔드
pub struct PgBackend;

impl Backend for PgBackend {
    type Queue = PgQueue;
    type Store = PgStore;
    type Ledger = PgLedger;
    type DeadLetters = PgDeadLetters;

    const NAME: &'static str = "postgres";
}

/// 워커에 전달되는 핸들 묶음
pub struct IngestContext<B: Backend> {
    /// 원시 라인 배치 큐
    pub raw_queue: B::Queue,
    /// 파싱 레코드 배치 큐
    pub parsed_queue: B::Queue,
    /// 레코드 저장소
    pub store: B::Store,
    /// 진행 원장
    pub ledger: B::Ledger,
    /// dead-letter 저장소
    pub dead_letters: B::DeadLetters,
    /// 설정
    pub config: Arc<LogsiftConfig>,
    /// 파서 체인
    pub chain: Arc<ParserChain>,
    /// 종료 신호
    pub cancel: CancellationToken,
}

impl<B: Backend> Clone for IngestContext<B> {
    fn clone(&self) -> Self {
        Self {
            raw_queue: self.raw_queue.clone(),
            parsed_queue: self.parsed_queue.clone(),
            store: self.store.clone(),
            ledger: self.ledger.clone(),
            dead_letters: self.dead_letters.clone(),
            config: Arc::clone(&self.config),
            chain: Arc::clone(&self.chain),
            cancel: self.cancel.clone(),
        }
    }
}

impl<B: Backend> IngestContext<B> {
    /// 큐 가시성 타임아웃
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_millis(self.config.queue.visibility_timeout_ms)
    }

    /// 큐 dequeue 대기 시간
    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.config.queue.dequeue_timeout_ms)
    }
}

fn build_chain(config: &LogsiftConfig) -> Result<Arc<ParserChain>, IngestError> {
    Ok(Arc::new(ParserChain::from_names(&config.parser.recognizers)?))
}

impl IngestContext<MemoryBackend> {
    /// 인메모리 컨텍스트를 만듭니다.
    pub fn in_memory(config: LogsiftConfig) -> Result<Self, IngestError> {
        let chain = build_chain(&config)?;
        let visibility = Duration::from_millis(config.queue.visibility_timeout_ms);
        Ok(Self {
            raw_queue: MemoryQueue::new(TOPIC_RAW, visibility),
            parsed_queue: MemoryQueue::new(TOPIC_PARSED, visibility),
            store: MemoryStore::new(),
            ledger: MemoryLedger::new(),
            dead_letters: MemoryDeadLetters::new(),
            config: Arc::new(config),
            chain,
            cancel: CancellationToken::new(),
        })
    }
}

impl IngestContext<PgBackend> {
    /// 연결 풀로 PostgreSQL 컨텍스트를 만듭니다.
    pub fn from_pool(pool: PgPool, config: LogsiftConfig) -> Result<Self, IngestError> {
        let chain = build_chain(&config)?;
        let visibility = Duration::from_millis(config.queue.visibility_timeout_ms);
        Ok(Self {
            raw_queue: PgQueue::new(pool.clone(), TOPIC_RAW, visibility),
            parsed_queue: PgQueue::new(pool.clone(), TOPIC_PARSED, visibility),
            store: PgStore::new(pool.clone()),
            ledger: PgLedger::new(pool.clone()),
            dead_letters: PgDeadLetters::new(pool),
            config: Arc::new(config),
            chain,
            cancel: CancellationToken::new(),
        })
    }

    /// 데이터베이스에 연결하고 마이그레이션을 적용한 뒤 컨텍스트를 만듭니다.
    pub async fn connect(config: LogsiftConfig) -> Result<Self, IngestError> {
        let pool = pg::connect(&config.storage).await?;
        pg::migrate(&pool).await?;
        Self::from_pool(pool, config)
    }
}
