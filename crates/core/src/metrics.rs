//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 단계는 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `logsift_`
//! - 단계명: `reader_`, `parser_`, `batcher_`, `queue_`, `indexer_`, `dead_letter_`
//! - 접미어: `_total` (counter), `_seconds` (histogram), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use logsift_core::metrics as m;
//!
//! metrics::counter!(m::READER_LINES_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 로그 유형 레이블 키 (firewall, dns, auth)
pub const LABEL_LOG_TYPE: &str = "log_type";

/// 배치 단계 레이블 키 (raw, parsed)
pub const LABEL_STAGE: &str = "stage";

/// 플러시 트리거 레이블 키 (count, bytes, timeout, shutdown)
pub const LABEL_TRIGGER: &str = "trigger";

/// dead-letter 사유 레이블 키
pub const LABEL_REASON: &str = "reason";

/// 큐 토픽 레이블 키
pub const LABEL_TOPIC: &str = "topic";

// ─── Reader 메트릭 ──────────────────────────────────────────────────

/// Reader: 방출한 라인 수 (counter)
pub const READER_LINES_TOTAL: &str = "logsift_reader_lines_total";

/// Reader: 읽은 바이트 수 (counter)
pub const READER_BYTES_TOTAL: &str = "logsift_reader_bytes_total";

/// Reader: 읽기 실패한 파일 수 (counter)
pub const READER_FILE_ERRORS_TOTAL: &str = "logsift_reader_file_errors_total";

// ─── Parser 메트릭 ──────────────────────────────────────────────────

/// Parser: 파싱 성공 레코드 수 (counter, label: log_type)
pub const PARSER_RECORDS_TOTAL: &str = "logsift_parser_records_total";

/// Parser: 배치 하나의 파싱 소요 시간 (histogram, 초)
pub const PARSER_BATCH_DURATION_SECONDS: &str = "logsift_parser_batch_duration_seconds";

// ─── Batcher / Queue 메트릭 ─────────────────────────────────────────

/// Batcher: 플러시된 배치 수 (counter, labels: stage, trigger)
pub const BATCHES_FLUSHED_TOTAL: &str = "logsift_batches_flushed_total";

/// Queue: 전송 재시도 수 (counter, label: topic)
pub const QUEUE_RETRIES_TOTAL: &str = "logsift_queue_retries_total";

/// Queue: 현재 큐 깊이 (gauge, label: topic)
pub const QUEUE_DEPTH: &str = "logsift_queue_depth";

/// Queue: 백프레셔로 대기한 횟수 (counter, label: topic)
pub const QUEUE_BACKPRESSURE_WAITS_TOTAL: &str = "logsift_queue_backpressure_waits_total";

// ─── Indexer 메트릭 ─────────────────────────────────────────────────

/// Indexer: 저장된 레코드 수 (counter, label: log_type)
pub const INDEXER_RECORDS_WRITTEN_TOTAL: &str = "logsift_indexer_records_written_total";

/// Indexer: 재전달로 흡수된 중복 레코드 수 (counter)
pub const INDEXER_DUPLICATES_TOTAL: &str = "logsift_indexer_duplicates_total";

/// Indexer: 쓰기 재시도 수 (counter)
pub const INDEXER_WRITE_RETRIES_TOTAL: &str = "logsift_indexer_write_retries_total";

/// Indexer: 배치 커밋 소요 시간 (histogram, 초)
pub const INDEXER_COMMIT_DURATION_SECONDS: &str = "logsift_indexer_commit_duration_seconds";

// ─── Dead letter 메트릭 ─────────────────────────────────────────────

/// Dead letter: 적재된 엔트리 수 (counter, label: reason)
pub const DEAD_LETTERS_TOTAL: &str = "logsift_dead_letters_total";

/// Dead letter: 보존 정책으로 제거된 엔트리 수 (counter)
pub const DEAD_LETTERS_EVICTED_TOTAL: &str = "logsift_dead_letters_evicted_total";

/// Dead letter: 재처리에 성공한 엔트리 수 (counter)
pub const DEAD_LETTERS_REPLAYED_TOTAL: &str = "logsift_dead_letters_replayed_total";

/// Dead letter: 기록에 실패해 버려진 라인 수 (counter, label: stage)
pub const DEAD_LETTERS_DROPPED_TOTAL: &str = "logsift_dead_letters_dropped_total";

// ─── Daemon 메트릭 ──────────────────────────────────────────────────

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "logsift_daemon_uptime_seconds";

// ─── 히스토그램 버킷 정의 ────────────────────────────────────────────

/// 배치 처리 지연 시간 히스토그램 버킷 (초)
///
/// 100us ~ 10s 범위
pub const BATCH_DURATION_BUCKETS: [f64; 10] = [
    0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 10.0,
];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    // Reader
    describe_counter!(READER_LINES_TOTAL, "Total number of raw lines emitted by file readers");
    describe_counter!(READER_BYTES_TOTAL, "Total number of bytes claimed by file readers");
    describe_counter!(
        READER_FILE_ERRORS_TOTAL,
        "Total number of source files that failed with an I/O error"
    );

    // Parser
    describe_counter!(
        PARSER_RECORDS_TOTAL,
        "Total number of lines parsed into typed records, by log type"
    );
    describe_histogram!(
        PARSER_BATCH_DURATION_SECONDS,
        "Time to classify and parse one raw batch in seconds"
    );

    // Batcher / Queue
    describe_counter!(
        BATCHES_FLUSHED_TOTAL,
        "Total number of batches flushed, by stage and trigger"
    );
    describe_counter!(QUEUE_RETRIES_TOTAL, "Total number of retried enqueue attempts");
    describe_gauge!(QUEUE_DEPTH, "Number of batches waiting in the queue");
    describe_counter!(
        QUEUE_BACKPRESSURE_WAITS_TOTAL,
        "Total number of times a producer waited for queue depth to drop"
    );

    // Indexer
    describe_counter!(
        INDEXER_RECORDS_WRITTEN_TOTAL,
        "Total number of records durably written, by log type"
    );
    describe_counter!(
        INDEXER_DUPLICATES_TOTAL,
        "Total number of redelivered records absorbed by the uniqueness constraint"
    );
    describe_counter!(INDEXER_WRITE_RETRIES_TOTAL, "Total number of retried batch writes");
    describe_histogram!(
        INDEXER_COMMIT_DURATION_SECONDS,
        "Time to commit one parsed batch in seconds"
    );

    // Dead letter
    describe_counter!(DEAD_LETTERS_TOTAL, "Total number of dead-lettered lines, by reason");
    describe_counter!(
        DEAD_LETTERS_EVICTED_TOTAL,
        "Total number of dead-letter entries removed by the retention policy"
    );
    describe_counter!(
        DEAD_LETTERS_REPLAYED_TOTAL,
        "Total number of dead-letter entries successfully reprocessed"
    );
    describe_counter!(
        DEAD_LETTERS_DROPPED_TOTAL,
        "Total number of lines dropped after dead-letter writes kept failing, by stage"
    );

    // Daemon
    describe_gauge!(DAEMON_UPTIME_SECONDS, "logsift daemon uptime in seconds");
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_METRIC_NAMES: &[&str] = &[
        READER_LINES_TOTAL,
        READER_BYTES_TOTAL,
        READER_FILE_ERRORS_TOTAL,
        PARSER_RECORDS_TOTAL,
        PARSER_BATCH_DURATION_SECONDS,
        BATCHES_FLUSHED_TOTAL,
        QUEUE_RETRIES_TOTAL,
        QUEUE_DEPTH,
        QUEUE_BACKPRESSURE_WAITS_TOTAL,
        INDEXER_RECORDS_WRITTEN_TOTAL,
        INDEXER_DUPLICATES_TOTAL,
        INDEXER_WRITE_RETRIES_TOTAL,
        INDEXER_COMMIT_DURATION_SECONDS,
        DEAD_LETTERS_TOTAL,
        DEAD_LETTERS_EVICTED_TOTAL,
        DEAD_LETTERS_REPLAYED_TOTAL,
        DEAD_LETTERS_DROPPED_TOTAL,
        DAEMON_UPTIME_SECONDS,
    ];

    #[test]
    fn all_metrics_start_with_logsift_prefix() {
        for name in ALL_METRIC_NAMES {
            assert!(
                name.starts_with("logsift_"),
                "Metric '{}' does not start with 'logsift_' prefix",
                name
            );
        }
    }

    #[test]
    fn counters_end_with_total() {
        for name in ALL_METRIC_NAMES {
            if name.contains("seconds") || *name == QUEUE_DEPTH {
                continue;
            }
            assert!(name.ends_with("_total"), "counter '{}' should end with _total", name);
        }
    }

    #[test]
    fn describe_all_does_not_panic() {
        describe_all();
    }

    #[test]
    fn batch_duration_buckets_are_sorted() {
        let buckets = BATCH_DURATION_BUCKETS;
        for i in 1..buckets.len() {
            assert!(buckets[i] > buckets[i - 1]);
        }
    }
}
