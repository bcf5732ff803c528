//! PostgreSQL 레코드 저장소
//!
//! 배치 하나를 트랜잭션 하나로 기록합니다. 유형별로 나눠 `QueryBuilder::push_values`로
//! 다중 행 INSERT를 만들고, `ON CONFLICT (source_file, byte_offset) DO NOTHING`으로
//! 재전달된 레코드를 흡수합니다. 주소 컬럼은 `INET`이며 텍스트로 바인딩해 캐스팅하고
//! `host()`로 읽어옵니다.

use std::collections::BTreeMap;
use std::net::IpAddr;

use logsift_core::types::{
    AuthEvent, AuthStatus, DnsEvent, FirewallEvent, LogEvent, LogType, ParsedRecord,
};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder, Row};

use super::{
    AddressCount, AddressPair, HourlyVolume, RecordStore, StoredEvent, TimeWindow, UsernameCount,
    WriteSummary, receipt_for,
};
use crate::batcher::Batch;
use crate::bookkeeper::CommitReceipt;
use crate::error::IngestError;
use crate::pg::{from_i32, from_i64, storage_error, to_i32, to_i64};

/// INSERT 한 번에 넣는 최대 행 수 (바인드 파라미터 한도 65535 이내)
const ROWS_PER_INSERT: usize = 1000;

const FIREWALL_COLUMNS: &str = "source_file, byte_offset, event_time, action, \
     host(src_ip) AS src_ip, host(dst_ip) AS dst_ip, src_port, dst_port, protocol, bytes, rule, extra";

const DNS_COLUMNS: &str = "source_file, byte_offset, event_time, host(client_ip) AS client_ip, \
     query_domain, query_class, query_type, host(server_ip) AS server_ip, response_code";

const AUTH_COLUMNS: &str = "source_file, byte_offset, event_time, hostname, process, pid, status, \
     auth_method, username, host(source_ip) AS source_ip, source_port, message";

/// PostgreSQL 기반 레코드 저장소
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// 새 저장소 핸들을 생성합니다.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl RecordStore for PgStore {
    async fn write_batch(
        &self,
        batch: &Batch<ParsedRecord>,
    ) -> Result<(WriteSummary, CommitReceipt), IngestError> {
        let mut firewall = Vec::new();
        let mut dns = Vec::new();
        let mut auth = Vec::new();
        for record in &batch.items {
            match &record.event {
                LogEvent::Firewall(fw) => firewall.push((record, fw)),
                LogEvent::Dns(d) => dns.push((record, d)),
                LogEvent::Auth(a) => auth.push((record, a)),
            }
        }

        let mut summary = WriteSummary::default();
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        for chunk in firewall.chunks(ROWS_PER_INSERT) {
            let inserted = insert_firewall(&mut tx, chunk).await?;
            summary.record(LogType::Firewall, inserted, chunk.len() as u64);
        }
        for chunk in dns.chunks(ROWS_PER_INSERT) {
            let inserted = insert_dns(&mut tx, chunk).await?;
            summary.record(LogType::Dns, inserted, chunk.len() as u64);
        }
        for chunk in auth.chunks(ROWS_PER_INSERT) {
            let inserted = insert_auth(&mut tx, chunk).await?;
            summary.record(LogType::Auth, inserted, chunk.len() as u64);
        }
        tx.commit().await.map_err(storage_error)?;

        Ok((summary, receipt_for(batch)))
    }

    async fn firewall_by_address(
        &self,
        address: IpAddr,
        window: TimeWindow,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, IngestError> {
        let sql = format!(
            "SELECT {FIREWALL_COLUMNS} FROM firewall_events \
             WHERE (src_ip = $1::inet OR dst_ip = $1::inet) \
               AND event_time >= $2 AND event_time < $3 \
             ORDER BY event_time, source_file, byte_offset LIMIT $4"
        );
        let rows = sqlx::query(&sql)
            .bind(address.to_string())
            .bind(window.start)
            .bind(window.end)
            .bind(limit_param(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;
        rows.iter().map(firewall_from_row).collect()
    }

    async fn dns_by_domain(&self, domain: &str, limit: usize) -> Result<Vec<StoredEvent>, IngestError> {
        let sql = format!(
            "SELECT {DNS_COLUMNS} FROM dns_events WHERE query_domain = $1 \
             ORDER BY event_time, source_file, byte_offset LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(domain)
            .bind(limit_param(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;
        rows.iter().map(dns_from_row).collect()
    }

    async fn auth_by_status_and_address(
        &self,
        status: AuthStatus,
        address: IpAddr,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, IngestError> {
        let sql = format!(
            "SELECT {AUTH_COLUMNS} FROM auth_events WHERE status = $1 AND source_ip = $2::inet \
             ORDER BY event_time, source_file, byte_offset LIMIT $3"
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(address.to_string())
            .bind(limit_param(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;
        rows.iter().map(auth_from_row).collect()
    }

    async fn hourly_volume(&self, window: TimeWindow) -> Result<Vec<HourlyVolume>, IngestError> {
        let rows = sqlx::query(
            r#"
            SELECT hour, log_type, SUM(n)::BIGINT AS count FROM (
                SELECT date_trunc('hour', event_time, 'UTC') AS hour, 'firewall' AS log_type, COUNT(*) AS n
                FROM firewall_events WHERE event_time >= $1 AND event_time < $2 GROUP BY 1
                UNION ALL
                SELECT date_trunc('hour', event_time, 'UTC'), 'dns', COUNT(*)
                FROM dns_events WHERE event_time >= $1 AND event_time < $2 GROUP BY 1
                UNION ALL
                SELECT date_trunc('hour', event_time, 'UTC'), 'auth', COUNT(*)
                FROM auth_events WHERE event_time >= $1 AND event_time < $2 GROUP BY 1
            ) buckets
            GROUP BY hour, log_type
            ORDER BY hour
            "#,
        )
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        let mut volume = rows
            .iter()
            .map(|row| {
                let log_type: String = row.try_get("log_type").map_err(storage_error)?;
                Ok(HourlyVolume {
                    hour: row.try_get("hour").map_err(storage_error)?,
                    log_type: log_type.parse().map_err(IngestError::StorageWrite)?,
                    count: from_i64(row.try_get("count").map_err(storage_error)?, "count")?,
                })
            })
            .collect::<Result<Vec<_>, IngestError>>()?;
        // LogType 순서(firewall, dns, auth)로 정렬
        volume.sort_by(|a, b| (a.hour, a.log_type).cmp(&(b.hour, b.log_type)));
        Ok(volume)
    }

    async fn top_source_addresses(
        &self,
        window: TimeWindow,
        n: usize,
    ) -> Result<Vec<AddressCount>, IngestError> {
        let rows = sqlx::query(
            r#"
            SELECT host(src_ip) AS address, COUNT(*) AS count
            FROM firewall_events
            WHERE event_time >= $1 AND event_time < $2
            GROUP BY src_ip
            ORDER BY count DESC, src_ip
            LIMIT $3
            "#,
        )
        .bind(window.start)
        .bind(window.end)
        .bind(limit_param(n))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;
        rows.iter()
            .map(|row| {
                Ok(AddressCount {
                    address: ip_column(row, "address")?,
                    count: from_i64(row.try_get("count").map_err(storage_error)?, "count")?,
                })
            })
            .collect()
    }

    async fn lateral_movement(&self, dst_port: u16, n: usize) -> Result<Vec<AddressPair>, IngestError> {
        let rows = sqlx::query(
            r#"
            SELECT host(src_ip) AS src_ip, host(dst_ip) AS dst_ip, COUNT(*) AS count
            FROM firewall_events
            WHERE dst_port = $1
            GROUP BY src_ip, dst_ip
            ORDER BY count DESC, src_ip, dst_ip
            LIMIT $2
            "#,
        )
        .bind(i32::from(dst_port))
        .bind(limit_param(n))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;
        rows.iter()
            .map(|row| {
                Ok(AddressPair {
                    src_ip: ip_column(row, "src_ip")?,
                    dst_ip: ip_column(row, "dst_ip")?,
                    count: from_i64(row.try_get("count").map_err(storage_error)?, "count")?,
                })
            })
            .collect()
    }

    async fn top_failed_usernames(&self, n: usize) -> Result<Vec<UsernameCount>, IngestError> {
        let rows = sqlx::query(
            r#"
            SELECT username, COUNT(*) AS count
            FROM auth_events
            WHERE status = 'Failed'
            GROUP BY username
            ORDER BY count DESC, username
            LIMIT $1
            "#,
        )
        .bind(limit_param(n))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;
        rows.iter()
            .map(|row| {
                Ok(UsernameCount {
                    username: row.try_get("username").map_err(storage_error)?,
                    count: from_i64(row.try_get("count").map_err(storage_error)?, "count")?,
                })
            })
            .collect()
    }

    async fn count_by_type(&self) -> Result<BTreeMap<LogType, u64>, IngestError> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM firewall_events) AS firewall,
                (SELECT COUNT(*) FROM dns_events) AS dns,
                (SELECT COUNT(*) FROM auth_events) AS auth
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(storage_error)?;
        LogType::ALL
            .into_iter()
            .map(|t| {
                let count: i64 = row.try_get(t.as_str()).map_err(storage_error)?;
                Ok((t, from_i64(count, "count")?))
            })
            .collect()
    }
}

async fn insert_firewall(
    conn: &mut PgConnection,
    rows: &[(&ParsedRecord, &FirewallEvent)],
) -> Result<u64, IngestError> {
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO firewall_events (source_file, byte_offset, event_time, action, src_ip, dst_ip, \
         src_port, dst_port, protocol, bytes, rule, extra) ",
    );
    let numbers = rows
        .iter()
        .map(|(record, fw)| {
            Ok((
                to_i64(record.byte_offset, "byte_offset")?,
                fw.bytes.map(|b| to_i64(b, "bytes")).transpose()?,
            ))
        })
        .collect::<Result<Vec<_>, IngestError>>()?;
    qb.push_values(rows.iter().zip(numbers), |mut b, ((record, fw), (offset, bytes))| {
        b.push_bind(record.source_file.as_str())
            .push_bind(offset)
            .push_bind(record.timestamp)
            .push_bind(fw.action.as_str())
            .push_bind(fw.src_ip.to_string())
            .push_unseparated("::inet")
            .push_bind(fw.dst_ip.to_string())
            .push_unseparated("::inet")
            .push_bind(fw.src_port.map(i32::from))
            .push_bind(fw.dst_port.map(i32::from))
            .push_bind(fw.protocol.as_deref())
            .push_bind(bytes)
            .push_bind(fw.rule.as_deref())
            .push_bind(Json(&fw.extra));
    });
    qb.push(" ON CONFLICT (source_file, byte_offset) DO NOTHING");
    let result = qb.build().execute(conn).await.map_err(storage_error)?;
    Ok(result.rows_affected())
}

async fn insert_dns(
    conn: &mut PgConnection,
    rows: &[(&ParsedRecord, &DnsEvent)],
) -> Result<u64, IngestError> {
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO dns_events (source_file, byte_offset, event_time, client_ip, query_domain, \
         query_class, query_type, server_ip, response_code) ",
    );
    let offsets = rows
        .iter()
        .map(|(record, _)| to_i64(record.byte_offset, "byte_offset"))
        .collect::<Result<Vec<_>, IngestError>>()?;
    qb.push_values(rows.iter().zip(offsets), |mut b, ((record, dns), offset)| {
        b.push_bind(record.source_file.as_str())
            .push_bind(offset)
            .push_bind(record.timestamp)
            .push_bind(dns.client_ip.map(|ip| ip.to_string()))
            .push_unseparated("::inet")
            .push_bind(dns.query_domain.as_str())
            .push_bind(dns.query_class.as_deref())
            .push_bind(dns.query_type.as_deref())
            .push_bind(dns.server_ip.map(|ip| ip.to_string()))
            .push_unseparated("::inet")
            .push_bind(dns.response_code.as_deref());
    });
    qb.push(" ON CONFLICT (source_file, byte_offset) DO NOTHING");
    let result = qb.build().execute(conn).await.map_err(storage_error)?;
    Ok(result.rows_affected())
}

async fn insert_auth(
    conn: &mut PgConnection,
    rows: &[(&ParsedRecord, &AuthEvent)],
) -> Result<u64, IngestError> {
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO auth_events (source_file, byte_offset, event_time, hostname, process, pid, \
         status, auth_method, username, source_ip, source_port, message) ",
    );
    let numbers = rows
        .iter()
        .map(|(record, auth)| {
            Ok((
                to_i64(record.byte_offset, "byte_offset")?,
                to_i32(auth.pid, "pid")?,
            ))
        })
        .collect::<Result<Vec<_>, IngestError>>()?;
    qb.push_values(rows.iter().zip(numbers), |mut b, ((record, auth), (offset, pid))| {
        b.push_bind(record.source_file.as_str())
            .push_bind(offset)
            .push_bind(record.timestamp)
            .push_bind(auth.hostname.as_str())
            .push_bind(auth.process.as_str())
            .push_bind(pid)
            .push_bind(auth.status.as_str())
            .push_bind(auth.auth_method.as_deref())
            .push_bind(auth.username.as_str())
            .push_bind(auth.source_ip.to_string())
            .push_unseparated("::inet")
            .push_bind(auth.source_port.map(i32::from))
            .push_bind(auth.message.as_str());
    });
    qb.push(" ON CONFLICT (source_file, byte_offset) DO NOTHING");
    let result = qb.build().execute(conn).await.map_err(storage_error)?;
    Ok(result.rows_affected())
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn ip_column(row: &PgRow, column: &str) -> Result<IpAddr, IngestError> {
    let text: String = row.try_get(column).map_err(storage_error)?;
    text.parse()
        .map_err(|_| IngestError::StorageWrite(format!("invalid address in column {column}: '{text}'")))
}

fn opt_ip_column(row: &PgRow, column: &str) -> Result<Option<IpAddr>, IngestError> {
    let text: Option<String> = row.try_get(column).map_err(storage_error)?;
    text.map(|t| {
        t.parse()
            .map_err(|_| IngestError::StorageWrite(format!("invalid address in column {column}: '{t}'")))
    })
    .transpose()
}

fn port_column(row: &PgRow, column: &str) -> Result<Option<u16>, IngestError> {
    let port: Option<i32> = row.try_get(column).map_err(storage_error)?;
    Ok(port.and_then(|p| u16::try_from(p).ok()))
}

fn stored(row: &PgRow, event: LogEvent) -> Result<StoredEvent, IngestError> {
    Ok(StoredEvent {
        source_file: row.try_get("source_file").map_err(storage_error)?,
        byte_offset: from_i64(row.try_get("byte_offset").map_err(storage_error)?, "byte_offset")?,
        timestamp: row.try_get("event_time").map_err(storage_error)?,
        event,
    })
}

fn firewall_from_row(row: &PgRow) -> Result<StoredEvent, IngestError> {
    let bytes: Option<i64> = row.try_get("bytes").map_err(storage_error)?;
    let extra: Json<BTreeMap<String, String>> = row.try_get("extra").map_err(storage_error)?;
    let event = FirewallEvent {
        action: row.try_get("action").map_err(storage_error)?,
        src_ip: ip_column(row, "src_ip")?,
        dst_ip: ip_column(row, "dst_ip")?,
        src_port: port_column(row, "src_port")?,
        dst_port: port_column(row, "dst_port")?,
        protocol: row.try_get("protocol").map_err(storage_error)?,
        bytes: bytes.map(|b| from_i64(b, "bytes")).transpose()?,
        rule: row.try_get("rule").map_err(storage_error)?,
        extra: extra.0,
    };
    stored(row, LogEvent::Firewall(event))
}

fn dns_from_row(row: &PgRow) -> Result<StoredEvent, IngestError> {
    let event = DnsEvent {
        client_ip: opt_ip_column(row, "client_ip")?,
        query_domain: row.try_get("query_domain").map_err(storage_error)?,
        query_class: row.try_get("query_class").map_err(storage_error)?,
        query_type: row.try_get("query_type").map_err(storage_error)?,
        server_ip: opt_ip_column(row, "server_ip")?,
        response_code: row.try_get("response_code").map_err(storage_error)?,
    };
    stored(row, LogEvent::Dns(event))
}

fn auth_from_row(row: &PgRow) -> Result<StoredEvent, IngestError> {
    let status: String = row.try_get("status").map_err(storage_error)?;
    let pid: i32 = row.try_get("pid").map_err(storage_error)?;
    let event = AuthEvent {
        hostname: row.try_get("hostname").map_err(storage_error)?,
        process: row.try_get("process").map_err(storage_error)?,
        pid: from_i32(pid, "pid")?,
        status: status.parse().map_err(IngestError::StorageWrite)?,
        auth_method: row.try_get("auth_method").map_err(storage_error)?,
        username: row.try_get("username").map_err(storage_error)?,
        source_ip: ip_column(row, "source_ip")?,
        source_port: port_column(row, "source_port")?,
        message: row.try_get("message").map_err(storage_error)?,
    };
    stored(row, LogEvent::Auth(event))
}
