//! 인메모리 레코드 저장소

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DurationRound, TimeDelta};
use logsift_core::types::{AuthStatus, LogEvent, LogType, ParsedRecord};
use tokio::sync::Mutex;

use super::{
    AddressCount, AddressPair, HourlyVolume, RecordStore, StoredEvent, TimeWindow, UsernameCount,
    WriteSummary, receipt_for,
};
use crate::batcher::Batch;
use crate::bookkeeper::CommitReceipt;
use crate::error::IngestError;

type Table = BTreeMap<(String, u64), StoredEvent>;

#[derive(Default)]
struct Tables {
    firewall: Table,
    dns: Table,
    auth: Table,
}

impl Tables {
    fn table_mut(&mut self, log_type: LogType) -> &mut Table {
        match log_type {
            LogType::Firewall => &mut self.firewall,
            LogType::Dns => &mut self.dns,
            LogType::Auth => &mut self.auth,
        }
    }

    fn table(&self, log_type: LogType) -> &Table {
        match log_type {
            LogType::Firewall => &self.firewall,
            LogType::Dns => &self.dns,
            LogType::Auth => &self.auth,
        }
    }
}

/// 프로세스 수명 동안 유지되는 레코드 저장소
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    /// 빈 저장소를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_limited(mut events: Vec<StoredEvent>, limit: usize) -> Vec<StoredEvent> {
    events.sort_by(|a, b| {
        (a.timestamp, &a.source_file, a.byte_offset).cmp(&(b.timestamp, &b.source_file, b.byte_offset))
    });
    events.truncate(limit);
    events
}

fn top_n<K: Ord + Clone>(counts: HashMap<K, u64>, n: usize) -> Vec<(K, u64)> {
    let mut ranked: Vec<(K, u64)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| (Reverse(a.1), &a.0).cmp(&(Reverse(b.1), &b.0)));
    ranked.truncate(n);
    ranked
}

impl RecordStore for MemoryStore {
    async fn write_batch(
        &self,
        batch: &Batch<ParsedRecord>,
    ) -> Result<(WriteSummary, CommitReceipt), IngestError> {
        let mut tables = self.tables.lock().await;
        let mut summary = WriteSummary::default();
        for record in &batch.items {
            let key = (record.source_file.clone(), record.byte_offset);
            let table = tables.table_mut(record.log_type());
            let inserted = if table.contains_key(&key) {
                0
            } else {
                table.insert(key, StoredEvent::from(record));
                1
            };
            summary.record(record.log_type(), inserted, 1);
        }
        Ok((summary, receipt_for(batch)))
    }

    async fn firewall_by_address(
        &self,
        address: IpAddr,
        window: TimeWindow,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, IngestError> {
        let tables = self.tables.lock().await;
        let events = tables
            .firewall
            .values()
            .filter(|e| window.contains(&e.timestamp))
            .filter(|e| match &e.event {
                LogEvent::Firewall(fw) => fw.src_ip == address || fw.dst_ip == address,
                _ => false,
            })
            .cloned()
            .collect();
        Ok(sorted_limited(events, limit))
    }

    async fn dns_by_domain(&self, domain: &str, limit: usize) -> Result<Vec<StoredEvent>, IngestError> {
        let tables = self.tables.lock().await;
        let events = tables
            .dns
            .values()
            .filter(|e| matches!(&e.event, LogEvent::Dns(dns) if dns.query_domain == domain))
            .cloned()
            .collect();
        Ok(sorted_limited(events, limit))
    }

    async fn auth_by_status_and_address(
        &self,
        status: AuthStatus,
        address: IpAddr,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, IngestError> {
        let tables = self.tables.lock().await;
        let events = tables
            .auth
            .values()
            .filter(|e| {
                matches!(&e.event, LogEvent::Auth(auth)
                    if auth.status == status && auth.source_ip == address)
            })
            .cloned()
            .collect();
        Ok(sorted_limited(events, limit))
    }

    async fn hourly_volume(&self, window: TimeWindow) -> Result<Vec<HourlyVolume>, IngestError> {
        let tables = self.tables.lock().await;
        let mut buckets = BTreeMap::new();
        for log_type in LogType::ALL {
            for event in tables.table(log_type).values() {
                if !window.contains(&event.timestamp) {
                    continue;
                }
                let hour = event
                    .timestamp
                    .duration_trunc(TimeDelta::hours(1))
                    .map_err(|e| IngestError::StorageWrite(e.to_string()))?;
                *buckets.entry((hour, log_type)).or_insert(0u64) += 1;
            }
        }
        Ok(buckets
            .into_iter()
            .map(|((hour, log_type), count)| HourlyVolume {
                hour,
                log_type,
                count,
            })
            .collect())
    }

    async fn top_source_addresses(
        &self,
        window: TimeWindow,
        n: usize,
    ) -> Result<Vec<AddressCount>, IngestError> {
        let tables = self.tables.lock().await;
        let mut counts = HashMap::new();
        for event in tables.firewall.values() {
            if let LogEvent::Firewall(fw) = &event.event
                && window.contains(&event.timestamp)
            {
                *counts.entry(fw.src_ip).or_insert(0) += 1;
            }
        }
        Ok(top_n(counts, n)
            .into_iter()
            .map(|(address, count)| AddressCount { address, count })
            .collect())
    }

    async fn lateral_movement(&self, dst_port: u16, n: usize) -> Result<Vec<AddressPair>, IngestError> {
        let tables = self.tables.lock().await;
        let mut counts = HashMap::new();
        for event in tables.firewall.values() {
            if let LogEvent::Firewall(fw) = &event.event
                && fw.dst_port == Some(dst_port)
            {
                *counts.entry((fw.src_ip, fw.dst_ip)).or_insert(0) += 1;
            }
        }
        Ok(top_n(counts, n)
            .into_iter()
            .map(|((src_ip, dst_ip), count)| AddressPair {
                src_ip,
                dst_ip,
                count,
            })
            .collect())
    }

    async fn top_failed_usernames(&self, n: usize) -> Result<Vec<UsernameCount>, IngestError> {
        let tables = self.tables.lock().await;
        let mut counts = HashMap::new();
        for event in tables.auth.values() {
            if let LogEvent::Auth(auth) = &event.event
                && auth.status == AuthStatus::Failed
            {
                *counts.entry(auth.username.clone()).or_insert(0) += 1;
            }
        }
        Ok(top_n(counts, n)
            .into_iter()
            .map(|(username, count)| UsernameCount { username, count })
            .collect())
    }

    async fn count_by_type(&self) -> Result<BTreeMap<LogType, u64>, IngestError> {
        let tables = self.tables.lock().await;
        Ok(LogType::ALL
            .into_iter()
            .map(|t| (t, tables.table(t).len() as u64))
            .collect())
    }
}
