//! Durable storage seam for statistics

use crate::error::Result;
use crate::stats::types::{AccessTotals, CacheStatRecord, StatAccess};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Store of `(domain_id, fingerprint)` counter rows
#[async_trait]
pub trait StatsRepository: Send + Sync {
    /// Insert-or-increment in one atomic step; never read-then-write
    async fn upsert_access(&self, access: &StatAccess) -> Result<()>;

    /// Summed counters, optionally for one domain
    async fn totals(&self, domain_id: Option<&str>) -> Result<AccessTotals>;

    /// Most-hit records: `hit_count` descending, ties to the most recent hit
    async fn top(&self, domain_id: Option<&str>, limit: usize) -> Result<Vec<CacheStatRecord>>;

    fn name(&self) -> &'static str;
}

/// Ordering used for hot-query ranking
pub fn rank(a: &CacheStatRecord, b: &CacheStatRecord) -> Ordering {
    b.hit_count
        .cmp(&a.hit_count)
        .then_with(|| b.last_hit_at.cmp(&a.last_hit_at))
        .then_with(|| a.fingerprint.cmp(&b.fingerprint))
}

/// In-process repository; the write lock makes each upsert atomic
#[derive(Clone, Default)]
pub struct MemoryStatsRepository {
    records: Arc<RwLock<HashMap<(String, String), CacheStatRecord>>>,
}

impl MemoryStatsRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record for one fingerprint, if any
    pub async fn record(&self, domain_id: &str, fingerprint: &str) -> Option<CacheStatRecord> {
        let records = self.records.read().await;
        records
            .get(&(domain_id.to_string(), fingerprint.to_string()))
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl StatsRepository for MemoryStatsRepository {
    async fn upsert_access(&self, access: &StatAccess) -> Result<()> {
        let mut records = self.records.write().await;
        records
            .entry((access.domain_id.clone(), access.fingerprint.clone()))
            .and_modify(|record| record.apply(access))
            .or_insert_with(|| CacheStatRecord::first(access));
        Ok(())
    }

    async fn totals(&self, domain_id: Option<&str>) -> Result<AccessTotals> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|record| domain_id.map_or(true, |id| record.domain_id == id))
            .fold(AccessTotals::default(), |acc, record| AccessTotals {
                hits: acc.hits + record.hit_count,
                misses: acc.misses + record.miss_count,
            }))
    }

    async fn top(&self, domain_id: Option<&str>, limit: usize) -> Result<Vec<CacheStatRecord>> {
        let records = self.records.read().await;
        let mut matching: Vec<CacheStatRecord> = records
            .values()
            .filter(|record| domain_id.map_or(true, |id| record.domain_id == id))
            .cloned()
            .collect();
        matching.sort_by(rank);
        matching.truncate(limit);
        Ok(matching)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
