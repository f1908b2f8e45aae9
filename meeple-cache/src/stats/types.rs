//! Statistics records and the aggregated view

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether an access was served from cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessOutcome {
    Hit,
    Miss,
}

impl AccessOutcome {
    pub fn from_hit(is_hit: bool) -> Self {
        if is_hit {
            AccessOutcome::Hit
        } else {
            AccessOutcome::Miss
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, AccessOutcome::Hit)
    }
}

/// One access to record against a `(domain_id, fingerprint)` counter row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatAccess {
    pub domain_id: String,
    pub fingerprint: String,
    /// Normalised query text, kept on first access for display
    pub sample_query: Option<String>,
    pub outcome: AccessOutcome,
    pub at: DateTime<Utc>,
}

impl StatAccess {
    pub fn new(
        domain_id: impl Into<String>,
        fingerprint: impl Into<String>,
        outcome: AccessOutcome,
    ) -> Self {
        Self {
            domain_id: domain_id.into(),
            fingerprint: fingerprint.into(),
            sample_query: None,
            outcome,
            at: Utc::now(),
        }
    }

    pub fn with_sample_query(mut self, query: impl Into<String>) -> Self {
        self.sample_query = Some(query.into());
        self
    }

    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }
}

/// Durable hit/miss counters for one query fingerprint within a domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatRecord {
    pub domain_id: String,
    pub fingerprint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_query: Option<String>,
    pub hit_count: u64,
    pub miss_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_hit_at: Option<DateTime<Utc>>,
}

impl CacheStatRecord {
    /// Fresh record for a first access
    pub fn first(access: &StatAccess) -> Self {
        let is_hit = access.outcome.is_hit();
        Self {
            domain_id: access.domain_id.clone(),
            fingerprint: access.fingerprint.clone(),
            sample_query: access.sample_query.clone(),
            hit_count: u64::from(is_hit),
            miss_count: u64::from(!is_hit),
            created_at: access.at,
            last_hit_at: is_hit.then_some(access.at),
        }
    }

    /// Apply a subsequent access; misses never touch `last_hit_at`
    pub fn apply(&mut self, access: &StatAccess) {
        match access.outcome {
            AccessOutcome::Hit => {
                self.hit_count += 1;
                self.last_hit_at = Some(access.at);
            }
            AccessOutcome::Miss => self.miss_count += 1,
        }
        if self.sample_query.is_none() {
            self.sample_query = access.sample_query.clone();
        }
    }

    pub fn hit_rate(&self) -> f64 {
        hit_rate(self.hit_count, self.miss_count)
    }
}

/// Summed counters across a scope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTotals {
    pub hits: u64,
    pub misses: u64,
}

/// Point-in-time cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub total_hits: u64,
    pub total_misses: u64,
    /// Ratio in `0.0..=1.0`; 0 when there were no accesses
    pub hit_rate: f64,
    pub total_keys: u64,
    pub cache_size_bytes: u64,
    pub top_questions: Vec<CacheStatRecord>,
}

impl CacheStats {
    pub fn from_parts(
        totals: AccessTotals,
        footprint: CacheFootprint,
        top: Vec<CacheStatRecord>,
    ) -> Self {
        Self {
            total_hits: totals.hits,
            total_misses: totals.misses,
            hit_rate: hit_rate(totals.hits, totals.misses),
            total_keys: footprint.keys,
            cache_size_bytes: footprint.bytes,
            top_questions: top,
        }
    }
}

/// Live entries and their serialized size at one point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheFootprint {
    pub keys: u64,
    pub bytes: u64,
}

/// `hits / (hits + misses)`, 0 when both are 0
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        assert_eq!(hit_rate(0, 0), 0.0);
        assert_eq!(hit_rate(3, 1), 0.75);
        assert_eq!(hit_rate(0, 5), 0.0);
        assert_eq!(hit_rate(5, 0), 1.0);
    }

    #[test]
    fn test_first_access() {
        let hit = CacheStatRecord::first(&StatAccess::new("chess", "fp", AccessOutcome::Hit));
        assert_eq!((hit.hit_count, hit.miss_count), (1, 0));
        assert!(hit.last_hit_at.is_some());

        let miss = CacheStatRecord::first(&StatAccess::new("chess", "fp", AccessOutcome::Miss));
        assert_eq!((miss.hit_count, miss.miss_count), (0, 1));
        assert!(miss.last_hit_at.is_none());
    }

    #[test]
    fn test_miss_keeps_last_hit_at() {
        let first = StatAccess::new("chess", "fp", AccessOutcome::Hit);
        let mut record = CacheStatRecord::first(&first);
        let last_hit = record.last_hit_at;

        let miss_at = first.at + chrono::Duration::seconds(10);
        record.apply(&StatAccess::new("chess", "fp", AccessOutcome::Miss).at(miss_at));
        assert_eq!(record.last_hit_at, last_hit);
        assert_eq!(record.miss_count, 1);

        let later = first.at + chrono::Duration::seconds(20);
        record.apply(&StatAccess::new("chess", "fp", AccessOutcome::Hit).at(later));
        assert_eq!(record.last_hit_at, Some(later));
        assert_eq!(record.hit_count, 2);
    }

    #[test]
    fn test_stats_serialize_camel_case() {
        let stats = CacheStats::from_parts(
            AccessTotals { hits: 1, misses: 1 },
            CacheFootprint { keys: 2, bytes: 64 },
            Vec::new(),
        );
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["totalHits"], 1);
        assert_eq!(json["hitRate"], 0.5);
        assert_eq!(json["cacheSizeBytes"], 64);
        assert!(json["topQuestions"].as_array().unwrap().is_empty());
    }
}
