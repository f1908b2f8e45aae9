//! Neo4j-backed statistics repository
//!
//! One `:CacheStat` node per `(domain_id, fingerprint)`, guarded by a
//! composite uniqueness constraint. Timestamps are stored as fixed-width
//! RFC 3339 strings so string order is time order.

use crate::connection::Neo4jClient;
use crate::error::{CacheError, Result};
use crate::stats::repository::StatsRepository;
use crate::stats::types::{AccessTotals, CacheStatRecord, StatAccess};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use neo4rs::{query, Query, Row};
use std::sync::Arc;
use tracing::{debug, info};

const CREATE_CONSTRAINT: &str = "CREATE CONSTRAINT cache_stat_key IF NOT EXISTS \
     FOR (s:CacheStat) REQUIRE (s.domain_id, s.fingerprint) IS UNIQUE";

const UPSERT_ACCESS: &str = "MERGE (s:CacheStat {domain_id: $domain_id, fingerprint: $fingerprint}) \
     ON CREATE SET s.hit_count = $hits, \
                   s.miss_count = $misses, \
                   s.created_at = $at, \
                   s.last_hit_at = CASE WHEN $hits > 0 THEN $at ELSE null END, \
                   s.sample_query = CASE WHEN $sample_query = '' THEN null ELSE $sample_query END \
     ON MATCH SET s.hit_count = s.hit_count + $hits, \
                  s.miss_count = s.miss_count + $misses, \
                  s.last_hit_at = CASE WHEN $hits > 0 THEN $at ELSE s.last_hit_at END, \
                  s.sample_query = coalesce(s.sample_query, \
                      CASE WHEN $sample_query = '' THEN null ELSE $sample_query END)";

const TOTALS_ALL: &str = "MATCH (s:CacheStat) \
     RETURN coalesce(sum(s.hit_count), 0) AS hits, coalesce(sum(s.miss_count), 0) AS misses";

const TOTALS_DOMAIN: &str = "MATCH (s:CacheStat {domain_id: $domain_id}) \
     RETURN coalesce(sum(s.hit_count), 0) AS hits, coalesce(sum(s.miss_count), 0) AS misses";

const TOP_PROJECTION: &str = "RETURN s.domain_id AS domain_id, \
            s.fingerprint AS fingerprint, \
            coalesce(s.sample_query, '') AS sample_query, \
            s.hit_count AS hit_count, \
            s.miss_count AS miss_count, \
            s.created_at AS created_at, \
            coalesce(s.last_hit_at, '') AS last_hit_at \
     ORDER BY hit_count DESC, last_hit_at DESC, fingerprint ASC \
     LIMIT $limit";

/// Fixed-width UTC timestamp
pub fn encode_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp; the empty string stands for "never"
pub fn decode_timestamp(raw: &str) -> Result<Option<DateTime<Utc>>> {
    if raw.is_empty() {
        return Ok(None);
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|at| Some(at.with_timezone(&Utc)))
        .map_err(|e| CacheError::QueryError(format!("Invalid timestamp '{}': {}", raw, e)))
}

/// Statistics stored as `:CacheStat` nodes
#[derive(Clone)]
pub struct Neo4jStatsRepository {
    client: Arc<Neo4jClient>,
}

impl Neo4jStatsRepository {
    pub fn new(client: Arc<Neo4jClient>) -> Self {
        Self { client }
    }

    /// Create the uniqueness constraint the upsert relies on
    pub async fn ensure_schema(&self) -> Result<()> {
        self.client
            .graph()
            .run(query(CREATE_CONSTRAINT))
            .await
            .map_err(|e| CacheError::QueryError(format!("Failed to create constraint: {}", e)))?;

        info!("CacheStat uniqueness constraint in place");
        Ok(())
    }

    async fn fetch_rows(&self, cypher: Query) -> Result<Vec<Row>> {
        let mut result = self
            .client
            .graph()
            .execute(cypher)
            .await
            .map_err(|e| CacheError::QueryError(format!("Failed to execute query: {}", e)))?;

        let mut rows = Vec::new();
        while let Some(row) = result
            .next()
            .await
            .map_err(|e| CacheError::QueryError(format!("Failed to read result: {}", e)))?
        {
            rows.push(row);
        }
        Ok(rows)
    }
}

fn column<T: serde::de::DeserializeOwned>(row: &Row, name: &str) -> Result<T> {
    row.get::<T>(name)
        .map_err(|e| CacheError::QueryError(format!("Failed to extract {}: {}", name, e)))
}

fn count(row: &Row, name: &str) -> Result<u64> {
    Ok(column::<i64>(row, name)?.max(0) as u64)
}

fn record_from_row(row: &Row) -> Result<CacheStatRecord> {
    let sample_query: String = column(row, "sample_query")?;
    let created_at: String = column(row, "created_at")?;
    let last_hit_at: String = column(row, "last_hit_at")?;

    Ok(CacheStatRecord {
        domain_id: column(row, "domain_id")?,
        fingerprint: column(row, "fingerprint")?,
        sample_query: (!sample_query.is_empty()).then_some(sample_query),
        hit_count: count(row, "hit_count")?,
        miss_count: count(row, "miss_count")?,
        created_at: decode_timestamp(&created_at)?
            .ok_or_else(|| CacheError::QueryError("CacheStat without created_at".to_string()))?,
        last_hit_at: decode_timestamp(&last_hit_at)?,
    })
}

#[async_trait]
impl StatsRepository for Neo4jStatsRepository {
    async fn upsert_access(&self, access: &StatAccess) -> Result<()> {
        let is_hit = access.outcome.is_hit();
        let cypher = query(UPSERT_ACCESS)
            .param("domain_id", access.domain_id.clone())
            .param("fingerprint", access.fingerprint.clone())
            .param("hits", i64::from(is_hit))
            .param("misses", i64::from(!is_hit))
            .param("at", encode_timestamp(&access.at))
            .param("sample_query", access.sample_query.clone().unwrap_or_default());

        self.client
            .graph()
            .run(cypher)
            .await
            .map_err(|e| CacheError::QueryError(format!("Failed to upsert CacheStat: {}", e)))?;

        debug!(
            domain_id = %access.domain_id,
            fingerprint = %access.fingerprint,
            hit = is_hit,
            "Recorded cache access"
        );
        Ok(())
    }

    async fn totals(&self, domain_id: Option<&str>) -> Result<AccessTotals> {
        let cypher = match domain_id {
            Some(id) => query(TOTALS_DOMAIN).param("domain_id", id.to_string()),
            None => query(TOTALS_ALL),
        };

        let rows = self.fetch_rows(cypher).await?;
        match rows.first() {
            Some(row) => Ok(AccessTotals {
                hits: count(row, "hits")?,
                misses: count(row, "misses")?,
            }),
            None => Ok(AccessTotals::default()),
        }
    }

    async fn top(&self, domain_id: Option<&str>, limit: usize) -> Result<Vec<CacheStatRecord>> {
        let cypher = match domain_id {
            Some(id) => query(&format!(
                "MATCH (s:CacheStat {{domain_id: $domain_id}}) {}",
                TOP_PROJECTION
            ))
            .param("domain_id", id.to_string()),
            None => query(&format!("MATCH (s:CacheStat) {}", TOP_PROJECTION)),
        }
        .param("limit", limit as i64);

        self.fetch_rows(cypher)
            .await?
            .iter()
            .map(record_from_row)
            .collect()
    }

    fn name(&self) -> &'static str {
        "neo4j"
    }
}
