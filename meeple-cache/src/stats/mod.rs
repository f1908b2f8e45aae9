//! # Cache Statistics
//!
//! Durable hit/miss counters keyed by `(domain_id, fingerprint)` and the
//! on-demand aggregate view over them.
//!
//! - [`StatsRepository`] is the storage seam; [`Neo4jStatsRepository`] keeps
//!   one `:CacheStat` node per fingerprint and upserts with a single `MERGE`.
//! - [`StatsTracker`] records accesses fail-open and assembles [`CacheStats`],
//!   adding the live cache footprint measured from the key-value backend.

pub mod neo4j;
pub mod repository;
pub mod tracker;
pub mod types;

pub use neo4j::Neo4jStatsRepository;
pub use repository::{MemoryStatsRepository, StatsRepository};
pub use tracker::StatsTracker;
pub use types::{
    hit_rate, AccessOutcome, AccessTotals, CacheFootprint, CacheStatRecord, CacheStats, StatAccess,
};
