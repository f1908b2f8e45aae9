//! Hit/miss accounting and the aggregated statistics view
//!
//! Recording is strictly observability: durable-store failures are logged
//! and never reach the request path. `GetStats` degrades piecewise, so a
//! failed key-space enumeration still returns the durable counters.

use crate::cache::backend::{guarded, KvBackend};
use crate::cache::config::CacheConfig;
use crate::cache::entry::is_reserved_key;
use crate::cache::key::{domain_patterns, EndpointKind};
use crate::error::{CacheError, Cancelled, Result};
use crate::stats::repository::StatsRepository;
use crate::stats::types::{AccessOutcome, CacheFootprint, CacheStats, StatAccess};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Durable hit/miss counters plus live cache footprint
#[derive(Clone)]
pub struct StatsTracker {
    repository: Arc<dyn StatsRepository>,
    backend: Arc<dyn KvBackend>,
    config: CacheConfig,
}

impl StatsTracker {
    pub fn new(
        repository: Arc<dyn StatsRepository>,
        backend: Arc<dyn KvBackend>,
        config: CacheConfig,
    ) -> Self {
        Self {
            repository,
            backend,
            config,
        }
    }

    /// Count one access against `(domain_id, fingerprint)`
    pub async fn record_access(&self, domain_id: &str, fingerprint: &str, is_hit: bool) {
        self.record(StatAccess::new(domain_id, fingerprint, AccessOutcome::from_hit(is_hit)))
            .await;
    }

    /// Count one access; failures are logged and dropped
    pub async fn record(&self, access: StatAccess) {
        let outcome = self
            .bounded("stats upsert", self.repository.upsert_access(&access))
            .await;

        if let Err(e) = outcome {
            warn!(
                repository = self.repository.name(),
                domain_id = %access.domain_id,
                fingerprint = %access.fingerprint,
                error = %e,
                "Failed to record cache access"
            );
        }
    }

    /// Aggregate statistics, optionally scoped to one domain.
    ///
    /// Each part degrades to zero on its own failure; only cancellation of
    /// the key-space enumeration propagates.
    pub async fn get_stats(
        &self,
        domain_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> std::result::Result<CacheStats, Cancelled> {
        let totals = self
            .bounded("stats totals", self.repository.totals(domain_id))
            .await
            .unwrap_or_else(|e| {
                warn!(repository = self.repository.name(), error = %e, "Failed to read stat totals");
                Default::default()
            });

        let top = self
            .bounded(
                "stats top",
                self.repository.top(domain_id, self.config.top_questions_limit),
            )
            .await
            .unwrap_or_else(|e| {
                warn!(repository = self.repository.name(), error = %e, "Failed to read top questions");
                Vec::new()
            });

        let footprint = if self.config.size_scan_enabled {
            match self.footprint(domain_id, cancel).await {
                Ok(footprint) => footprint,
                Err(CacheError::Cancelled) => return Err(Cancelled),
                Err(e) => {
                    warn!(backend = self.backend.name(), error = %e, "Failed to enumerate cache keys");
                    CacheFootprint::default()
                }
            }
        } else {
            CacheFootprint::default()
        };

        Ok(CacheStats::from_parts(totals, footprint, top))
    }

    /// Live entries and summed payload sizes for a scope.
    ///
    /// A point-in-time approximation: keys returned twice by the cursor scan
    /// are counted twice.
    pub async fn footprint(
        &self,
        domain_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<CacheFootprint> {
        let patterns: Vec<String> = match domain_id {
            Some(id) => EndpointKind::BUILTIN
                .iter()
                .flat_map(|kind| domain_patterns(kind, id))
                .collect(),
            None => vec!["*".to_string()],
        };

        let mut footprint = CacheFootprint::default();
        for pattern in &patterns {
            let mut cursor = 0u64;
            loop {
                let (next, keys) = self
                    .guard(
                        "size scan",
                        self.backend.scan(cursor, pattern, self.config.scan_batch_size),
                        cancel,
                    )
                    .await?;

                let keys: Vec<String> = keys.into_iter().filter(|key| !is_reserved_key(key)).collect();
                if !keys.is_empty() {
                    let lens = self
                        .guard("size read", self.backend.value_lens(&keys), cancel)
                        .await?;
                    for len in lens.into_iter().flatten() {
                        footprint.keys += 1;
                        footprint.bytes += len as u64;
                    }
                }

                if next == 0 {
                    break;
                }
                cursor = next;
            }
        }

        debug!(keys = footprint.keys, bytes = footprint.bytes, "Measured cache footprint");
        Ok(footprint)
    }

    async fn bounded<T>(&self, context: &str, op: impl Future<Output = Result<T>>) -> Result<T> {
        let timeout = self.config.operation_timeout;
        match tokio::time::timeout(timeout, op).await {
            Ok(outcome) => outcome,
            Err(_) => Err(CacheError::TimeoutError {
                timeout_ms: timeout.as_millis() as u64,
                context: context.to_string(),
            }),
        }
    }

    async fn guard<T>(
        &self,
        context: &str,
        op: impl Future<Output = Result<T>>,
        cancel: &CancellationToken,
    ) -> Result<T> {
        guarded(self.config.operation_timeout, cancel, context, op).await
    }
}
