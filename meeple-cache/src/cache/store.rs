//! Fail-open answer store over a remote key-value backend
//!
//! Each entry is written together with its metadata sidecar and its tag
//! index memberships in one atomic batch, all under the same TTL. Reads
//! never fail: backend errors, timeouts and undecodable values are logged
//! and reported as a miss. Only cancellation reaches the caller.

use crate::cache::backend::{fail_open, guarded, KvBackend, WriteOp};
use crate::cache::config::CacheConfig;
use crate::cache::entry::{metadata_key, CacheEnvelope, CacheHit, CacheMetadata};
use crate::cache::invalidation::TagIndex;
use crate::error::{Cancelled, Result};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Answer cache over a [`KvBackend`]
#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn KvBackend>,
    config: CacheConfig,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn KvBackend>, config: CacheConfig) -> Self {
        debug!(backend = backend.name(), "Initializing cache store");
        Self { backend, config }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn KvBackend> {
        &self.backend
    }

    /// Tag index sharing this store's backend and configuration
    pub fn tag_index(&self) -> TagIndex {
        TagIndex::new(self.backend.clone(), self.config.clone())
    }

    /// Look up a cached answer.
    ///
    /// Any failure other than cancellation is a miss.
    pub async fn get<T: DeserializeOwned>(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<Option<CacheHit<T>>, Cancelled> {
        let keys = [key.to_string(), metadata_key(key)];
        let outcome = self
            .guard("cache get", self.backend.get_many(&keys), cancel)
            .await;
        let Some(mut values) = fail_open(outcome, "cache get", key)? else {
            return Ok(None);
        };

        let metadata_bytes = values.pop().flatten();
        let Some(entry_bytes) = values.pop().flatten() else {
            debug!(key, "Cache miss");
            return Ok(None);
        };

        let envelope = match CacheEnvelope::<T>::decode(&entry_bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(key, error = %e, "Undecodable cache entry, treating as miss");
                return Ok(None);
            }
        };

        let metadata = match metadata_bytes.map(|bytes| CacheMetadata::decode(&bytes)) {
            Some(Ok(metadata)) => metadata,
            Some(Err(e)) => {
                warn!(key, error = %e, "Undecodable cache metadata, treating as miss");
                return Ok(None);
            }
            None => {
                // Sidecar expired first or was never written; the envelope still knows its age
                debug!(key, "Cache entry without metadata");
                CacheMetadata::new(envelope.cached_at, BTreeSet::new())
            }
        };

        debug!(key, "Cache hit");
        Ok(Some(CacheHit {
            key: key.to_string(),
            payload: envelope.payload,
            metadata,
        }))
    }

    /// Store an answer with its metadata and tag index memberships.
    ///
    /// `ttl` defaults to the configured TTL; jitter is applied once and shared
    /// by everything the write touches. Returns whether the write landed.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        payload: &T,
        ttl: Option<Duration>,
        tags: &BTreeSet<String>,
        cancel: &CancellationToken,
    ) -> std::result::Result<bool, Cancelled> {
        let ttl = self
            .config
            .ttl_with_jitter(ttl.unwrap_or(self.config.default_ttl));
        let cached_at = Utc::now();

        let encoded = CacheEnvelope::new(payload, cached_at)
            .encode()
            .and_then(|entry| Ok((entry, CacheMetadata::new(cached_at, tags.clone()).encode()?)));
        let (entry, metadata) = match encoded {
            Ok(pair) => pair,
            Err(e) => {
                warn!(key, error = %e, "Failed to encode cache entry, skipping write");
                return Ok(false);
            }
        };

        let mut ops = Vec::with_capacity(2 + tags.len());
        ops.push(WriteOp::Set {
            key: key.to_string(),
            value: entry,
            ttl,
        });
        ops.push(WriteOp::Set {
            key: metadata_key(key),
            value: metadata,
            ttl,
        });
        ops.extend(tags.iter().map(|tag| TagIndex::register_op(tag, key, ttl)));

        let outcome = self
            .guard("cache set", self.backend.write_batch(ops), cancel)
            .await;
        let written = fail_open(outcome, "cache set", key)?.is_some();
        if written {
            debug!(key, ttl_secs = ttl.as_secs(), tags = tags.len(), "Cached answer");
        }
        Ok(written)
    }

    /// Remove one entry and its metadata. Tag index members are left to expire.
    pub async fn remove(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<bool, Cancelled> {
        let keys = [key.to_string(), metadata_key(key)];
        let outcome = self
            .guard("cache remove", self.backend.delete(&keys), cancel)
            .await;
        Ok(fail_open(outcome, "cache remove", key)?.map_or(false, |removed| removed > 0))
    }

    async fn guard<T>(
        &self,
        context: &str,
        op: impl std::future::Future<Output = Result<T>>,
        cancel: &CancellationToken,
    ) -> Result<T> {
        guarded(self.config.operation_timeout, cancel, context, op).await
    }
}
