//! Tag indexes and bulk invalidation
//!
//! Every tag in use owns a set under `tag:{tag}` listing the cache keys that
//! carry it. Index membership is written in the same atomic batch as the
//! entry and its metadata, so it never outlives them by more than backend
//! expiry skew. Invalidation is best effort: failures are logged and cut the
//! run short, never raised.

use crate::cache::backend::{fail_open, guarded, KvBackend, WriteOp};
use crate::cache::config::CacheConfig;
use crate::cache::entry::{is_reserved_key, metadata_key, CacheMetadata, TAG_INDEX_PREFIX};
use crate::cache::key::{domain_patterns, EndpointKind};
use crate::error::{Cancelled, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tag attached to every entry produced for a domain
pub fn domain_tag(domain_id: &str) -> String {
    format!("domain:{}", domain_id)
}

/// Tag attached to entries backed by a source document
pub fn source_doc_tag(document_id: &str) -> String {
    format!("source-doc:{}", document_id)
}

/// Backend key of a tag's reverse index
pub fn index_key(tag: &str) -> String {
    format!("{}{}", TAG_INDEX_PREFIX, tag)
}

/// Reason for cache invalidation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationReason {
    /// Invalidated by tag match
    TagMatch { tag: String },

    /// Invalidated due to source document update
    SourceUpdated { document_id: String },

    /// Every entry of a domain across endpoint kinds
    Domain { domain_id: String },

    /// Keys matching a glob pattern
    Pattern { pattern: String },
}

impl std::fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidationReason::TagMatch { tag } => write!(f, "tag match: {}", tag),
            InvalidationReason::SourceUpdated { document_id } => {
                write!(f, "source document updated: {}", document_id)
            }
            InvalidationReason::Domain { domain_id } => write!(f, "domain: {}", domain_id),
            InvalidationReason::Pattern { pattern } => write!(f, "pattern: {}", pattern),
        }
    }
}

/// Outcome of one invalidation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidationReport {
    /// What triggered the run
    pub reason: InvalidationReason,

    /// Cache entries actually deleted
    pub removed: usize,

    /// False when a backend failure stopped the run early
    pub complete: bool,

    /// When the run finished
    pub timestamp: DateTime<Utc>,
}

impl InvalidationReport {
    fn new(reason: InvalidationReason) -> Self {
        Self {
            reason,
            removed: 0,
            complete: true,
            timestamp: Utc::now(),
        }
    }

    fn absorb(&mut self, other: InvalidationReport) {
        self.removed += other.removed;
        self.complete &= other.complete;
    }

    fn finish(mut self) -> Self {
        self.timestamp = Utc::now();
        self
    }
}

/// Reverse indexes from tags to cache keys
#[derive(Clone)]
pub struct TagIndex {
    backend: Arc<dyn KvBackend>,
    config: CacheConfig,
}

impl TagIndex {
    pub fn new(backend: Arc<dyn KvBackend>, config: CacheConfig) -> Self {
        Self { backend, config }
    }

    /// Index write for `key` under `tag`, for inclusion in a larger atomic batch
    pub fn register_op(tag: &str, key: &str, ttl: Duration) -> WriteOp {
        WriteOp::SetAdd {
            key: index_key(tag),
            member: key.to_string(),
            ttl,
        }
    }

    /// Add `key` to the index of `tag`, extending the index TTL to at least `ttl`
    pub async fn register(
        &self,
        tag: &str,
        key: &str,
        ttl: Duration,
        cancel: &CancellationToken,
    ) -> std::result::Result<bool, Cancelled> {
        let outcome = self
            .guard(
                "tag register",
                self.backend.write_batch(vec![Self::register_op(tag, key, ttl)]),
                cancel,
            )
            .await;
        Ok(fail_open(outcome, "tag register", tag)?.is_some())
    }

    /// Current members of a tag index; empty on backend failure
    pub async fn members(
        &self,
        tag: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<Vec<String>, Cancelled> {
        let index = index_key(tag);
        let outcome = self
            .guard("tag members", self.backend.set_members(&index), cancel)
            .await;
        Ok(fail_open(outcome, "tag members", tag)?.unwrap_or_default())
    }

    /// Delete every entry carrying `tag`, then the tag's index itself.
    ///
    /// A tag with no members is a no-op returning 0. The index is only removed
    /// once every member was purged, so a failed run can be retried.
    pub async fn invalidate_by_tag(
        &self,
        tag: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<InvalidationReport, Cancelled> {
        self.invalidate_tag_as(
            tag,
            InvalidationReason::TagMatch {
                tag: tag.to_string(),
            },
            cancel,
        )
        .await
    }

    /// Drop every answer backed by a source document
    pub async fn invalidate_source_document(
        &self,
        document_id: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<InvalidationReport, Cancelled> {
        self.invalidate_tag_as(
            &source_doc_tag(document_id),
            InvalidationReason::SourceUpdated {
                document_id: document_id.to_string(),
            },
            cancel,
        )
        .await
    }

    async fn invalidate_tag_as(
        &self,
        tag: &str,
        reason: InvalidationReason,
        cancel: &CancellationToken,
    ) -> std::result::Result<InvalidationReport, Cancelled> {
        let mut report = InvalidationReport::new(reason);
        let index = index_key(tag);

        let outcome = self
            .guard("tag members", self.backend.set_members(&index), cancel)
            .await;
        let members = match fail_open(outcome, "tag members", tag)? {
            Some(members) => members,
            None => {
                report.complete = false;
                return Ok(report.finish());
            }
        };

        if members.is_empty() {
            debug!(tag, "Tag has no members, nothing to invalidate");
            return Ok(report.finish());
        }

        for chunk in members.chunks(self.config.scan_batch_size) {
            match fail_open(self.purge(chunk, Some(tag), cancel).await, "tag purge", tag)? {
                Some(removed) => report.removed += removed,
                None => {
                    report.complete = false;
                    break;
                }
            }
        }

        if report.complete {
            let outcome = self
                .guard("tag index delete", self.backend.delete(&[index]), cancel)
                .await;
            if fail_open(outcome, "tag index delete", tag)?.is_none() {
                report.complete = false;
            }
        }

        info!(tag, removed = report.removed, complete = report.complete, "Invalidated cache entries by tag");
        Ok(report.finish())
    }

    /// Delete every entry whose key matches a glob pattern.
    ///
    /// The key space is walked with a bounded cursor scan; reserved
    /// namespaces are skipped even when the pattern would match them.
    pub async fn invalidate_by_pattern(
        &self,
        pattern: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<InvalidationReport, Cancelled> {
        let mut report = InvalidationReport::new(InvalidationReason::Pattern {
            pattern: pattern.to_string(),
        });

        let mut cursor = 0u64;
        loop {
            let outcome = self
                .guard(
                    "scan",
                    self.backend.scan(cursor, pattern, self.config.scan_batch_size),
                    cancel,
                )
                .await;
            let (next, keys) = match fail_open(outcome, "scan", pattern)? {
                Some(page) => page,
                None => {
                    report.complete = false;
                    break;
                }
            };

            let keys: Vec<String> = keys.into_iter().filter(|key| !is_reserved_key(key)).collect();
            if !keys.is_empty() {
                match fail_open(self.purge(&keys, None, cancel).await, "pattern purge", pattern)? {
                    Some(removed) => report.removed += removed,
                    None => {
                        report.complete = false;
                        break;
                    }
                }
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(pattern, removed = report.removed, "Invalidated cache entries by pattern");
        Ok(report.finish())
    }

    /// Delete every entry of a domain, whatever endpoint produced it.
    ///
    /// Built-in endpoint kinds are matched by key pattern; the domain tag
    /// sweep then catches custom endpoints and drops the domain's index.
    pub async fn invalidate_domain(
        &self,
        domain_id: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<InvalidationReport, Cancelled> {
        let mut report = InvalidationReport::new(InvalidationReason::Domain {
            domain_id: domain_id.to_string(),
        });

        for kind in EndpointKind::BUILTIN.iter() {
            for pattern in domain_patterns(kind, domain_id) {
                report.absorb(self.invalidate_by_pattern(&pattern, cancel).await?);
            }
        }
        report.absorb(self.invalidate_by_tag(&domain_tag(domain_id), cancel).await?);

        info!(domain_id, removed = report.removed, complete = report.complete, "Invalidated domain");
        Ok(report.finish())
    }

    /// Delete entries with their metadata and unlink them from every other tag index.
    ///
    /// With `except_tag` set, a key whose current metadata no longer lists
    /// that tag was rewritten since it was indexed and is kept. Keys with
    /// missing or unreadable metadata are deleted.
    async fn purge(
        &self,
        keys: &[String],
        except_tag: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let metas: Vec<String> = keys.iter().map(|key| metadata_key(key)).collect();
        let raw = self
            .guard("metadata read", self.backend.get_many(&metas), cancel)
            .await?;

        let mut doomed = Vec::with_capacity(keys.len());
        let mut unlinks = Vec::new();
        for (key, bytes) in keys.iter().zip(raw) {
            let metadata = match bytes.map(|bytes| CacheMetadata::decode(&bytes)) {
                Some(Ok(metadata)) => Some(metadata),
                Some(Err(e)) => {
                    warn!(key = %key, error = %e, "Unreadable metadata, leaving index members to expire");
                    None
                }
                None => None,
            };

            if let (Some(tag), Some(metadata)) = (except_tag, metadata.as_ref()) {
                if !metadata.has_tag(tag) {
                    debug!(key = %key, tag, "Entry no longer carries the tag, keeping it");
                    continue;
                }
            }

            for tag in metadata.into_iter().flat_map(|metadata| metadata.tags) {
                if Some(tag.as_str()) != except_tag {
                    unlinks.push(WriteOp::SetRemove {
                        key: index_key(&tag),
                        member: key.clone(),
                    });
                }
            }
            doomed.push(key.clone());
        }

        if doomed.is_empty() {
            return Ok(0);
        }

        let doomed_metas: Vec<String> = doomed.iter().map(|key| metadata_key(key)).collect();
        let removed = self.guard("delete", self.backend.delete(&doomed), cancel).await?;
        self.guard("metadata delete", self.backend.delete(&doomed_metas), cancel)
            .await?;
        if !unlinks.is_empty() {
            self.guard("tag unlink", self.backend.write_batch(unlinks), cancel)
                .await?;
        }

        Ok(removed)
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
