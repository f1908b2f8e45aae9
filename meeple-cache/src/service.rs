//! Request orchestration
//!
//! One [`AnswerCache::answer`] call per inbound question: derive the key,
//! try the store, then either replay the hit or run the pipeline, cache its
//! answer and complete the stream. Cache and statistics failures never
//! surface here; cancellation and pipeline failures do.

use crate::cache::backend::KvBackend;
use crate::cache::config::CacheConfig;
use crate::cache::invalidation::{domain_tag, InvalidationReport, TagIndex};
use crate::cache::key::{derive_key, normalize_query, query_fingerprint, EndpointKind};
use crate::cache::store::CacheStore;
use crate::connection::HealthCheckResult;
use crate::error::{CacheError, Cancelled, Result};
use crate::pipeline::{AnswerGenerator, AnswerPayload};
use crate::replay::events::{ChatEvent, EventSender};
use crate::replay::stream::{emit, StreamingReplay};
use crate::stats::repository::StatsRepository;
use crate::stats::tracker::StatsTracker;
use crate::stats::types::{AccessOutcome, CacheStats, StatAccess};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// One question to answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRequest {
    #[serde(default = "Uuid::new_v4")]
    pub request_id: Uuid,

    pub endpoint: EndpointKind,

    pub domain_id: String,

    /// Free-text question; absent for domain-scoped endpoints such as setup
    #[serde(default)]
    pub query: Option<String>,

    /// Fingerprint of the retrieved context, appended to the key
    #[serde(default)]
    pub context_fingerprint: Option<String>,

    /// Skip the lookup and force a live generation
    #[serde(default)]
    pub bypass_cache: bool,
}

impl AnswerRequest {
    pub fn new(endpoint: EndpointKind, domain_id: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            endpoint,
            domain_id: domain_id.into(),
            query: None,
            context_fingerprint: None,
            bypass_cache: false,
        }
    }

    /// Rules question
    pub fn qa(domain_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self::new(EndpointKind::Qa, domain_id).with_query(query)
    }

    /// Explanation of a topic
    pub fn explain(domain_id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self::new(EndpointKind::Explain, domain_id).with_query(topic)
    }

    /// Setup guide for a domain
    pub fn setup(domain_id: impl Into<String>) -> Self {
        Self::new(EndpointKind::Setup, domain_id)
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_context(mut self, fingerprint: impl Into<String>) -> Self {
        self.context_fingerprint = Some(fingerprint.into());
        self
    }

    pub fn bypass_cache(mut self, bypass: bool) -> Self {
        self.bypass_cache = bypass;
        self
    }

    pub fn cache_key(&self) -> String {
        derive_key(
            &self.endpoint,
            &self.domain_id,
            self.query.as_deref(),
            self.context_fingerprint.as_deref(),
        )
    }

    pub fn fingerprint(&self) -> String {
        query_fingerprint(&self.endpoint, self.query.as_deref())
    }

    fn access(&self, outcome: AccessOutcome) -> StatAccess {
        let access = StatAccess::new(self.domain_id.clone(), self.fingerprint(), outcome);
        match self.query.as_deref().map(normalize_query) {
            Some(sample) if !sample.is_empty() => access.with_sample_query(sample),
            _ => access,
        }
    }
}

/// Where an answer came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerSource {
    Cache,
    Generated,
}

/// What happened to one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerOutcome {
    pub request_id: Uuid,
    pub key: String,
    pub source: AnswerSource,
    /// Provenance of a cached answer; `None` for live answers
    pub cached_at: Option<DateTime<Utc>>,
    /// Whether a generated answer was written back to the cache
    pub stored: bool,
}

/// Cache-fronted answer service
#[derive(Clone)]
pub struct AnswerCache {
    store: CacheStore,
    tags: TagIndex,
    stats: StatsTracker,
    replay: StreamingReplay,
    generator: Arc<dyn AnswerGenerator>,
}

impl AnswerCache {
    pub fn new(
        backend: Arc<dyn KvBackend>,
        repository: Arc<dyn StatsRepository>,
        generator: Arc<dyn AnswerGenerator>,
        config: CacheConfig,
    ) -> Self {
        let store = CacheStore::new(backend.clone(), config.clone());
        Self {
            tags: store.tag_index(),
            stats: StatsTracker::new(repository, backend, config.clone()),
            replay: StreamingReplay::from_config(&config),
            store,
            generator,
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn tag_index(&self) -> &TagIndex {
        &self.tags
    }

    pub fn stats(&self) -> &StatsTracker {
        &self.stats
    }

    /// Answer one request, streaming events into `events`.
    ///
    /// Exactly one completion event is sent unless the request is cancelled
    /// or the pipeline fails.
    pub async fn answer(
        &self,
        request: &AnswerRequest,
        events: &EventSender,
        cancel: &CancellationToken,
    ) -> Result<AnswerOutcome> {
        let span = info_span!(
            "answer",
            request_id = %request.request_id,
            endpoint = %request.endpoint,
            domain_id = %request.domain_id
        );
        self.answer_inner(request, events, cancel).instrument(span).await
    }

    async fn answer_inner(
        &self,
        request: &AnswerRequest,
        events: &EventSender,
        cancel: &CancellationToken,
    ) -> Result<AnswerOutcome> {
        let key = request.cache_key();

        if request.bypass_cache {
            debug!(key = %key, "Cache bypass requested");
        } else if let Some(hit) = self.store.get::<AnswerPayload>(&key, cancel).await? {
            self.stats.record(request.access(AccessOutcome::Hit)).await;
            self.replay.replay(&hit, events, cancel).await?;

            return Ok(AnswerOutcome {
                request_id: request.request_id,
                key,
                source: AnswerSource::Cache,
                cached_at: Some(hit.cached_at()),
                stored: false,
            });
        }

        let generated = match self.generator.generate(request, events, cancel).await {
            Ok(generated) => generated,
            Err(CacheError::Cancelled) => return Err(CacheError::Cancelled),
            Err(e) => {
                warn!(key = %key, error = %e, "Answer generation failed");
                let report = ChatEvent::Error {
                    message: e.to_string(),
                };
                let _ = emit(events, cancel, report).await;
                return Err(e);
            }
        };
        if cancel.is_cancelled() {
            return Err(CacheError::Cancelled);
        }

        let mut tags = generated.tags;
        tags.insert(domain_tag(&request.domain_id));
        let stored = self
            .store
            .set(&key, &generated.payload, None, &tags, cancel)
            .await?;
        self.stats.record(request.access(AccessOutcome::Miss)).await;

        emit(
            events,
            cancel,
            ChatEvent::Complete {
                token_usage: generated.payload.token_usage,
                confidence: generated.payload.confidence,
                cached_at: None,
            },
        )
        .await?;

        Ok(AnswerOutcome {
            request_id: request.request_id,
            key,
            source: AnswerSource::Generated,
            cached_at: None,
            stored,
        })
    }

    /// Aggregated statistics, optionally for one domain
    pub async fn get_stats(
        &self,
        domain_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> std::result::Result<CacheStats, Cancelled> {
        self.stats.get_stats(domain_id, cancel).await
    }

    /// Drop every cached answer of a domain across all endpoint kinds
    pub async fn invalidate_domain(
        &self,
        domain_id: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<InvalidationReport, Cancelled> {
        let report = self.tags.invalidate_domain(domain_id, cancel).await?;
        info!(domain_id, removed = report.removed, "Domain cache invalidated");
        Ok(report)
    }

    /// Drop exactly the cached answers carrying `tag`
    pub async fn invalidate_tag(
        &self,
        tag: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<InvalidationReport, Cancelled> {
        self.tags.invalidate_by_tag(tag, cancel).await
    }

    /// Drop the cached answers backed by a source document
    pub async fn invalidate_source_document(
        &self,
        document_id: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<InvalidationReport, Cancelled> {
        self.tags.invalidate_source_document(document_id, cancel).await
    }

    /// Probe the key-value backend
    pub async fn health(&self) -> HealthCheckResult {
        let backend = self.store.backend();
        HealthCheckResult::probe(
            backend.name(),
            self.store.config().operation_timeout,
            backend.ping(),
        )
        .await
    }
}
