//! # Meeple Cache (meeple-cache)
//!
//! A fail-open answer cache for a generative rules-question pipeline.
//!
//! ## Features
//!
//! - Deterministic cache keys from free-text questions
//! - Redis-backed storage with metadata sidecars and per-tag reverse indexes
//! - Precise invalidation by tag or source document, and bulk invalidation by domain
//! - Durable hit/miss statistics in Neo4j with atomic upserts
//! - Replay of cached answers through the live streaming protocol
//!
//! Every cache and statistics failure degrades to "no cache"; only the
//! caller's own cancellation is ever reported back.
//!
//! ## Answering a Question
//!
//! ```no_run
//! use meeple_cache::{
//!     AnswerCache, AnswerRequest, BackendSettings, CacheConfig, Neo4jClient,
//!     Neo4jStatsRepository, RedisBackend,
//! };
//! # use meeple_cache::{AnswerGenerator, AnswerPayload, EventSender, GeneratedAnswer};
//! # use tokio_util::sync::CancellationToken;
//! use std::sync::Arc;
//!
//! # struct Pipeline;
//! # #[async_trait::async_trait]
//! # impl AnswerGenerator for Pipeline {
//! #     async fn generate(
//! #         &self,
//! #         _request: &AnswerRequest,
//! #         _events: &EventSender,
//! #         _cancel: &CancellationToken,
//! #     ) -> meeple_cache::Result<GeneratedAnswer> {
//! #         Ok(GeneratedAnswer::new(AnswerPayload::new("Move the king two squares")))
//! #     }
//! # }
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = BackendSettings::from_env();
//!     let backend = RedisBackend::connect(&settings.redis_url).await?;
//!     let neo4j = Arc::new(Neo4jClient::from_settings(&settings).await?);
//!     let repository = Neo4jStatsRepository::new(neo4j);
//!     repository.ensure_schema().await?;
//!
//!     let cache = AnswerCache::new(
//!         Arc::new(backend),
//!         Arc::new(repository),
//!         Arc::new(Pipeline),
//!         CacheConfig::from_env()?,
//!     );
//!
//!     let (events, mut stream) = tokio::sync::mpsc::channel(64);
//!     let request = AnswerRequest::qa("chess", "How does castling work?");
//!     let outcome = cache.answer(&request, &events, &CancellationToken::new()).await?;
//!     drop(events);
//!
//!     while let Some(event) = stream.recv().await {
//!         println!("{}", serde_json::to_string(&event)?);
//!     }
//!     println!("served from {:?}", outcome.source);
//!     Ok(())
//! }
//! ```
//!
//! ## Invalidation
//!
//! ```no_run
//! # use meeple_cache::AnswerCache;
//! # use tokio_util::sync::CancellationToken;
//! # async fn example(cache: AnswerCache) -> anyhow::Result<()> {
//! let cancel = CancellationToken::new();
//!
//! // A rulebook was re-ingested: drop only the answers it backed
//! let report = cache.invalidate_source_document("chess-rulebook-v2", &cancel).await?;
//! println!("removed {} answers", report.removed);
//!
//! // Drop everything for a game
//! cache.invalidate_domain("chess", &cancel).await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod connection;
pub mod error;
pub mod pipeline;
pub mod replay;
pub mod service;
pub mod stats;

// Re-export main types for convenience
pub use cache::{
    derive_key, domain_tag, source_doc_tag, BackendSettings, CacheConfig, CacheConfigBuilder,
    CacheHit, CacheKeyBuilder, CacheMetadata, CacheStore, EndpointKind, InvalidationReason,
    InvalidationReport, KvBackend, MemoryBackend, RedisBackend, TagIndex, WriteOp,
};
pub use connection::{HealthCheckResult, HealthStatus, Neo4jClient};
pub use error::{CacheError, Cancelled, Result};
pub use pipeline::{AnswerGenerator, AnswerPayload, Citation, GeneratedAnswer, TokenUsage};
pub use replay::{ChatEvent, EventSender, StreamingReplay};
pub use service::{AnswerCache, AnswerOutcome, AnswerRequest, AnswerSource};
pub use stats::{
    CacheStatRecord, CacheStats, MemoryStatsRepository, Neo4jStatsRepository, StatsRepository,
    StatsTracker,
};
