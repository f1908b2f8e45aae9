//! # Answer Cache
//!
//! Memoizes final answers to domain-scoped questions in a remote key-value
//! store so repeats skip the generation pipeline entirely.
//!
//! ## Features
//!
//! - **Deterministic Keys**: case and whitespace variants of a question share one key
//! - **Tag Indexes**: reverse indexes for precise bulk invalidation by tag
//! - **Pattern Invalidation**: bounded cursor scans for whole-domain sweeps
//! - **Fail-Open**: backend failures degrade to a miss, never to an error
//! - **Versioned Storage**: entries survive additive schema changes
//!
//! ## Example
//!
//! ```rust
//! use meeple_cache::cache::{derive_key, CacheConfig, CacheStore, EndpointKind, MemoryBackend};
//! use std::collections::BTreeSet;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = CacheStore::new(Arc::new(MemoryBackend::new()), CacheConfig::default());
//! let cancel = CancellationToken::new();
//!
//! let key = derive_key(&EndpointKind::Qa, "chess", Some("How does castling work?"), None);
//! let tags: BTreeSet<String> = ["domain:chess".to_string()].into();
//! store.set(&key, &"Move the king two squares".to_string(), None, &tags, &cancel).await?;
//!
//! if let Some(hit) = store.get::<String>(&key, &cancel).await? {
//!     println!("Cached at {}: {}", hit.cached_at(), hit.payload);
//! }
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod entry;
pub mod invalidation;
pub mod key;
pub mod redis_backend;
pub mod store;

pub use backend::{glob_match, KvBackend, MemoryBackend, WriteOp};
pub use config::{BackendSettings, CacheConfig, CacheConfigBuilder};
pub use entry::{CacheEnvelope, CacheHit, CacheMetadata};
pub use invalidation::{
    domain_tag, source_doc_tag, InvalidationReason, InvalidationReport, TagIndex,
};
pub use key::{
    derive_key, key_segment, normalize_query, query_fingerprint, CacheKeyBuilder, EndpointKind,
};
pub use redis_backend::RedisBackend;
pub use store::CacheStore;
