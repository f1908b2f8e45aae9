//! Stored cache entries and their metadata sidecar
//!
//! Both records are JSON documents carrying an explicit format version.
//! Unknown fields are ignored so newer writers stay readable; a missing
//! required field or a newer major version fails decoding, which callers
//! treat as a miss.

use crate::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Highest stored format version this build can read
pub const ENTRY_FORMAT_VERSION: u32 = 1;

/// Namespace for metadata sidecars
pub const METADATA_PREFIX: &str = "meta:";

/// Namespace for tag reverse indexes
pub const TAG_INDEX_PREFIX: &str = "tag:";

/// Key of the metadata sidecar for a cache key
pub fn metadata_key(key: &str) -> String {
    format!("{}{}", METADATA_PREFIX, key)
}

/// Whether a backend key belongs to a reserved namespace rather than an entry
pub fn is_reserved_key(key: &str) -> bool {
    key.starts_with(METADATA_PREFIX) || key.starts_with(TAG_INDEX_PREFIX)
}

/// Stored form of a cached payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEnvelope<T> {
    /// Format version
    #[serde(rename = "v")]
    pub version: u32,

    /// When the payload was produced
    pub cached_at: DateTime<Utc>,

    /// The memoised answer
    pub payload: T,
}

impl<T> CacheEnvelope<T> {
    pub fn new(payload: T, cached_at: DateTime<Utc>) -> Self {
        Self {
            version: ENTRY_FORMAT_VERSION,
            cached_at,
            payload,
        }
    }
}

impl<T: Serialize> CacheEnvelope<T> {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl<T: DeserializeOwned> CacheEnvelope<T> {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let envelope: Self = serde_json::from_slice(bytes)?;
        check_version(envelope.version)?;
        Ok(envelope)
    }
}

/// Sidecar record stored next to every entry, at the same TTL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// Format version
    #[serde(rename = "v")]
    pub version: u32,

    /// When the entry was created
    pub cached_at: DateTime<Utc>,

    /// Tags for selective invalidation
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl CacheMetadata {
    pub fn new(cached_at: DateTime<Utc>, tags: BTreeSet<String>) -> Self {
        Self {
            version: ENTRY_FORMAT_VERSION,
            cached_at,
            tags,
        }
    }

    /// Check if entry has a specific tag
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let metadata: Self = serde_json::from_slice(bytes)?;
        check_version(metadata.version)?;
        Ok(metadata)
    }
}

fn check_version(version: u32) -> Result<()> {
    if version == 0 || version > ENTRY_FORMAT_VERSION {
        return Err(CacheError::SerializationError(format!(
            "unsupported entry format version {}",
            version
        )));
    }
    Ok(())
}

/// A successful lookup
#[derive(Debug, Clone)]
pub struct CacheHit<T> {
    /// The key that was hit
    pub key: String,

    /// The memoised answer
    pub payload: T,

    /// Provenance and tags
    pub metadata: CacheMetadata,
}

impl<T> CacheHit<T> {
    /// When the cached answer was originally produced
    pub fn cached_at(&self) -> DateTime<Utc> {
        self.metadata.cached_at
    }

    /// Get the age of the entry
    pub fn age(&self) -> Duration {
        (Utc::now() - self.metadata.cached_at)
            .to_std()
            .unwrap_or(Duration::from_secs(0))
    }
}
