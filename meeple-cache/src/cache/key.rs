//! Cache key derivation
//!
//! Keys have the shape `{endpoint}:{domain}[:{digest}][:{context}]`, where
//! `digest` is the SHA-256 of the normalised query. Derivation is pure: the
//! same question always lands on the same key.
//!
//! Each segment is escaped so `:` only ever separates segments, and custom
//! endpoint names that would collide with the reserved `meta:` and `tag:`
//! namespaces are shifted out of them.

use crate::cache::entry::{METADATA_PREFIX, TAG_INDEX_PREFIX};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::borrow::Cow;

/// Answer-producing endpoint a cache entry belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    /// Free-text rules question
    Qa,

    /// Explanation of a rules topic
    Explain,

    /// Setup guide; scoped only to a domain, takes no query
    Setup,

    /// Any other endpoint
    Custom(String),
}

impl EndpointKind {
    /// Built-in endpoint kinds, used when invalidating a whole domain
    pub const BUILTIN: [EndpointKind; 3] =
        [EndpointKind::Qa, EndpointKind::Explain, EndpointKind::Setup];

    pub fn as_str(&self) -> &str {
        match self {
            EndpointKind::Qa => "qa",
            EndpointKind::Explain => "explain",
            EndpointKind::Setup => "setup",
            EndpointKind::Custom(name) => name,
        }
    }

    /// Leading key segment for this endpoint.
    ///
    /// A custom name equal to a reserved namespace is prefixed with `%`,
    /// which no escaped segment can start with followed by a letter.
    pub fn namespace(&self) -> Cow<'_, str> {
        let segment = key_segment(self.as_str());
        let reserved = [METADATA_PREFIX, TAG_INDEX_PREFIX]
            .iter()
            .any(|prefix| prefix.strip_suffix(':') == Some(segment.as_ref()));
        if reserved {
            Cow::Owned(format!("%{}", segment))
        } else {
            segment
        }
    }
}

impl std::fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EndpointKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "qa" => EndpointKind::Qa,
            "explain" => EndpointKind::Explain,
            "setup" => EndpointKind::Setup,
            other => EndpointKind::Custom(other.to_string()),
        })
    }
}

/// Builder for answer cache keys
pub struct CacheKeyBuilder {
    endpoint: EndpointKind,
    domain_id: String,
    query: Option<String>,
    context_fingerprint: Option<String>,
}

impl CacheKeyBuilder {
    /// Create a new cache key builder
    pub fn new(endpoint: EndpointKind) -> Self {
        Self {
            endpoint,
            domain_id: String::new(),
            query: None,
            context_fingerprint: None,
        }
    }

    /// Set the domain (game) the key is scoped to
    pub fn domain(mut self, domain_id: impl Into<String>) -> Self {
        self.domain_id = domain_id.into();
        self
    }

    /// Set the raw query; it is normalised and hashed at build time
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Suffix the key with a fingerprint of the retrieved context
    pub fn context(mut self, fingerprint: impl Into<String>) -> Self {
        self.context_fingerprint = Some(fingerprint.into());
        self
    }

    /// Build the cache key
    pub fn build(self) -> String {
        let mut key = format!(
            "{}:{}",
            self.endpoint.namespace(),
            key_segment(&self.domain_id)
        );

        if let Some(query) = self.query.as_deref() {
            let normalized = normalize_query(query);
            if !normalized.is_empty() {
                key.push(':');
                key.push_str(&digest(&normalized));
            }
        }

        if let Some(fingerprint) = self.context_fingerprint.as_deref() {
            if !fingerprint.is_empty() {
                key.push(':');
                key.push_str(&key_segment(fingerprint));
            }
        }

        key
    }
}

/// Derive the cache key for a request
pub fn derive_key(
    endpoint: &EndpointKind,
    domain_id: &str,
    raw_query: Option<&str>,
    context_fingerprint: Option<&str>,
) -> String {
    let mut builder = CacheKeyBuilder::new(endpoint.clone()).domain(domain_id);
    if let Some(query) = raw_query {
        builder = builder.query(query);
    }
    if let Some(fingerprint) = context_fingerprint {
        builder = builder.context(fingerprint);
    }
    builder.build()
}

/// Trim, case-fold and collapse internal whitespace runs
pub fn normalize_query(raw: &str) -> String {
    raw.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Statistics key for a query.
///
/// Query-less endpoints fall back to the endpoint name so each of them gets
/// one record per domain.
pub fn query_fingerprint(endpoint: &EndpointKind, raw_query: Option<&str>) -> String {
    let normalized = raw_query.map(normalize_query).unwrap_or_default();
    if normalized.is_empty() {
        endpoint.as_str().to_string()
    } else {
        digest(&normalized)
    }
}

fn digest(normalized: &str) -> String {
    format!("{:x}", Sha256::digest(normalized.as_bytes()))
}

/// Percent-encode `%` and `:` so a value occupies exactly one key segment
pub fn key_segment(raw: &str) -> Cow<'_, str> {
    if !raw.contains(|ch: char| ch == '%' || ch == ':') {
        return Cow::Borrowed(raw);
    }
    let mut encoded = String::with_capacity(raw.len() + 4);
    for ch in raw.chars() {
        match ch {
            '%' => encoded.push_str("%25"),
            ':' => encoded.push_str("%3A"),
            other => encoded.push(other),
        }
    }
    Cow::Owned(encoded)
}

/// Escape Redis glob metacharacters so a literal can be embedded in a pattern
pub fn escape_glob(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for ch in literal.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Patterns matching every entry of a domain for one endpoint kind
pub fn domain_patterns(endpoint: &EndpointKind, domain_id: &str) -> [String; 2] {
    let prefix = format!(
        "{}:{}",
        escape_glob(&endpoint.namespace()),
        escape_glob(&key_segment(domain_id))
    );
    [format!("{}:*", prefix), prefix]
}
