//! Key-value backend abstraction
//!
//! The cache talks to its remote store only through [`KvBackend`]. Every
//! method is a single round-trip and is individually atomic; nothing here
//! takes a lock spanning more than one call.

use crate::error::{CacheError, Cancelled, Result};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// One mutation inside an atomic write batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Store a value with a TTL
    Set {
        key: String,
        value: Vec<u8>,
        ttl: Duration,
    },

    /// Add a member to a set; the set's TTL is raised to at least `ttl`
    SetAdd {
        key: String,
        member: String,
        ttl: Duration,
    },

    /// Remove a member from a set
    SetRemove { key: String, member: String },
}

/// Remote key-value store used for entries, metadata and tag indexes
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Fetch several string values in one round-trip
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>>;

    /// Apply all operations atomically
    async fn write_batch(&self, ops: Vec<WriteOp>) -> Result<()>;

    /// Delete keys, returning how many existed
    async fn delete(&self, keys: &[String]) -> Result<usize>;

    /// Members of a set, empty when the set does not exist
    async fn set_members(&self, key: &str) -> Result<Vec<String>>;

    /// One bounded iteration over the key space; a returned cursor of 0 ends the scan
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)>;

    /// Serialized length of each value, `None` for missing keys
    async fn value_lens(&self, keys: &[String]) -> Result<Vec<Option<usize>>>;

    /// Round-trip liveness probe
    async fn ping(&self) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// Run one backend round-trip under the operation timeout and the caller's cancellation
pub(crate) async fn guarded<T, F>(
    timeout: Duration,
    cancel: &CancellationToken,
    context: &str,
    op: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(CacheError::Cancelled);
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CacheError::Cancelled),
        outcome = tokio::time::timeout(timeout, op) => match outcome {
            Ok(result) => result,
            Err(_) => Err(CacheError::TimeoutError {
                timeout_ms: timeout.as_millis() as u64,
                context: context.to_string(),
            }),
        },
    }
}

/// Collapse a backend outcome into the fail-open contract.
///
/// Cancellation propagates; any other failure is logged and yields `None`.
pub(crate) fn fail_open<T>(
    outcome: Result<T>,
    operation: &str,
    target: &str,
) -> std::result::Result<Option<T>, Cancelled> {
    match outcome {
        Ok(value) => Ok(Some(value)),
        Err(CacheError::Cancelled) => Err(Cancelled),
        Err(e) => {
            warn!(operation, target, error = %e, "Cache backend operation failed");
            Ok(None)
        }
    }
}

#[derive(Debug, Clone)]
enum Value {
    Bytes(Vec<u8>),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
    /// Insertion order; scan cursors are positions in this sequence
    seq: u64,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Default)]
struct Slots {
    entries: HashMap<String, Slot>,
    next_seq: u64,
}

impl Slots {
    fn insert(&mut self, key: String, value: Value, expires_at: Option<Instant>) {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.entries.insert(
            key,
            Slot {
                value,
                expires_at,
                seq,
            },
        );
    }

    fn live(&self, key: &str, now: Instant) -> Option<&Slot> {
        self.entries.get(key).filter(|slot| slot.is_live(now))
    }

    fn purge_expired(&mut self, now: Instant) {
        self.entries.retain(|_, slot| slot.is_live(now));
    }
}

/// Process-local backend with Redis-compatible semantics
///
/// Expiry is lazy: dead slots are invisible to reads and purged on writes.
/// Scan cursors follow insertion order, so deleting keys mid-scan never
/// causes later keys to be skipped.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    slots: Arc<RwLock<Slots>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys across all namespaces
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let slots = self.slots.read().await;
        slots.entries.values().filter(|slot| slot.is_live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remaining time-to-live of a live key
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let slots = self.slots.read().await;
        slots
            .live(key, now)
            .and_then(|slot| slot.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Whether a live key exists in any namespace
    pub async fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.slots.read().await.live(key, now).is_some()
    }

    /// Store raw bytes under a key, bypassing the envelope format
    pub async fn put_raw(&self, key: &str, bytes: Vec<u8>, ttl: Duration) {
        let now = Instant::now();
        let mut slots = self.slots.write().await;
        slots.insert(key.to_string(), Value::Bytes(bytes), Some(now + ttl));
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        let now = Instant::now();
        let slots = self.slots.read().await;

        Ok(keys
            .iter()
            .map(|key| match slots.live(key, now) {
                Some(Slot {
                    value: Value::Bytes(bytes),
                    ..
                }) => Some(bytes.clone()),
                _ => None,
            })
            .collect())
    }

    async fn write_batch(&self, ops: Vec<WriteOp>) -> Result<()> {
        let now = Instant::now();
        let mut slots = self.slots.write().await;
        slots.purge_expired(now);

        for op in ops {
            match op {
                WriteOp::Set { key, value, ttl } => {
                    slots.insert(key, Value::Bytes(value), Some(now + ttl));
                }
                WriteOp::SetAdd { key, member, ttl } => {
                    let wanted = now + ttl;
                    match slots.entries.get_mut(&key) {
                        Some(Slot {
                            value: Value::Set(members),
                            expires_at,
                            ..
                        }) => {
                            members.insert(member);
                            *expires_at = Some(expires_at.map_or(wanted, |at| at.max(wanted)));
                        }
                        _ => {
                            slots.insert(key, Value::Set(BTreeSet::from([member])), Some(wanted));
                        }
                    }
                }
                WriteOp::SetRemove { key, member } => {
                    let now_empty = match slots.entries.get_mut(&key) {
                        Some(Slot {
                            value: Value::Set(members),
                            ..
                        }) => {
                            members.remove(&member);
                            members.is_empty()
                        }
                        _ => false,
                    };
                    if now_empty {
                        slots.entries.remove(&key);
                    }
                }
            }
        }

        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<usize> {
        let now = Instant::now();
        let mut slots = self.slots.write().await;

        let mut removed = 0;
        for key in keys {
            if let Some(slot) = slots.entries.remove(key) {
                if slot.is_live(now) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        let slots = self.slots.read().await;

        Ok(match slots.live(key, now) {
            Some(Slot {
                value: Value::Set(members),
                ..
            }) => members.iter().cloned().collect(),
            _ => Vec::new(),
        })
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        let now = Instant::now();
        let slots = self.slots.read().await;

        let mut pending: Vec<(u64, &String)> = slots
            .entries
            .iter()
            .filter(|(_, slot)| slot.is_live(now) && slot.seq >= cursor)
            .map(|(key, slot)| (slot.seq, key))
            .collect();
        pending.sort_unstable();

        let batch = count.max(1);
        let next = pending.get(batch).map_or(0, |(seq, _)| *seq);
        let matched = pending
            .iter()
            .take(batch)
            .filter(|(_, key)| glob_match(pattern, key))
            .map(|(_, key)| key.to_string())
            .collect();

        Ok((next, matched))
    }

    async fn value_lens(&self, keys: &[String]) -> Result<Vec<Option<usize>>> {
        let now = Instant::now();
        let slots = self.slots.read().await;

        Ok(keys
            .iter()
            .map(|key| match slots.live(key, now) {
                Some(Slot {
                    value: Value::Bytes(bytes),
                    ..
                }) => Some(bytes.len()),
                _ => None,
            })
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Redis-style glob matching: `*`, `?`, `[...]` classes and `\` escapes
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        let step = if pi < p.len() {
            match p[pi] {
                '*' => {
                    star = Some((pi, ti));
                    pi += 1;
                    continue;
                }
                '?' => Some(pi + 1),
                '\\' if pi + 1 < p.len() => (p[pi + 1] == t[ti]).then_some(pi + 2),
                '[' => match_class(&p, pi, t[ti]),
                c => (c == t[ti]).then_some(pi + 1),
            }
        } else {
            None
        };

        if let Some(next) = step {
            pi = next;
            ti += 1;
            continue;
        }

        // Backtrack: let the last `*` swallow one more character
        match star {
            Some((star_pi, star_ti)) => {
                pi = star_pi + 1;
                ti = star_ti + 1;
                star = Some((star_pi, star_ti + 1));
            }
            None => return false,
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

fn match_class(p: &[char], start: usize, ch: char) -> Option<usize> {
    let mut i = start + 1;
    let negate = i < p.len() && p[i] == '^';
    if negate {
        i += 1;
    }

    let mut matched = false;
    while i < p.len() && p[i] != ']' {
        let mut lo = p[i];
        if lo == '\\' && i + 1 < p.len() {
            i += 1;
            lo = p[i];
        }
        if i + 2 < p.len() && p[i + 1] == '-' && p[i + 2] != ']' {
            let hi = p[i + 2];
            let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
            if lo <= ch && ch <= hi {
                matched = true;
            }
            i += 3;
        } else {
            if lo == ch {
                matched = true;
            }
            i += 1;
        }
    }

    if i >= p.len() {
        // Unterminated class: treat '[' literally
        return (ch == '[').then_some(start + 1);
    }
    (matched != negate).then_some(i + 1)
}
