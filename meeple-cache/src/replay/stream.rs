//! Replays a cached answer through the live event protocol
//!
//! Order is fixed: one state update, one citations event, the tokens, then
//! exactly one completion carrying the original `cached_at`. Cancellation is
//! observed before every token and during every pause; once seen, nothing
//! more is emitted. A dropped receiver counts as cancellation.

use crate::cache::config::CacheConfig;
use crate::cache::entry::CacheHit;
use crate::error::Cancelled;
use crate::pipeline::AnswerPayload;
use crate::replay::events::{ChatEvent, EventSender};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// State announced when an answer is served from cache
pub const CACHE_STATE: &str = "retrieved from cache";

/// Split text into whitespace-delimited tokens, each after the first
/// carrying a single leading space
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .enumerate()
        .map(|(i, word)| {
            if i == 0 {
                word.to_string()
            } else {
                format!(" {}", word)
            }
        })
        .collect()
}

/// Paced replay of cache hits
#[derive(Debug, Clone)]
pub struct StreamingReplay {
    token_delay: Duration,
}

impl StreamingReplay {
    pub fn new(token_delay: Duration) -> Self {
        Self { token_delay }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.replay_token_delay)
    }

    pub fn token_delay(&self) -> Duration {
        self.token_delay
    }

    /// Emit a cache hit as an event stream; returns the number of tokens sent
    pub async fn replay(
        &self,
        hit: &CacheHit<AnswerPayload>,
        events: &EventSender,
        cancel: &CancellationToken,
    ) -> Result<usize, Cancelled> {
        let payload = &hit.payload;

        emit(events, cancel, ChatEvent::state(CACHE_STATE)).await?;
        emit(
            events,
            cancel,
            ChatEvent::Citations {
                citations: payload.citations.clone(),
            },
        )
        .await?;

        let tokens = tokenize(&payload.text);
        let total = tokens.len();
        for (i, token) in tokens.into_iter().enumerate() {
            if cancel.is_cancelled() {
                debug!(key = %hit.key, sent = i, total, "Replay cancelled");
                return Err(Cancelled);
            }
            if i > 0 && !self.token_delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(key = %hit.key, sent = i, total, "Replay cancelled during pause");
                        return Err(Cancelled);
                    }
                    _ = tokio::time::sleep(self.token_delay) => {}
                }
            }
            emit(events, cancel, ChatEvent::token(token)).await?;
        }

        emit(
            events,
            cancel,
            ChatEvent::Complete {
                token_usage: payload.token_usage,
                confidence: payload.confidence,
                cached_at: Some(hit.cached_at()),
            },
        )
        .await?;

        debug!(key = %hit.key, tokens = total, "Replayed cached answer");
        Ok(total)
    }
}

impl Default for StreamingReplay {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

/// Send one event unless the request was cancelled or the consumer left
pub(crate) async fn emit(
    events: &EventSender,
    cancel: &CancellationToken,
    event: ChatEvent,
) -> Result<(), Cancelled> {
    if cancel.is_cancelled() {
        return Err(Cancelled);
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Cancelled),
        sent = events.send(event) => sent.map_err(|_| Cancelled),
    }
}
