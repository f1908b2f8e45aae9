//! Incremental answer delivery protocol
//!
//! Live generation and cache replay emit the same events, so a consumer can
//! only tell them apart by the `cached_at` provenance on completion.

use crate::pipeline::{Citation, TokenUsage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Channel end that answer events are pushed into
pub type EventSender = mpsc::Sender<ChatEvent>;

/// One event of an answer stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// Progress announcement
    StateUpdate { state: String },

    /// Supporting evidence; always precedes the first token
    Citations { citations: Vec<Citation> },

    /// Incremental answer text
    Token { token: String },

    /// Terminal event, sent exactly once unless the stream was cancelled
    Complete {
        token_usage: TokenUsage,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence: Option<f64>,

        /// When the answer was originally produced; absent for live answers
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cached_at: Option<DateTime<Utc>>,
    },

    /// Pipeline failure reported to the client
    Error { message: String },
}

impl ChatEvent {
    pub fn state(state: impl Into<String>) -> Self {
        ChatEvent::StateUpdate {
            state: state.into(),
        }
    }

    pub fn token(token: impl Into<String>) -> Self {
        ChatEvent::Token {
            token: token.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatEvent::Complete { .. } | ChatEvent::Error { .. })
    }

    /// Provenance carried by a completion event
    pub fn cached_at(&self) -> Option<DateTime<Utc>> {
        match self {
            ChatEvent::Complete { cached_at, .. } => *cached_at,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_shape() {
        let event = ChatEvent::token(" pawn");
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({ "type": "token", "token": " pawn" })
        );

        let event = ChatEvent::state("retrieved from cache");
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({ "type": "state_update", "state": "retrieved from cache" })
        );
    }

    #[test]
    fn test_live_complete_omits_cached_at() {
        let event = ChatEvent::Complete {
            token_usage: TokenUsage::default(),
            confidence: None,
            cached_at: None,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "complete");
        assert!(value.get("cached_at").is_none());
        assert!(event.is_terminal());
    }

    #[test]
    fn test_cached_complete_carries_timestamp() {
        let at: DateTime<Utc> = "2024-05-01T12:00:00Z".parse().unwrap();
        let event = ChatEvent::Complete {
            token_usage: TokenUsage::default(),
            confidence: Some(0.9),
            cached_at: Some(at),
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["cached_at"], "2024-05-01T12:00:00Z");
        assert_eq!(event.cached_at(), Some(at));

        let back: ChatEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }
}
