//! # Streaming Replay
//!
//! Cached answers are re-emitted through the same incremental event
//! protocol as live generation, paced like a live stream, with the original
//! production time attached to the completion event.

pub mod events;
pub mod stream;

pub use events::{ChatEvent, EventSender};
pub use stream::{tokenize, StreamingReplay, CACHE_STATE};
