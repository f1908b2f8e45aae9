//! Streaming replay of cached answers

mod common;

use common::{completions, drain, event_channel, sample_answer};
use meeple_cache::cache::CacheMetadata;
use meeple_cache::replay::CACHE_STATE;
use meeple_cache::{AnswerPayload, CacheHit, ChatEvent, StreamingReplay};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

fn hit(payload: AnswerPayload) -> CacheHit<AnswerPayload> {
    let cached_at = "2024-03-10T08:30:00Z".parse().unwrap();
    CacheHit {
        key: "qa:chess:fingerprint".to_string(),
        payload,
        metadata: CacheMetadata::new(cached_at, BTreeSet::new()),
    }
}

#[tokio::test]
async fn test_replay_event_order_and_provenance() {
    let replay = StreamingReplay::new(Duration::from_millis(1));
    let (tx, mut rx) = event_channel();
    let cached = hit(sample_answer("Move the pawn forward"));

    let sent = replay
        .replay(&cached, &tx, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(sent, 4);

    let events = drain(&mut rx);
    assert_eq!(events.len(), 7);
    assert_eq!(events[0], ChatEvent::state(CACHE_STATE));
    assert_eq!(
        events[1],
        ChatEvent::Citations {
            citations: cached.payload.citations.clone()
        }
    );

    let tokens: Vec<&str> = events[2..6]
        .iter()
        .map(|event| match event {
            ChatEvent::Token { token } => token.as_str(),
            other => panic!("expected token, got {:?}", other),
        })
        .collect();
    assert_eq!(tokens, vec!["Move", " the", " pawn", " forward"]);
    assert_eq!(tokens.concat(), "Move the pawn forward");

    match &events[6] {
        ChatEvent::Complete {
            token_usage,
            confidence,
            cached_at,
        } => {
            assert_eq!(*token_usage, cached.payload.token_usage);
            assert_eq!(*confidence, Some(0.87));
            assert_eq!(*cached_at, Some(cached.cached_at()));
        }
        other => panic!("expected completion, got {:?}", other),
    }
}

#[tokio::test]
async fn test_replay_of_empty_answer_still_completes() {
    let replay = StreamingReplay::new(Duration::from_millis(1));
    let (tx, mut rx) = event_channel();

    let sent = replay
        .replay(&hit(AnswerPayload::new("   ")), &tx, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(sent, 0);

    let events = drain(&mut rx);
    assert_eq!(events.len(), 3);
    assert_eq!(completions(&events), 1);
    assert!(events[2].cached_at().is_some());
}

#[tokio::test]
async fn test_replay_is_paced() {
    let replay = StreamingReplay::new(Duration::from_millis(20));
    let (tx, _rx) = event_channel();

    let started = Instant::now();
    replay
        .replay(&hit(AnswerPayload::new("one two three four five six")), &tx, &CancellationToken::new())
        .await
        .unwrap();

    // Five pauses between six tokens
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[tokio::test]
async fn test_cancel_mid_replay_stops_without_completion() {
    let replay = StreamingReplay::new(Duration::from_millis(20));
    let (tx, mut rx) = event_channel();
    let cancel = CancellationToken::new();
    let text = (0..50).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ");
    let cached = hit(AnswerPayload::new(text));

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(70)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let outcome = replay.replay(&cached, &tx, &cancel).await;
    assert!(outcome.is_err());
    assert!(started.elapsed() < Duration::from_millis(500));

    let events = drain(&mut rx);
    assert_eq!(completions(&events), 0);
    let tokens = events
        .iter()
        .filter(|event| matches!(event, ChatEvent::Token { .. }))
        .count();
    assert!(tokens > 0 && tokens < 50, "sent {} tokens", tokens);
}

#[tokio::test]
async fn test_cancel_before_replay_emits_nothing() {
    let replay = StreamingReplay::new(Duration::from_millis(1));
    let (tx, mut rx) = event_channel();
    let cancel = CancellationToken::new();
    cancel.cancel();

    assert!(replay.replay(&hit(sample_answer("x")), &tx, &cancel).await.is_err());
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_dropped_consumer_ends_replay() {
    let replay = StreamingReplay::new(Duration::from_millis(1));
    let (tx, rx) = event_channel();
    drop(rx);

    let outcome = replay
        .replay(&hit(sample_answer("nobody is listening")), &tx, &CancellationToken::new())
        .await;
    assert!(outcome.is_err());
}
