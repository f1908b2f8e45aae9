//! Redis backend against a throwaway container
//!
//! These tests start Redis through Testcontainers and need a Docker daemon.
//! Redis 7 or newer is required for conditional `EXPIRE`.

mod common;

use common::sample_answer;
use meeple_cache::{
    derive_key, AnswerPayload, CacheConfig, CacheStore, EndpointKind, KvBackend, RedisBackend,
    WriteOp,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::clients::Cli;
use testcontainers::RunnableImage;
use testcontainers_modules::redis::Redis;
use tokio_util::sync::CancellationToken;

const REDIS_TAG: &str = "7.2-alpine";

fn redis_url(port: u16) -> String {
    format!("redis://127.0.0.1:{}", port)
}

#[tokio::test]
#[ignore] // Run with: cargo test --ignored
async fn test_redis_round_trip_and_tag_invalidation() {
    let docker = Cli::default();
    let node = docker.run(RunnableImage::from(Redis::default()).with_tag(REDIS_TAG));
    let backend = RedisBackend::connect(&redis_url(node.get_host_port_ipv4(6379)))
        .await
        .expect("Failed to connect to Redis");

    let store = CacheStore::new(Arc::new(backend), CacheConfig::default());
    let cancel = CancellationToken::new();
    let key = derive_key(&EndpointKind::Qa, "chess", Some("How does the pawn move?"), None);
    let tags: BTreeSet<String> = ["domain:chess".to_string(), "source-doc:rules".to_string()].into();

    assert!(store.set(&key, &sample_answer("Move the pawn forward"), None, &tags, &cancel).await.unwrap());

    let hit = store.get::<AnswerPayload>(&key, &cancel).await.unwrap().unwrap();
    assert_eq!(hit.payload.text, "Move the pawn forward");
    assert!(hit.metadata.has_tag("source-doc:rules"));

    let report = store
        .tag_index()
        .invalidate_source_document("rules", &cancel)
        .await
        .unwrap();
    assert_eq!(report.removed, 1);
    assert!(store.get::<AnswerPayload>(&key, &cancel).await.unwrap().is_none());
    assert!(store.tag_index().members("domain:chess", &cancel).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore]
async fn test_redis_scan_and_domain_invalidation() {
    let docker = Cli::default();
    let node = docker.run(RunnableImage::from(Redis::default()).with_tag(REDIS_TAG));
    let backend = RedisBackend::connect(&redis_url(node.get_host_port_ipv4(6379)))
        .await
        .expect("Failed to connect to Redis");

    let config = CacheConfig::builder().scan_batch_size(7).build();
    let store = CacheStore::new(Arc::new(backend), config);
    let cancel = CancellationToken::new();
    let tags: BTreeSet<String> = ["domain:chess".to_string()].into();

    for i in 0..40 {
        let key = derive_key(&EndpointKind::Qa, "chess", Some(&format!("question {}", i)), None);
        store.set(&key, &sample_answer("x"), None, &tags, &cancel).await.unwrap();
    }
    let survivor = derive_key(&EndpointKind::Qa, "chess-960", Some("question 0"), None);
    store.set(&survivor, &sample_answer("y"), None, &BTreeSet::new(), &cancel).await.unwrap();

    let report = store.tag_index().invalidate_domain("chess", &cancel).await.unwrap();
    assert_eq!(report.removed, 40);
    assert!(report.complete);
    assert!(store.get::<AnswerPayload>(&survivor, &cancel).await.unwrap().is_some());
}

#[tokio::test]
#[ignore]
async fn test_redis_index_ttl_only_grows() {
    let docker = Cli::default();
    let node = docker.run(RunnableImage::from(Redis::default()).with_tag(REDIS_TAG));
    let backend = RedisBackend::connect(&redis_url(node.get_host_port_ipv4(6379)))
        .await
        .expect("Failed to connect to Redis");

    backend
        .write_batch(vec![WriteOp::SetAdd {
            key: "tag:t".to_string(),
            member: "a".to_string(),
            ttl: Duration::from_secs(600),
        }])
        .await
        .unwrap();
    backend
        .write_batch(vec![WriteOp::SetAdd {
            key: "tag:t".to_string(),
            member: "b".to_string(),
            ttl: Duration::from_secs(1),
        }])
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;

    let mut members = backend.set_members("tag:t").await.unwrap();
    members.sort();
    assert_eq!(members, vec!["a".to_string(), "b".to_string()]);
    assert!(backend.ping().await.is_ok());
}
