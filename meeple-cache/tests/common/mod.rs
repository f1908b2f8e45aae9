//! Shared test doubles for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use meeple_cache::{
    AnswerGenerator, AnswerPayload, AnswerRequest, CacheError, ChatEvent, Citation, EventSender,
    GeneratedAnswer, KvBackend, MemoryBackend, Result, TokenUsage, WriteOp,
};
use meeple_cache::stats::{AccessTotals, CacheStatRecord, StatAccess, StatsRepository};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Memory backend that can be switched into failing or stalling mode
#[derive(Clone, Default)]
pub struct FlakyBackend {
    pub inner: MemoryBackend,
    failing: Arc<AtomicBool>,
    stall: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl FlakyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call with a connection error
    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Hang every call for far longer than any operation timeout
    pub fn stall(&self, stall: bool) {
        self.stall.store(stall, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn check(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.stall.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::ConnectionError("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KvBackend for FlakyBackend {
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        self.check().await?;
        self.inner.get_many(keys).await
    }

    async fn write_batch(&self, ops: Vec<WriteOp>) -> Result<()> {
        self.check().await?;
        self.inner.write_batch(ops).await
    }

    async fn delete(&self, keys: &[String]) -> Result<usize> {
        self.check().await?;
        self.inner.delete(keys).await
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        self.check().await?;
        self.inner.set_members(key).await
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        self.check().await?;
        self.inner.scan(cursor, pattern, count).await
    }

    async fn value_lens(&self, keys: &[String]) -> Result<Vec<Option<usize>>> {
        self.check().await?;
        self.inner.value_lens(keys).await
    }

    async fn ping(&self) -> Result<()> {
        self.check().await
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

/// Pipeline double that streams a fixed answer
#[derive(Clone)]
pub struct ScriptedGenerator {
    answer: AnswerPayload,
    tags: Vec<String>,
    fail_with: Option<String>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedGenerator {
    pub fn new(answer: AnswerPayload) -> Self {
        Self {
            answer,
            tags: Vec::new(),
            fail_with: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn failing(message: &str) -> Self {
        let mut generator = Self::new(AnswerPayload::new(""));
        generator.fail_with = Some(message.to_string());
        generator
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnswerGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        _request: &AnswerRequest,
        events: &EventSender,
        _cancel: &CancellationToken,
    ) -> Result<GeneratedAnswer> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_with {
            return Err(CacheError::GenerationError(message.clone()));
        }

        let send = |event: ChatEvent| async move {
            events
                .send(event)
                .await
                .map_err(|_| CacheError::Cancelled)
        };
        send(ChatEvent::state("generating answer")).await?;
        send(ChatEvent::Citations {
            citations: self.answer.citations.clone(),
        })
        .await?;
        for token in meeple_cache::replay::tokenize(&self.answer.text) {
            send(ChatEvent::token(token)).await?;
        }

        let mut generated = GeneratedAnswer::new(self.answer.clone());
        for tag in &self.tags {
            generated = generated.with_tag(tag.clone());
        }
        Ok(generated)
    }
}

/// Stats repository whose store is always down
#[derive(Clone, Default)]
pub struct FailingStatsRepository {
    pub attempts: Arc<AtomicUsize>,
}

#[async_trait]
impl StatsRepository for FailingStatsRepository {
    async fn upsert_access(&self, _access: &StatAccess) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::QueryError("database is unavailable".to_string()))
    }

    async fn totals(&self, _domain_id: Option<&str>) -> Result<AccessTotals> {
        Err(CacheError::QueryError("database is unavailable".to_string()))
    }

    async fn top(&self, _domain_id: Option<&str>, _limit: usize) -> Result<Vec<CacheStatRecord>> {
        Err(CacheError::QueryError("database is unavailable".to_string()))
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

pub fn citation(document_id: &str, snippet: &str) -> Citation {
    Citation {
        document_id: document_id.to_string(),
        page: Some(12),
        snippet: snippet.to_string(),
        score: Some(0.92),
    }
}

pub fn sample_answer(text: &str) -> AnswerPayload {
    AnswerPayload::new(text)
        .with_citations(vec![citation("chess-rules", "A pawn moves straight forward")])
        .with_token_usage(TokenUsage {
            prompt_tokens: 420,
            completion_tokens: 12,
            total_tokens: 432,
            estimated_cost_usd: 0.0021,
        })
        .with_confidence(0.87)
}

/// Channel large enough that no test ever blocks on send
pub fn event_channel() -> (EventSender, mpsc::Receiver<ChatEvent>) {
    mpsc::channel(256)
}

/// Drain everything currently buffered
pub fn drain(rx: &mut mpsc::Receiver<ChatEvent>) -> Vec<ChatEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Count completion events in a stream
pub fn completions(events: &[ChatEvent]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, ChatEvent::Complete { .. }))
        .count()
}
