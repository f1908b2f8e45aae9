//! Contract with the answer-generation pipeline
//!
//! The pipeline (embedding, vector search, completion) is external. On a
//! miss it streams its own live events and hands back the final answer plus
//! the tags describing what source material backed it.

use crate::cache::invalidation::source_doc_tag;
use crate::error::Result;
use crate::replay::events::EventSender;
use crate::service::AnswerRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;

/// Supporting evidence for an answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// Source document the snippet came from
    pub document_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,

    pub snippet: String,

    /// Retrieval relevance score
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Token and cost counters of one generation
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub estimated_cost_usd: f64,
}

/// Final answer as memoized in the cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerPayload {
    pub text: String,

    #[serde(default)]
    pub citations: Vec<Citation>,

    #[serde(default)]
    pub token_usage: TokenUsage,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl AnswerPayload {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            citations: Vec::new(),
            token_usage: TokenUsage::default(),
            confidence: None,
        }
    }

    pub fn with_citations(mut self, citations: Vec<Citation>) -> Self {
        self.citations = citations;
        self
    }

    pub fn with_token_usage(mut self, usage: TokenUsage) -> Self {
        self.token_usage = usage;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// Pipeline output: the answer plus invalidation tags
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedAnswer {
    pub payload: AnswerPayload,
    pub tags: BTreeSet<String>,
}

impl GeneratedAnswer {
    pub fn new(payload: AnswerPayload) -> Self {
        Self {
            payload,
            tags: BTreeSet::new(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Tag the answer with every document its citations reference
    pub fn tagged_by_citations(mut self) -> Self {
        let tags: Vec<String> = self
            .payload
            .citations
            .iter()
            .map(|citation| source_doc_tag(&citation.document_id))
            .collect();
        self.tags.extend(tags);
        self
    }
}

/// The live generation pipeline
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// Produce an answer, streaming live progress through `events`.
    ///
    /// Implementations emit state, citation and token events but never the
    /// completion event; that is sent once the answer has been cached.
    async fn generate(
        &self,
        request: &AnswerRequest,
        events: &EventSender,
        cancel: &CancellationToken,
    ) -> Result<GeneratedAnswer>;
}
