// [[AgentOps]]/apps/crew-monitor/src/summary.rs
// Purpose: One-shot natural-language summaries of crew results, memoised per distinct result.
// Architecture: Infrastructure Helper Layer
// Dependencies: DashMap, async-trait

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use crate::backend::{BackendClient, BackendError};

const SUMMARY_PROMPT: &str =
    "Summarize the following ML operations crew result in two or three sentences for an on-call engineer:\n\n";

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, result: &str) -> Result<String, BackendError>;
}

/// Summaries produced by the backend's investigation endpoint.
pub struct BackendSummarizer {
    backend: BackendClient,
}

impl BackendSummarizer {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Summarizer for BackendSummarizer {
    async fn summarize(&self, result: &str) -> Result<String, BackendError> {
        self.backend
            .investigate(&format!("{}{}", SUMMARY_PROMPT, result))
            .await
    }
}

pub struct SummaryCache {
    summarizer: Arc<dyn Summarizer>,
    entries: DashMap<String, String>,
}

impl SummaryCache {
    pub fn new(summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            summarizer,
            entries: DashMap::new(),
        }
    }

    pub fn cached(&self, result: &str) -> Option<String> {
        self.entries.get(result).map(|entry| entry.value().clone())
    }

    /// Failures are not cached, so a later completion can retry.
    pub async fn get_or_fetch(&self, result: &str) -> Result<String, BackendError> {
        if let Some(summary) = self.cached(result) {
            tracing::debug!("Summary cache hit ({} chars of result)", result.len());
            return Ok(summary);
        }

        let summary = self.summarizer.summarize(result).await?;
        self.entries.insert(result.to_string(), summary.clone());
        Ok(summary)
    }
}
