use std::sync::Arc;

use crate::engine::{Provider, admit};
use crate::error::Result;
use crate::rate_limiter::RateLimiter;
use crate::types::{ClassificationResult, TextUnit, Topic};

const RATE_LIMIT_KEY: &str = "mock_global";

/// Deterministic classifier: a topic applies when its label appears in the text,
/// ignoring case.
pub struct MockEngine {
    rate_limiter: Arc<RateLimiter>,
}

impl MockEngine {
    pub fn new(rate_limiter: Arc<RateLimiter>) -> Self {
        Self { rate_limiter }
    }

    #[tracing::instrument(skip_all, fields(texts = texts.len(), topics = topics.len()))]
    pub fn classify(
        &self,
        texts: &[TextUnit],
        topics: &[Topic],
    ) -> Result<Vec<ClassificationResult>> {
        admit(&self.rate_limiter, Provider::Mock, RATE_LIMIT_KEY)?;

        let labels: Vec<(&str, String)> = topics
            .iter()
            .map(|topic| (topic.id.as_str(), topic.label.to_lowercase()))
            .collect();

        Ok(texts
            .iter()
            .map(|text| {
                let haystack = text.text.to_lowercase();
                let topic_ids = labels
                    .iter()
                    .filter(|(_, label)| haystack.contains(label.as_str()))
                    .map(|(id, _)| id.to_string())
                    .collect();
                ClassificationResult::new(text.id.clone(), topic_ids)
            })
            .collect())
    }
}
