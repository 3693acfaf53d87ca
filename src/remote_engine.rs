use std::collections::HashSet;
use std::sync::Arc;

use crate::engine::{Provider, admit};
use crate::error::Result;
use crate::oracle::RemoteModelClient;
use crate::rate_limiter::RateLimiter;
use crate::types::{ClassificationResult, TextUnit, Topic};

const RATE_LIMIT_KEY: &str = "gemini_global";

/// Classifier delegating to a remote language model.
pub struct RemoteEngine {
    client: RemoteModelClient,
    rate_limiter: Arc<RateLimiter>,
}

impl RemoteEngine {
    pub fn new(client: RemoteModelClient, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            client,
            rate_limiter,
        }
    }

    #[tracing::instrument(skip_all, fields(model = %self.client.model(), texts = texts.len(), topics = topics.len()))]
    pub async fn classify(
        &self,
        texts: &[TextUnit],
        topics: &[Topic],
    ) -> Result<Vec<ClassificationResult>> {
        admit(&self.rate_limiter, Provider::Gemini, RATE_LIMIT_KEY)?;

        let mapping = self.client.classify_texts(texts, topics).await.into_mapping();
        let known_topics: HashSet<&str> = topics.iter().map(|topic| topic.id.as_str()).collect();

        Ok(texts
            .iter()
            .map(|text| {
                // Duplicate text ids each get the oracle's answer for that id.
                let mut topic_ids = mapping.get(&text.id).cloned().unwrap_or_default();
                topic_ids.retain(|id| {
                    let known = known_topics.contains(id.as_str());
                    if !known {
                        tracing::debug!(text_id = %text.id, topic_id = %id, "Dropping unknown topic id from oracle");
                    }
                    known
                });
                ClassificationResult::new(text.id.clone(), topic_ids)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClassifyError;
    use crate::oracle::OracleUnavailable;
    use crate::oracle::testing::CannedOracle;
    use crate::rate_limiter::RateLimitPolicy;

    fn texts() -> Vec<TextUnit> {
        ["t1", "t2", "t3"]
            .into_iter()
            .map(|id| TextUnit {
                id: id.to_string(),
                text: format!("text {id}"),
            })
            .collect()
    }

    fn topics() -> Vec<Topic> {
        vec![
            Topic {
                id: "s".to_string(),
                label: "sports".to_string(),
            },
            Topic {
                id: "p".to_string(),
                label: "politics".to_string(),
            },
        ]
    }

    fn engine(oracle: Arc<CannedOracle>, per_minute: u32) -> RemoteEngine {
        RemoteEngine::new(
            RemoteModelClient::new(oracle, "gemini-2.5-flash"),
            Arc::new(RateLimiter::new(RateLimitPolicy::new(Some(per_minute), None))),
        )
    }

    #[tokio::test]
    async fn test_missing_texts_default_to_no_topics() {
        let oracle = CannedOracle::replying(
            r#"{"results": [{"text_id": "t2", "topic_ids": ["p"]}, {"text_id": "t1", "topic_ids": ["s", "p"]}]}"#,
        );
        let results = engine(oracle, 5).classify(&texts(), &topics()).await.unwrap();

        assert_eq!(
            results,
            vec![
                ClassificationResult::new("t1", vec!["s".to_string(), "p".to_string()]),
                ClassificationResult::new("t2", vec!["p".to_string()]),
                ClassificationResult::new("t3", vec![]),
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_ids_from_oracle_are_dropped() {
        let oracle = CannedOracle::replying(
            r#"{"results": [{"text_id": "t1", "topic_ids": ["s", "x"]}, {"text_id": "zzz", "topic_ids": ["p"]}]}"#,
        );
        let results = engine(oracle, 5).classify(&texts(), &topics()).await.unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].topic_ids, vec!["s"]);
        assert!(results.iter().all(|r| r.text_id != "zzz"));
    }

    #[tokio::test]
    async fn test_duplicate_text_ids_share_the_oracle_answer() {
        let oracle = CannedOracle::replying(r#"{"results": [{"text_id": "t1", "topic_ids": ["s"]}]}"#);
        let texts = vec![
            TextUnit {
                id: "t1".to_string(),
                text: "first copy".to_string(),
            },
            TextUnit {
                id: "t1".to_string(),
                text: "second copy".to_string(),
            },
        ];
        let results = engine(oracle, 5).classify(&texts, &topics()).await.unwrap();

        assert_eq!(
            results,
            vec![
                ClassificationResult::new("t1", vec!["s".to_string()]),
                ClassificationResult::new("t1", vec!["s".to_string()]),
            ]
        );
    }

    #[tokio::test]
    async fn test_unavailable_oracle_yields_empty_results() {
        for oracle in [
            CannedOracle::replying(""),
            CannedOracle::replying("not json"),
            CannedOracle::replying(r#"{"results": []}"#),
            CannedOracle::failing(OracleUnavailable::Transport("connection reset".to_string())),
        ] {
            let results = engine(oracle, 5).classify(&texts(), &topics()).await.unwrap();
            assert_eq!(results.len(), 3);
            assert!(results.iter().all(|r| r.topic_ids.is_empty()));
        }
    }

    #[tokio::test]
    async fn test_rate_limited_before_calling_oracle() {
        let oracle = CannedOracle::replying(r#"{"results": []}"#);
        let engine = engine(oracle.clone(), 1);

        engine.classify(&texts(), &topics()).await.unwrap();
        let err = engine.classify(&texts(), &topics()).await.unwrap_err();

        assert!(matches!(err, ClassifyError::RateLimited { .. }));
        assert!(err.to_string().starts_with("Gemini Rate limit exceeded"));
        assert_eq!(oracle.prompts.lock().len(), 1);
    }
}
