//! Batched prompt/response contract with a remote language model.
//!
//! The remote model is treated as an untrusted, best-effort oracle: any failure
//! to get a usable answer becomes [`OracleOutcome::Unavailable`] rather than an
//! error, and callers read that as "no topics for any text".

use async_trait::async_trait;
use metrics::counter;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::types::{ClassificationResult, TextUnit, Topic};

/// Transport to a remote model that answers one prompt with JSON text.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, OracleUnavailable>;
}

/// Why the oracle produced no usable classification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleUnavailable {
    #[error("request to oracle failed: {0}")]
    Transport(String),

    #[error("oracle request timed out")]
    Timeout,

    #[error("oracle returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("oracle response could not be parsed: {0}")]
    MalformedResponse(String),

    #[error("oracle returned no results")]
    EmptyResponse,
}

impl OracleUnavailable {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Timeout => "timeout",
            Self::Status { .. } => "status",
            Self::MalformedResponse(_) => "malformed",
            Self::EmptyResponse => "empty",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleOutcome {
    Classified(HashMap<String, Vec<String>>),
    Unavailable(OracleUnavailable),
}

impl OracleOutcome {
    pub fn into_mapping(self) -> HashMap<String, Vec<String>> {
        match self {
            Self::Classified(mapping) => mapping,
            Self::Unavailable(_) => HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OracleReply {
    results: Vec<ClassificationResult>,
}

pub struct RemoteModelClient {
    oracle: Arc<dyn Oracle>,
    model: String,
}

impl RemoteModelClient {
    pub fn new(oracle: Arc<dyn Oracle>, model: impl Into<String>) -> Self {
        Self {
            oracle,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Classifies the whole batch with a single oracle request.
    #[tracing::instrument(skip_all, fields(model = %self.model, texts = texts.len(), topics = topics.len()))]
    pub async fn classify_texts(&self, texts: &[TextUnit], topics: &[Topic]) -> OracleOutcome {
        let prompt = build_prompt(texts, topics);
        let reply = self.oracle.generate(&self.model, &prompt).await;

        match reply.and_then(|raw| parse_reply(&raw)) {
            Ok(mapping) => {
                tracing::debug!(classified = mapping.len(), "Oracle classification received");
                OracleOutcome::Classified(mapping)
            }
            Err(reason) => {
                counter!("oracle_unavailable_total", "reason" => reason.reason()).increment(1);
                tracing::warn!(error = %reason, "Oracle unavailable, returning no topics");
                OracleOutcome::Unavailable(reason)
            }
        }
    }
}

fn build_prompt(texts: &[TextUnit], topics: &[Topic]) -> String {
    format!(
        "You are a text classifier. For each text below, decide which of the listed topics it \
         clearly belongs to. A text may belong to several topics or to none.\n\
         Return a JSON object with a \"results\" field: an array with one object per text, each \
         having a \"text_id\" string and a \"topic_ids\" array. Only use topic ids from the \
         provided topic list. Use an empty array when no topic applies.\n\
         Texts: {}\n\
         Topics: {}\n\
         Respond with only a JSON object like: \
         {{\"results\": [{{\"text_id\": \"t1\", \"topic_ids\": [\"p\"]}}, \
         {{\"text_id\": \"t2\", \"topic_ids\": []}}]}}",
        serde_json::json!(texts),
        serde_json::json!(topics),
    )
}

fn parse_reply(raw: &str) -> Result<HashMap<String, Vec<String>>, OracleUnavailable> {
    let reply: OracleReply = serde_json::from_str(strip_code_fence(raw))
        .map_err(|e| OracleUnavailable::MalformedResponse(e.to_string()))?;
    if reply.results.is_empty() {
        return Err(OracleUnavailable::EmptyResponse);
    }

    Ok(reply
        .results
        .into_iter()
        .map(|result| (result.text_id, result.topic_ids))
        .collect())
}

/// Models sometimes wrap JSON in a Markdown fence even when asked not to.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.strip_suffix("```").unwrap_or(body).trim()
}
