//! Google AI Studio Gemini `generateContent` transport.
//!
//! Implements only what batch classification needs: a single user turn and
//! JSON output constrained by a response schema.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::ClassifyError;
use crate::oracle::{Oracle, OracleUnavailable};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug)]
pub struct GeminiOracle {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
}

impl GeminiOracle {
    /// Fails immediately when no API key is configured; the oracle is unusable without one.
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
    ) -> Result<Self, ClassifyError> {
        let api_key = api_key
            .filter(|key| !key.expose_secret().trim().is_empty())
            .ok_or_else(|| {
                ClassifyError::config(
                    "Gemini API key not set. Set GEMINI_API_KEY environment variable.",
                )
            })?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn request_url(&self, model: &str) -> String {
        format!("{}/v1beta/models/{model}:generateContent", self.base_url)
    }
}

#[async_trait]
impl Oracle for GeminiOracle {
    #[tracing::instrument(skip(self, prompt), fields(prompt_len = prompt.len()))]
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, OracleUnavailable> {
        let response = self
            .http
            .post(self.request_url(model))
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&GeminiRequest::new(prompt))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let raw_response = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(OracleUnavailable::Status {
                status: status.as_u16(),
                body: raw_response,
            });
        }

        let response: GeminiResponse = serde_json::from_str(&raw_response)
            .map_err(|e| OracleUnavailable::MalformedResponse(e.to_string()))?;

        // Only the first candidate is used; thought parts are not part of the answer.
        let text: String = response
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter(|part| !part.thought)
                    .filter_map(|part| part.text)
                    .collect()
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(OracleUnavailable::EmptyResponse);
        }
        Ok(text)
    }
}

fn transport_error(e: reqwest::Error) -> OracleUnavailable {
    if e.is_timeout() {
        OracleUnavailable::Timeout
    } else {
        OracleUnavailable::Transport(e.to_string())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    role: &'static str,
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    response_mime_type: &'static str,
    response_schema: Value,
}

impl<'a> GeminiRequest<'a> {
    fn new(prompt: &'a str) -> Self {
        Self {
            contents: vec![GeminiContent {
                role: "user",
                parts: vec![GeminiPart { text: prompt }],
            }],
            generation_config: GeminiGenerationConfig {
                response_mime_type: "application/json",
                response_schema: classification_schema(),
            },
        }
    }
}

/// Schema for `{"results": [{"text_id": str, "topic_ids": [str]}]}` in Gemini's OpenAPI subset.
fn classification_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "results": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "text_id": { "type": "STRING" },
                        "topic_ids": { "type": "ARRAY", "items": { "type": "STRING" } }
                    },
                    "required": ["text_id", "topic_ids"]
                }
            }
        },
        "required": ["results"]
    })
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiResponseContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}
