use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextUnit {
    pub id: String,
    pub text: String,
}

/// A candidate topic. The wire name of the label is `topic`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    #[serde(rename = "topic")]
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub text_id: String,
    pub topic_ids: Vec<String>,
}

impl ClassificationResult {
    pub fn new(text_id: impl Into<String>, topic_ids: Vec<String>) -> Self {
        Self {
            text_id: text_id.into(),
            topic_ids,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifyTextsRequest {
    pub texts: Vec<TextUnit>,
    pub topics: Vec<Topic>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClassifyTextsResponse {
    pub results: Vec<ClassificationResult>,
}

#[derive(Debug, Serialize)]
pub struct WelcomeResponse {
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}
