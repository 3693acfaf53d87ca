use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use std::time::Duration;

use crate::types::ErrorBody;

pub type Result<T> = std::result::Result<T, ClassifyError>;

#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    /// Request body failed validation before reaching a backend.
    #[error("{0}")]
    Validation(String),

    #[error("Invalid request body: {}", .0.body_text())]
    Body(#[from] JsonRejection),

    #[error("Invalid provider '{provider}'. Allowed providers: {}", .allowed.join(", "))]
    InvalidProvider {
        provider: String,
        allowed: Vec<String>,
    },

    #[error(
        "Invalid model '{model}' for provider {provider}. Allowed models: {}",
        format_models(.allowed)
    )]
    InvalidModel {
        provider: String,
        model: String,
        allowed: Vec<String>,
    },

    #[error("{provider} {reason}")]
    RateLimited {
        provider: String,
        reason: String,
        retry_after: Duration,
    },

    /// The selected backend cannot be built with the current configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

fn format_models(allowed: &[String]) -> String {
    if allowed.is_empty() {
        "(none; omit model_name)".to_string()
    } else {
        allowed.join(", ")
    }
}

impl ClassifyError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Body(rejection) => rejection.status(),
            Self::InvalidProvider { .. } | Self::InvalidModel { .. } => StatusCode::BAD_REQUEST,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ClassifyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Classification request failed");
        } else {
            tracing::info!(status = status.as_u16(), error = %self, "Classification request rejected");
        }

        let retry_after = match &self {
            // Rounded up so a client waiting the advertised time is admitted.
            Self::RateLimited { retry_after, .. } => {
                let partial = u64::from(retry_after.subsec_nanos() > 0);
                Some((retry_after.as_secs() + partial).max(1))
            }
            _ => None,
        };

        let mut response = (
            status,
            Json(ErrorBody {
                detail: self.to_string(),
            }),
        )
            .into_response();
        if let Some(seconds) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}
