use anyhow::{Context, bail};
use clap::Parser;
use secrecy::SecretString;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::engine::Provider;
use crate::gemini::DEFAULT_BASE_URL;
use crate::rate_limiter::RateLimitPolicy;

#[derive(Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Server host to bind to
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Server port to bind to
    #[arg(long, env = "PORT", default_value = "8000")]
    pub port: u16,

    /// Provider used when a request does not name one
    #[arg(long, env = "DEFAULT_TEXT_CLASSIFIER_BACKEND", default_value = "MOCK")]
    pub default_provider: String,

    /// Comma separated provider allowlist
    #[arg(
        long,
        env = "ALLOWED_PROVIDERS",
        value_delimiter = ',',
        default_value = "GEMINI,MOCK"
    )]
    pub providers: Vec<String>,

    /// API key for Google AI Studio
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    /// Gemini model used when a request does not name one
    #[arg(long, env = "GEMINI_MODEL_NAME", default_value = "gemini-2.5-flash")]
    pub gemini_model: String,

    /// Comma separated Gemini model allowlist
    #[arg(
        long,
        env = "GEMINI_ALLOWED_MODELS",
        value_delimiter = ',',
        default_value = "gemini-2.5-flash"
    )]
    pub gemini_models: Vec<String>,

    /// Base URL of the Gemini API
    #[arg(long, env = "GEMINI_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub gemini_base_url: String,

    #[arg(long, env = "GEMINI_RATE_LIMIT_PER_MINUTE", default_value = "5")]
    pub gemini_rate_limit_per_minute: u32,

    #[arg(long, env = "GEMINI_RATE_LIMIT_PER_DAY", default_value = "25")]
    pub gemini_rate_limit_per_day: u32,

    #[arg(long, env = "MOCK_RATE_LIMIT_PER_MINUTE", default_value = "10")]
    pub mock_rate_limit_per_minute: u32,

    #[arg(long, env = "MOCK_RATE_LIMIT_PER_DAY", default_value = "100")]
    pub mock_rate_limit_per_day: u32,

    /// Timeout for a single call to the remote model, in milliseconds
    #[arg(long, env = "ORACLE_TIMEOUT_MS", default_value = "30000")]
    pub oracle_timeout_ms: u64,

    /// Timeout for a whole HTTP request, in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "60000")]
    pub request_timeout_ms: u64,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

/// Per-provider validation and admission settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub models: Vec<String>,
    /// `None` marks a provider that takes no model.
    pub default_model: Option<String>,
    pub rate_limit: RateLimitPolicy,
}

/// Everything the backend factory needs, resolved once at startup.
#[derive(Debug)]
pub struct GatewaySettings {
    pub default_provider: Provider,
    pub providers: BTreeMap<Provider, ProviderSettings>,
    pub gemini_api_key: Option<SecretString>,
    pub gemini_base_url: String,
    pub oracle_timeout: Duration,
}

impl Config {
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn gateway_settings(&self) -> anyhow::Result<GatewaySettings> {
        let mut providers = BTreeMap::new();
        for name in &self.providers {
            let name = name.trim().to_uppercase();
            if name.is_empty() {
                continue;
            }
            let provider: Provider = name
                .parse()
                .map_err(anyhow::Error::msg)
                .context("invalid --providers entry")?;
            providers.insert(provider, self.provider_settings(provider)?);
        }
        if providers.is_empty() {
            bail!("At least one provider must be allowed");
        }

        let default_provider: Provider = self
            .default_provider
            .trim()
            .to_uppercase()
            .parse()
            .map_err(anyhow::Error::msg)
            .context("invalid --default-provider")?;
        if !providers.contains_key(&default_provider) {
            bail!("Default provider {default_provider} is not in the provider allowlist");
        }

        Ok(GatewaySettings {
            default_provider,
            providers,
            gemini_api_key: self.gemini_api_key.clone().map(SecretString::from),
            gemini_base_url: self.gemini_base_url.clone(),
            oracle_timeout: Duration::from_millis(self.oracle_timeout_ms),
        })
    }

    fn provider_settings(&self, provider: Provider) -> anyhow::Result<ProviderSettings> {
        match provider {
            Provider::Mock => Ok(ProviderSettings {
                models: Vec::new(),
                default_model: None,
                rate_limit: RateLimitPolicy::new(
                    Some(self.mock_rate_limit_per_minute),
                    Some(self.mock_rate_limit_per_day),
                ),
            }),
            Provider::Gemini => {
                let models: Vec<String> = self
                    .gemini_models
                    .iter()
                    .map(|model| model.trim().to_string())
                    .filter(|model| !model.is_empty())
                    .collect();
                if !models.contains(&self.gemini_model) {
                    bail!(
                        "Default Gemini model {} is not in the Gemini model allowlist",
                        self.gemini_model
                    );
                }
                Ok(ProviderSettings {
                    models,
                    default_model: Some(self.gemini_model.clone()),
                    rate_limit: RateLimitPolicy::new(
                        Some(self.gemini_rate_limit_per_minute),
                        Some(self.gemini_rate_limit_per_day),
                    ),
                })
            }
        }
    }
}
