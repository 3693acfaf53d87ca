use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::GatewaySettings;
use crate::engine::{ClassifierBackend, Provider};
use crate::error::{ClassifyError, Result};
use crate::gemini::GeminiOracle;
use crate::mock_engine::MockEngine;
use crate::oracle::{Oracle, RemoteModelClient};
use crate::rate_limiter::RateLimiter;
use crate::remote_engine::RemoteEngine;

struct ProviderEntry {
    models: Vec<String>,
    default_model: Option<String>,
    /// Shared by every backend resolved for this provider.
    rate_limiter: Arc<RateLimiter>,
}

/// Resolves `(provider, model)` requests into ready-to-use backends.
///
/// Rate limiters are created here, once per provider, so their windows outlive
/// the per-request backends. A remote oracle that could not be configured only
/// fails requests that select it.
pub struct BackendFactory {
    default_provider: Provider,
    providers: BTreeMap<Provider, ProviderEntry>,
    oracle: std::result::Result<Arc<dyn Oracle>, String>,
}

impl BackendFactory {
    pub fn new(mut settings: GatewaySettings) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.oracle_timeout)
            .build()?;
        let oracle = GeminiOracle::new(
            http,
            settings.gemini_base_url.clone(),
            settings.gemini_api_key.take(),
        )
        .map(|oracle| Arc::new(oracle) as Arc<dyn Oracle>)
        .map_err(|e| e.to_string());

        if let Err(e) = &oracle {
            if settings.providers.contains_key(&Provider::Gemini) {
                tracing::warn!(error = %e, "GEMINI provider is allowed but cannot be used");
            }
        }

        Ok(Self::build(settings, oracle))
    }

    /// Uses the given oracle for the remote provider instead of Gemini.
    pub fn with_oracle(settings: GatewaySettings, oracle: Arc<dyn Oracle>) -> Self {
        Self::build(settings, Ok(oracle))
    }

    fn build(
        settings: GatewaySettings,
        oracle: std::result::Result<Arc<dyn Oracle>, String>,
    ) -> Self {
        let providers = settings
            .providers
            .into_iter()
            .map(|(provider, provider_settings)| {
                let rate_limiter = RateLimiter::new(provider_settings.rate_limit);
                tracing::info!(
                    provider = %provider,
                    limits = ?rate_limiter.limits(),
                    default_model = ?provider_settings.default_model,
                    "Provider enabled"
                );
                (
                    provider,
                    ProviderEntry {
                        models: provider_settings.models,
                        default_model: provider_settings.default_model,
                        rate_limiter: Arc::new(rate_limiter),
                    },
                )
            })
            .collect();

        Self {
            default_provider: settings.default_provider,
            providers,
            oracle,
        }
    }

    pub fn allowed_providers(&self) -> Vec<String> {
        self.providers
            .keys()
            .map(|provider| provider.as_str().to_string())
            .collect()
    }

    /// Validates the request's provider and model, then builds the backend.
    ///
    /// Blank values count as absent and fall back to the configured defaults.
    pub fn resolve(&self, provider: Option<&str>, model: Option<&str>) -> Result<ClassifierBackend> {
        let (provider, entry) = self.resolve_provider(provider)?;
        let model = resolve_model(provider, entry, model)?;

        match provider {
            Provider::Mock => Ok(ClassifierBackend::Mock(MockEngine::new(Arc::clone(
                &entry.rate_limiter,
            )))),
            Provider::Gemini => {
                let oracle = self.oracle.as_ref().map_err(ClassifyError::config)?;
                let model = model.ok_or_else(|| {
                    ClassifyError::config(format!("no model configured for provider {provider}"))
                })?;
                let client = RemoteModelClient::new(Arc::clone(oracle), model);
                Ok(ClassifierBackend::Remote(RemoteEngine::new(
                    client,
                    Arc::clone(&entry.rate_limiter),
                )))
            }
        }
    }

    fn resolve_provider(&self, requested: Option<&str>) -> Result<(Provider, &ProviderEntry)> {
        let name = match non_blank(requested) {
            Some(name) => name.to_uppercase(),
            None => return self.entry(self.default_provider),
        };

        name.parse::<Provider>()
            .ok()
            .and_then(|provider| self.entry(provider).ok())
            .ok_or_else(|| ClassifyError::InvalidProvider {
                provider: name,
                allowed: self.allowed_providers(),
            })
    }

    fn entry(&self, provider: Provider) -> Result<(Provider, &ProviderEntry)> {
        self.providers
            .get(&provider)
            .map(|entry| (provider, entry))
            .ok_or_else(|| ClassifyError::InvalidProvider {
                provider: provider.as_str().to_string(),
                allowed: self.allowed_providers(),
            })
    }
}

fn resolve_model(
    provider: Provider,
    entry: &ProviderEntry,
    requested: Option<&str>,
) -> Result<Option<String>> {
    let model = non_blank(requested)
        .map(str::to_string)
        .or_else(|| entry.default_model.clone());

    match model {
        Some(model) if entry.models.contains(&model) => Ok(Some(model)),
        Some(model) => Err(ClassifyError::InvalidModel {
            provider: provider.as_str().to_string(),
            model,
            allowed: entry.models.clone(),
        }),
        None => Ok(None),
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
