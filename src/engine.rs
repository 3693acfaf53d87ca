use metrics::counter;
use std::fmt;
use std::str::FromStr;

use crate::error::{ClassifyError, Result};
use crate::mock_engine::MockEngine;
use crate::rate_limiter::{Admission, RateLimiter};
use crate::remote_engine::RemoteEngine;
use crate::types::{ClassificationResult, TextUnit, Topic};

/// Classification strategy families known to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Provider {
    Gemini,
    Mock,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gemini => "GEMINI",
            Self::Mock => "MOCK",
        }
    }

    /// Name used as the prefix of rate limit messages.
    fn display_name(self) -> &'static str {
        match self {
            Self::Gemini => "Gemini",
            Self::Mock => "Mock",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    /// Expects an already uppercased name.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "GEMINI" => Ok(Self::Gemini),
            "MOCK" => Ok(Self::Mock),
            other => Err(format!("unknown provider '{other}'")),
        }
    }
}

/// A resolved classifier. The set of strategies is closed.
pub enum ClassifierBackend {
    Mock(MockEngine),
    Remote(RemoteEngine),
}

impl ClassifierBackend {
    pub fn provider(&self) -> Provider {
        match self {
            Self::Mock(_) => Provider::Mock,
            Self::Remote(_) => Provider::Gemini,
        }
    }

    /// Returns one result per text, in input order.
    pub async fn classify(
        &self,
        texts: &[TextUnit],
        topics: &[Topic],
    ) -> Result<Vec<ClassificationResult>> {
        match self {
            Self::Mock(engine) => engine.classify(texts, topics),
            Self::Remote(engine) => engine.classify(texts, topics).await,
        }
    }
}

/// Runs the admission check shared by every backend.
pub(crate) fn admit(rate_limiter: &RateLimiter, provider: Provider, key: &str) -> Result<()> {
    match rate_limiter.check(key) {
        Admission::Admitted => Ok(()),
        Admission::Denied(denial) => {
            counter!(
                "rate_limited_requests_total",
                "provider" => provider.as_str(),
                "window" => denial.period.as_str()
            )
            .increment(1);
            Err(ClassifyError::RateLimited {
                provider: provider.display_name().to_string(),
                reason: denial.to_string(),
                retry_after: denial.retry_after,
            })
        }
    }
}
