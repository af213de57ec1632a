use std::sync::Arc;

use anyhow::Context;
use common::NewsApiConfig;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

use super::throttle::{RateLimiter, DEFAULT_MIN_INTERVAL};

pub const DEFAULT_API_URL: &str = "https://cryptopanic.com/api/v1/posts/";
pub const DEFAULT_API_KEY_ENV: &str = "CRYPTOPANIC_API_KEY";

/// Failures surfaced by [`NewsClient::fetch`].
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("news API returned {status}: {body}")]
    Upstream { status: u16, body: Value },

    #[error("news API request timed out after {0:?}")]
    Timeout(Duration),

    #[error("news API request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("news API returned malformed JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("news API still rate limited after {attempts} attempts ({elapsed:?})")]
    RetryBudgetExhausted { attempts: u32, elapsed: Duration },
}

impl FetchError {
    /// HTTP status to report to our own callers, when one is known.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Upstream { status, .. } => Some(*status),
            FetchError::RetryBudgetExhausted { .. } => Some(StatusCode::TOO_MANY_REQUESTS.as_u16()),
            FetchError::Timeout(_) => Some(StatusCode::GATEWAY_TIMEOUT.as_u16()),
            FetchError::Transport(e) => e.status().map(|s| s.as_u16()),
            FetchError::Decode(_) => None,
        }
    }

    /// Upstream payload (or message) for error bodies.
    pub fn details(&self) -> String {
        match self {
            FetchError::Upstream { body: Value::String(s), .. } => s.clone(),
            FetchError::Upstream { body, .. } => body.to_string(),
            other => other.to_string(),
        }
    }
}

/// Timeout and rate-limit recovery policy.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub timeout: Duration,
    /// Fixed wait after a 429 before retrying.
    pub cooldown: Duration,
    /// Total sends allowed for one fetch, including the first.
    pub max_attempts: u32,
    /// Upper bound on time spent in one fetch across retries.
    pub retry_budget: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            cooldown: Duration::from_secs(60),
            max_attempts: 10,
            retry_budget: Duration::from_secs(15 * 60),
        }
    }
}

/// Query parameters understood by the posts endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewsQuery {
    pub currencies: Option<String>,
    pub kind: Option<String>,
    pub filter: Option<String>,
}

impl NewsQuery {
    pub fn news() -> Self {
        Self {
            kind: Some("news".into()),
            ..Self::default()
        }
    }

    pub fn important(currencies: impl Into<String>) -> Self {
        Self {
            currencies: Some(currencies.into()),
            kind: Some("news".into()),
            filter: Some("important".into()),
        }
    }

    fn params(&self) -> Vec<(&'static str, &str)> {
        [
            ("currencies", self.currencies.as_deref()),
            ("kind", self.kind.as_deref()),
            ("filter", self.filter.as_deref()),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k, v)))
        .collect()
    }
}

enum Attempt {
    Body(Value),
    Throttled,
}

/// Throttled client for the external news API.
pub struct NewsClient {
    base_url: Url,
    api_token: String,
    limiter: Arc<RateLimiter>,
    policy: FetchPolicy,
    client: Client,
}

impl NewsClient {
    pub fn new(
        base_url: &str,
        api_token: impl Into<String>,
        limiter: Arc<RateLimiter>,
    ) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("invalid news API url: {}", base_url))?;
        let client = Client::builder()
            .user_agent("Cryptoscope/0.1.0")
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            base_url,
            api_token: api_token.into(),
            limiter,
            policy: FetchPolicy::default(),
            client,
        })
    }

    pub fn with_policy(mut self, policy: FetchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Build a client from the `[news_api]` section; the token is read from the
    /// environment variable it names.
    pub fn from_config(cfg: &NewsApiConfig) -> anyhow::Result<Self> {
        let key_env = cfg.api_key_env.as_deref().unwrap_or(DEFAULT_API_KEY_ENV);
        let api_token = std::env::var(key_env)
            .with_context(|| format!("news API key env var '{}' not set", key_env))?;

        let interval = cfg
            .min_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_MIN_INTERVAL);
        let defaults = FetchPolicy::default();
        let policy = FetchPolicy {
            timeout: cfg.timeout_seconds.map(Duration::from_secs).unwrap_or(defaults.timeout),
            cooldown: cfg.cooldown_seconds.map(Duration::from_secs).unwrap_or(defaults.cooldown),
            max_attempts: cfg.max_attempts.unwrap_or(defaults.max_attempts).max(1),
            retry_budget: cfg
                .retry_budget_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.retry_budget),
        };

        let client = Self::new(
            cfg.api_url.as_deref().unwrap_or(DEFAULT_API_URL),
            api_token,
            Arc::new(RateLimiter::new(interval)),
        )?
        .with_policy(policy);
        Ok(client)
    }

    /// GET the posts endpoint, honouring the shared interval and retrying on 429
    /// until the attempt count or time budget runs out.
    pub async fn fetch(&self, query: &NewsQuery) -> Result<Value, FetchError> {
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let slot = self.limiter.acquire().await;

            match self.send_once(query).await? {
                Attempt::Body(body) => {
                    slot.success();
                    debug!(attempts, "news: fetch succeeded");
                    return Ok(body);
                }
                Attempt::Throttled => {
                    drop(slot);
                    let elapsed = started.elapsed();
                    if attempts >= self.policy.max_attempts
                        || elapsed + self.policy.cooldown > self.policy.retry_budget
                    {
                        warn!(attempts, ?elapsed, "news: rate-limit retry budget exhausted");
                        return Err(FetchError::RetryBudgetExhausted { attempts, elapsed });
                    }
                    warn!(
                        attempts,
                        cooldown_secs = self.policy.cooldown.as_secs_f64(),
                        "news: rate limited by upstream, cooling down"
                    );
                    tokio::time::sleep(self.policy.cooldown).await;
                }
            }
        }
    }

    async fn send_once(&self, query: &NewsQuery) -> Result<Attempt, FetchError> {
        let timeout = self.policy.timeout;
        tokio::time::timeout(timeout, self.request(query))
            .await
            .map_err(|_| FetchError::Timeout(timeout))?
    }

    async fn request(&self, query: &NewsQuery) -> Result<Attempt, FetchError> {
        let mut params = vec![("auth_token", self.api_token.as_str())];
        params.extend(query.params());

        let response = self
            .client
            .get(self.base_url.clone())
            .query(&params)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(Attempt::Throttled);
        }

        let bytes = response.bytes().await?;
        if !status.is_success() {
            let body = serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
            info!(status = status.as_u16(), "news: upstream error response");
            return Err(FetchError::Upstream { status: status.as_u16(), body });
        }

        Ok(Attempt::Body(serde_json::from_slice(&bytes)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_params_skip_unset_fields() {
        assert_eq!(NewsQuery::news().params(), vec![("kind", "news")]);
        assert_eq!(
            NewsQuery::important("BTC,ETH").params(),
            vec![("currencies", "BTC,ETH"), ("kind", "news"), ("filter", "important")]
        );
    }

    #[test]
    fn error_status_mapping() {
        let upstream = FetchError::Upstream { status: 403, body: serde_json::json!({"info": "bad token"}) };
        assert_eq!(upstream.status(), Some(403));
        assert_eq!(upstream.details(), r#"{"info":"bad token"}"#);

        let exhausted = FetchError::RetryBudgetExhausted { attempts: 3, elapsed: Duration::from_secs(1) };
        assert_eq!(exhausted.status(), Some(429));
        assert_eq!(FetchError::Timeout(Duration::from_secs(10)).status(), Some(504));
    }

    #[test]
    fn rejects_invalid_base_url() {
        let limiter = Arc::new(RateLimiter::default());
        assert!(NewsClient::new("not a url", "token", limiter).is_err());
    }
}
